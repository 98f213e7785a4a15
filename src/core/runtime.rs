//! Runtime orchestration: wires the session store, transport, dispatcher,
//! and retry scheduler, and owns the shutdown channel.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use super::config::Config;
use super::time::SystemClock;
use crate::codec::{TextCodec, WireCodec};
use crate::qos::scheduler::RetryScheduler;
use crate::qos::ReliableOptions;
use crate::rpc::{FrameworkApi, Middleware, RpcDispatcher, RpcHandler};
use crate::session::SessionStore;
use crate::transport::{DefaultInspector, HandshakeInspector, WsTransport};

pub struct Runtime {
    config: Config,
    opts: Arc<ReliableOptions>,
    store: Arc<SessionStore>,
    transport: Arc<WsTransport>,
    dispatcher: Arc<RpcDispatcher>,
    api: FrameworkApi,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    /// Builds a runtime with the default text codec and header inspector.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_parts(config, Arc::new(TextCodec), Arc::new(DefaultInspector))
    }

    /// Builds a runtime with an explicit codec and handshake inspector.
    pub fn with_parts(
        config: Config,
        codec: Arc<dyn WireCodec>,
        inspector: Arc<dyn HandshakeInspector>,
    ) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let opts = Arc::new(config.reliability.to_options());
        let store = Arc::new(SessionStore::new(
            opts.session_ttl_ms,
            config.offline_limits(),
        ));
        let transport = Arc::new(WsTransport::new(
            opts.clone(),
            store.clone(),
            inspector,
            std::time::Duration::from_secs(config.server.idle_timeout_secs),
            config.server.max_payload_bytes,
        ));
        let dispatcher = Arc::new(RpcDispatcher::new(codec, config.server.workers));
        let api = FrameworkApi::new(store.clone(), transport.engine().clone());

        let dispatch = dispatcher.clone();
        transport.set_data_callback(Arc::new(move |payload, session, port| {
            let dispatch = dispatch.clone();
            tokio::spawn(dispatch.dispatch(payload, session, Arc::new(port)));
        }));

        Ok(Self {
            config,
            opts,
            store,
            transport,
            dispatcher,
            api,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn api(&self) -> &FrameworkApi {
        &self.api
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<WsTransport> {
        &self.transport
    }

    /// Registers an RPC handler under a method name.
    pub fn register(&self, method: &str, handler: RpcHandler) {
        self.dispatcher.register(method, handler);
    }

    /// Installs global middleware.
    pub fn use_middleware(&self, mw: Middleware) {
        self.dispatcher.use_middleware(mw);
    }

    /// Installs middleware scoped to one method.
    pub fn use_for(&self, method: &str, mw: Middleware) {
        self.dispatcher.use_for(method, mw);
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        self.serve(listener).await
    }

    /// Serves on an existing listener; used by embedders and tests.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let transport = self.transport.clone();
        let targets = Arc::new(move || transport.retry_targets());
        let scheduler = RetryScheduler::new(
            targets,
            self.store.clone(),
            self.opts.clone(),
            SystemClock,
        );
        let scheduler_handle = scheduler.spawn(self.shutdown_rx.clone());

        info!(
            level = ?self.opts.level,
            methods = self.dispatcher.method_count(),
            "runtime starting"
        );
        let result = self
            .transport
            .serve(listener, self.shutdown_rx.clone())
            .await;
        let _ = scheduler_handle.await;
        result
    }

    /// Flips the shutdown flag; the accept loop and scheduler exit within
    /// one tick.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
