//! `photon start` - run the reference server.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::filter::EnvFilter;

use crate::cli::args::StartArgs;
use crate::core::config::Config;
use crate::core::runtime::Runtime;

pub async fn run_start(args: StartArgs) -> Result<()> {
    let (mut config, config_missing) = if args.config.exists() {
        (Config::load(&args.config)?, false)
    } else {
        (Config::default(), true)
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(level) = args.log_level {
        config.telemetry.log_level = level;
    }
    init_tracing(&config.telemetry.log_level);
    if config_missing {
        warn!(path = %args.config.display(), "config file not found; using defaults");
    }

    let runtime = Runtime::new(config)?;
    register_reference_handlers(&runtime);

    tokio::select! {
        result = runtime.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received; shutting down");
            runtime.shutdown();
            Ok(())
        }
    }
}

fn init_tracing(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Minimal handler set so a bare `photon start` is immediately usable.
fn register_reference_handlers(runtime: &Runtime) {
    runtime.register(
        "echo",
        Arc::new(|payload, ctx| {
            ctx.reply(payload);
        }),
    );

    let api = runtime.api().clone();
    runtime.register(
        "whoami",
        Arc::new(move |_payload, ctx| {
            let client_id = ctx.session().identity().client_id.clone();
            let device_id = ctx.session().identity().device_id;
            api.set_field(ctx.session().id(), "client", client_id.clone(), true);
            ctx.reply(format!("{client_id}#{device_id}").as_bytes());
        }),
    );
}
