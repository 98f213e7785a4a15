//! Dispatch pipeline: codec parse, middleware, handler execution, error
//! frames, and the framework API's offline routing.

use std::sync::{Arc, Mutex};

use photon::codec::TextCodec;
use photon::qos::{QosEngine, ReliableOptions};
use photon::rpc::{rate_limiter, FrameworkApi, MwDecision, ReplySink, RpcDispatcher, RpcErr};
use photon::session::{ClientIdentity, OfflineLimits, Session, SessionStore};

#[derive(Default)]
struct CollectSink {
    replies: Mutex<Vec<Vec<u8>>>,
    closed: Mutex<bool>,
}

impl CollectSink {
    fn replies(&self) -> Vec<Vec<u8>> {
        self.replies.lock().unwrap().clone()
    }
}

impl ReplySink for CollectSink {
    fn reply(&self, payload: &[u8]) {
        self.replies.lock().unwrap().push(payload.to_vec());
    }

    fn close(&self, _code: u16, _reason: &str) {
        *self.closed.lock().unwrap() = true;
    }
}

fn session() -> (Arc<SessionStore>, Arc<Session>) {
    let store = Arc::new(SessionStore::new(60_000, OfflineLimits::default()));
    let session = store.get_or_create(ClientIdentity::new("u", 1), 0);
    (store, session)
}

fn dispatcher() -> Arc<RpcDispatcher> {
    Arc::new(RpcDispatcher::new(Arc::new(TextCodec), 2))
}

#[tokio::test]
async fn routes_to_registered_handler() {
    let dispatcher = dispatcher();
    dispatcher.register("echo", Arc::new(|payload, ctx| ctx.reply(payload)));
    let (_store, session) = session();
    let sink = Arc::new(CollectSink::default());

    dispatcher
        .clone()
        .dispatch(b"echo:hello".to_vec(), session, sink.clone())
        .await;

    assert_eq!(sink.replies(), vec![b"hello".to_vec()]);
}

#[tokio::test]
async fn unknown_method_gets_not_found_frame() {
    let dispatcher = dispatcher();
    let (_store, session) = session();
    let sink = Arc::new(CollectSink::default());

    dispatcher
        .clone()
        .dispatch(b"missing:x".to_vec(), session, sink.clone())
        .await;

    let replies = sink.replies();
    assert_eq!(replies.len(), 1);
    let text = String::from_utf8(replies[0].clone()).unwrap();
    assert!(text.starts_with("error:3:"), "got {text}");
}

#[tokio::test]
async fn unparseable_payload_gets_parse_frame() {
    let dispatcher = dispatcher();
    let (_store, session) = session();
    let sink = Arc::new(CollectSink::default());

    dispatcher
        .clone()
        .dispatch(b"no separator here".to_vec(), session, sink.clone())
        .await;

    let replies = sink.replies();
    let text = String::from_utf8(replies[0].clone()).unwrap();
    assert!(text.starts_with("error:1:"), "got {text}");
}

#[tokio::test]
async fn middleware_rejection_skips_handler() {
    let dispatcher = dispatcher();
    let invoked = Arc::new(Mutex::new(false));
    let handler_invoked = invoked.clone();
    dispatcher.register(
        "guarded",
        Arc::new(move |_payload, _ctx| {
            *handler_invoked.lock().unwrap() = true;
        }),
    );
    dispatcher.use_middleware(Arc::new(|_session, _method, _payload| {
        MwDecision::reject(RpcErr::Middleware, "access denied")
    }));
    let (_store, session) = session();
    let sink = Arc::new(CollectSink::default());

    dispatcher
        .clone()
        .dispatch(b"guarded:x".to_vec(), session, sink.clone())
        .await;

    assert!(!*invoked.lock().unwrap());
    let text = String::from_utf8(sink.replies()[0].clone()).unwrap();
    assert!(text.starts_with("error:2:"), "got {text}");
}

#[tokio::test]
async fn panicking_middleware_stops_chain_with_middleware_frame() {
    let dispatcher = dispatcher();
    let invoked = Arc::new(Mutex::new(false));
    let handler_invoked = invoked.clone();
    dispatcher.register(
        "guarded",
        Arc::new(move |_payload, _ctx| {
            *handler_invoked.lock().unwrap() = true;
        }),
    );
    dispatcher.use_middleware(Arc::new(|_session, _method, _payload| {
        panic!("middleware bug")
    }));
    let (_store, session) = session();
    let sink = Arc::new(CollectSink::default());

    dispatcher
        .clone()
        .dispatch(b"guarded:x".to_vec(), session, sink.clone())
        .await;

    assert!(!*invoked.lock().unwrap());
    let text = String::from_utf8(sink.replies()[0].clone()).unwrap();
    assert!(text.starts_with("error:2:"), "got {text}");
}

#[tokio::test]
async fn scoped_middleware_only_applies_to_its_method() {
    let dispatcher = dispatcher();
    dispatcher.register("open", Arc::new(|payload, ctx| ctx.reply(payload)));
    dispatcher.register("closed", Arc::new(|payload, ctx| ctx.reply(payload)));
    dispatcher.use_for(
        "closed",
        Arc::new(|_s, _m, _p| MwDecision::reject(RpcErr::Middleware, "nope")),
    );
    let (_store, session) = session();

    let sink = Arc::new(CollectSink::default());
    dispatcher
        .clone()
        .dispatch(b"open:1".to_vec(), session.clone(), sink.clone())
        .await;
    assert_eq!(sink.replies(), vec![b"1".to_vec()]);

    let sink = Arc::new(CollectSink::default());
    dispatcher
        .clone()
        .dispatch(b"closed:1".to_vec(), session, sink.clone())
        .await;
    let text = String::from_utf8(sink.replies()[0].clone()).unwrap();
    assert!(text.starts_with("error:2:"));
}

#[tokio::test]
async fn rate_limiter_rejects_past_burst() {
    let dispatcher = dispatcher();
    dispatcher.register("ping", Arc::new(|payload, ctx| ctx.reply(payload)));
    dispatcher.use_middleware(rate_limiter(1, 2));
    let (_store, session) = session();
    let sink = Arc::new(CollectSink::default());

    for _ in 0..3 {
        dispatcher
            .clone()
            .dispatch(b"ping:1".to_vec(), session.clone(), sink.clone())
            .await;
    }

    let replies = sink.replies();
    assert_eq!(replies.len(), 3);
    let last = String::from_utf8(replies[2].clone()).unwrap();
    assert!(last.starts_with("error:5:"), "got {last}");
}

#[tokio::test]
async fn handler_panic_becomes_internal_frame() {
    let dispatcher = dispatcher();
    dispatcher.register("boom", Arc::new(|_payload, _ctx| panic!("handler bug")));
    let (_store, session) = session();
    let sink = Arc::new(CollectSink::default());

    dispatcher
        .clone()
        .dispatch(b"boom:".to_vec(), session, sink.clone())
        .await;

    let text = String::from_utf8(sink.replies()[0].clone()).unwrap();
    assert!(text.starts_with("error:99:"), "got {text}");
}

#[tokio::test]
async fn offline_sends_respect_session_cap() {
    let store = Arc::new(SessionStore::new(
        60_000,
        OfflineLimits {
            per_session: 3,
            total: 100,
            message_ttl_ms: 60_000,
        },
    ));
    let session = store.get_or_create(ClientIdentity::new("u", 1), 0);
    let api = FrameworkApi::new(
        store.clone(),
        QosEngine::new(Arc::new(ReliableOptions::default())),
    );

    assert!(api.send_to_session(&session, b"m1"));
    assert!(api.send_to_session(&session, b"m2"));
    assert!(api.send_to_session(&session, b"m3"));
    assert!(!api.send_to_session(&session, b"m4"));
    assert_eq!(store.offline_backlog(session.id()), 3);

    // Unknown and offline sessions refuse direct sends.
    assert!(!api.send_to(session.id(), b"x"));
    assert!(!api.send_to("S999", b"x"));
}

#[tokio::test]
async fn field_api_round_trip_with_index() {
    let (store, session) = session();
    let api = FrameworkApi::new(
        store,
        QosEngine::new(Arc::new(ReliableOptions::default())),
    );
    let sid = session.id().to_string();

    assert!(api.set_field(&sid, "room", "lobby", true));
    assert!(api.set_field(&sid, "score", 42u64, false));
    assert_eq!(api.get_field::<String>(&sid, "room"), Some("lobby".into()));
    assert_eq!(api.get_field::<u64>(&sid, "score"), Some(42));

    let found = api.find_by("room", "lobby");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), sid);
    assert!(api.find_by("room", "arena").is_empty());
}
