//! Tests for procedures, routers, the server and the batching peer.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::Value;
use serde_json::json;

use typack::Schema;
use tyrpc::BatchItem;
use tyrpc::CallError;
use tyrpc::CallId;
use tyrpc::CallPayload;
use tyrpc::ErrorCode;
use tyrpc::ProcedureKind;
use tyrpc::ResultEnvelope;
use tyrpc::ResultPayload;
use tyrpc::parse_calls;
use tyrpc::parse_results;

use crate::client::ClientError;
use crate::config::ClientConfig;
use crate::config::Config;
use crate::config::ConfigError;
use crate::config::ServerConfig;
use crate::context::Context;
use crate::context::RequestMeta;
use crate::local::LocalTransport;
use crate::mock_transport::CallTransport;
use crate::mock_transport::DeadTransport;
use crate::mock_transport::RecordingTransport;
use crate::peer::Peer;
use crate::procedure::Procedure;
use crate::router::Router;
use crate::router::RouterError;
use crate::server::Server;
use crate::transport;
use crate::transport::Transport;
use crate::transport::TransportError;

// ============================================================================
//  FIXTURES
// ============================================================================

async fn explode(_ctx: Context, _input: Value) -> Result<Value, CallError> {
    panic!("boom")
}

async fn broken(_ctx: Context, _input: Value) -> anyhow::Result<Value> {
    Err(anyhow::anyhow!("connection refused by db-7"))
}

fn echo() -> Procedure {
    Procedure::query().resolve(|_ctx: Context, input: Value| async move { Ok::<_, CallError>(input) })
}

/// `user.getById`: knows only user "123", counts every handler run.
fn get_by_id(runs: Arc<AtomicUsize>) -> Procedure {
    Procedure::query()
        .input(Schema::string().non_empty())
        .resolve(move |_ctx: Context, id: String| {
            runs.fetch_add(1, Ordering::SeqCst);
            async move {
                if id == "123" {
                    Ok(json!({ "id": id, "name": "Ada" }))
                } else {
                    Err(CallError::not_found(format!("no user '{}'", id)))
                }
            }
        })
}

fn test_router(runs: Arc<AtomicUsize>) -> Router {
    let user = Router::builder()
        .procedure("getById", get_by_id(runs))
        .unwrap()
        .build();

    Router::builder()
        .procedure("echo", echo())
        .unwrap()
        .procedure("explode", Procedure::query().resolve(explode))
        .unwrap()
        .procedure(
            "slow",
            Procedure::query().resolve(|_ctx: Context, _input: Value| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, CallError>(Value::Null)
            }),
        )
        .unwrap()
        .merge("user", user)
        .unwrap()
        .build()
}

async fn roundtrip(server: &Server, bytes: &[u8]) -> Vec<ResultEnvelope> {
    let reply = server.handle_bytes(RequestMeta::default(), bytes).await;
    parse_results(&reply).unwrap().into_vec()
}

/// Delays every payload before handing it to the inner transport.
struct SlowTransport {
    inner: LocalTransport,
    delay: Duration,
}

#[async_trait::async_trait]
impl Transport for SlowTransport {
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        tokio::time::sleep(self.delay).await;
        self.inner.call(payload).await
    }
}

fn client_config(window_ms: u64, max_batch_size: usize, timeout_ms: u64) -> ClientConfig {
    ClientConfig {
        batch_window: Duration::from_millis(window_ms),
        max_batch_size,
        call_timeout: Duration::from_millis(timeout_ms),
    }
}

// ============================================================================
//  PROCEDURES
// ============================================================================

#[tokio::test]
async fn test_invalid_input_never_reaches_handler() {
    let runs = Arc::new(AtomicUsize::new(0));
    let procedure = get_by_id(runs.clone());
    let ctx = Context::detached("user.getById");

    let err = procedure.invoke(&ctx, json!(42)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::BadInput);
    assert_eq!(err.message, "expected string, found number");
    assert_eq!(err.validation_path, None);

    let err = procedure.invoke(&ctx, json!("")).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::BadInput);

    assert_eq!(runs.load(Ordering::SeqCst), 0);

    assert_eq!(
        procedure.invoke(&ctx, json!("123")).await,
        Ok(json!({ "id": "123", "name": "Ada" }))
    );
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bad_input_names_the_offending_field() {
    let procedure = Procedure::mutation()
        .input(
            Schema::object()
                .field("title", Schema::string())
                .field("tags", Schema::array(Schema::string())),
        )
        .resolve(|_ctx: Context, input: Value| async move { Ok::<_, CallError>(input) });

    let err = procedure
        .invoke(&Context::detached("post.create"), json!({ "title": "hi", "tags": ["a", 2] }))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BadInput);
    assert_eq!(err.validation_path.as_deref(), Some("tags[1]"));
}

#[tokio::test]
async fn test_domain_errors_pass_through() {
    let procedure = get_by_id(Arc::new(AtomicUsize::new(0)));
    let err = procedure.invoke(&Context::detached("user.getById"), json!("999")).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
    assert_eq!(err.message, "no user '999'");
}

#[tokio::test]
async fn test_faults_are_hidden_from_callers() {
    let procedure = Procedure::query().resolve(broken);
    let err = procedure.invoke(&Context::detached("broken"), Value::Null).await.unwrap_err();
    assert_eq!(err, CallError::internal());
    assert!(!err.message.contains("db-7"));
}

#[tokio::test]
async fn test_reported_internal_errors_are_scrubbed() {
    let procedure = Procedure::query().resolve(|_ctx: Context, _input: Value| async move {
        Err::<Value, _>(CallError::new(ErrorCode::Internal, "stack trace with secrets"))
    });
    let err = procedure.invoke(&Context::detached("leaky"), Value::Null).await.unwrap_err();
    assert_eq!(err.message, "internal server error");
}

#[tokio::test]
async fn test_panics_are_contained() {
    let procedure = Procedure::query().resolve(explode);
    let ctx = Context::detached("explode");
    assert_eq!(procedure.invoke(&ctx, Value::Null).await, Err(CallError::internal()));
    // still usable afterwards
    assert_eq!(procedure.invoke(&ctx, Value::Null).await, Err(CallError::internal()));
}

#[tokio::test]
async fn test_output_schema_is_enforced() {
    let procedure = Procedure::query()
        .output(Schema::object().field("id", Schema::string()))
        .resolve(|_ctx: Context, _input: Value| async move {
            Ok::<_, CallError>(json!({ "id": 7, "secret": "x" }))
        });
    let err = procedure.invoke(&Context::detached("p"), Value::Null).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Internal);

    let stripping = Procedure::query()
        .output(Schema::object().field("id", Schema::string()))
        .resolve(|_ctx: Context, _input: Value| async move {
            Ok::<_, CallError>(json!({ "id": "7", "secret": "x" }))
        });
    assert_eq!(
        stripping.invoke(&Context::detached("p"), Value::Null).await,
        Ok(json!({ "id": "7" }))
    );
}

#[tokio::test]
async fn test_guards_run_before_handler() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counted = runs.clone();
    let procedure = Procedure::mutation()
        .guard(|ctx| match ctx.header("authorization") {
            Some(_) => Ok(()),
            None => Err(CallError::unauthorized("sign in first")),
        })
        .resolve(move |_ctx: Context, _input: Value| {
            counted.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, CallError>(json!("done")) }
        });

    let err = procedure.invoke(&Context::detached("admin.reset"), Value::Null).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Unauthorized);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(procedure.kind(), ProcedureKind::Mutation);
}

#[tokio::test]
async fn test_guard_panics_and_internal_refusals_are_contained() {
    let panicking = Procedure::query()
        .guard(|_ctx| panic!("guard boom"))
        .resolve(|_ctx: Context, _input: Value| async move { Ok::<_, CallError>(json!("unreachable")) });
    let ctx = Context::detached("guarded");
    assert_eq!(panicking.invoke(&ctx, Value::Null).await, Err(CallError::internal()));

    let leaky = Procedure::query()
        .guard(|_ctx| Err(CallError::new(ErrorCode::Internal, "session store at 10.0.0.7 is down")))
        .resolve(|_ctx: Context, _input: Value| async move { Ok::<_, CallError>(json!("unreachable")) });
    let err = leaky.invoke(&ctx, Value::Null).await.unwrap_err();
    assert_eq!(err, CallError::internal());
    assert!(!err.message.contains("10.0.0.7"));
}

#[tokio::test]
async fn test_input_that_does_not_fit_handler_type() {
    // schema accepts any number, handler wants u8
    let procedure = Procedure::query()
        .input(Schema::number())
        .resolve(|_ctx: Context, n: u8| async move { Ok::<_, CallError>(n) });
    let err = procedure.invoke(&Context::detached("n"), json!(1000)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::BadInput);
}

// ============================================================================
//  ROUTER
// ============================================================================

#[test]
fn test_router_flattens_nested_paths() {
    let router = test_router(Arc::new(AtomicUsize::new(0)));
    let paths: Vec<&str> = router.paths().collect();
    assert_eq!(paths, vec!["echo", "explode", "slow", "user.getById"]);
    assert_eq!(router.len(), 4);
    assert!(router.contains("user.getById"));
}

#[test]
fn test_resolve_requires_exact_path() {
    let router = test_router(Arc::new(AtomicUsize::new(0)));
    assert!(router.resolve("user.getById").is_ok());

    let err = router.resolve("user").unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
    assert_eq!(err.message, "no procedure at path 'user'");

    assert!(router.resolve("user.getById.extra").is_err());
    assert!(router.resolve("").is_err());
}

#[test]
fn test_merge_rejects_duplicates() {
    let a = Router::builder().procedure("getAll", echo()).unwrap().build();
    let b = Router::builder().procedure("getAll", echo()).unwrap().build();

    let err = Router::builder()
        .merge("user", a)
        .unwrap()
        .merge("user", b)
        .unwrap_err();
    assert_eq!(err, RouterError::DuplicatePath("user.getAll".into()));
    assert_eq!(err.to_string(), "duplicate procedure path 'user.getAll'");
}

#[test]
fn test_dotted_registration_collides_with_merge() {
    let sub = Router::builder().procedure("getById", echo()).unwrap().build();
    let result = Router::builder()
        .procedure("user.getById", echo())
        .unwrap()
        .merge("user", sub);
    assert!(matches!(result, Err(RouterError::DuplicatePath(p)) if p == "user.getById"));
}

#[test]
fn test_invalid_paths() {
    for path in ["", "user.", ".user", "user..get", "user get"] {
        let result = Router::builder().procedure(path, echo());
        assert!(matches!(result, Err(RouterError::InvalidPath { .. })), "{:?} accepted", path);
    }
    assert!(Router::builder().merge("a..b", Router::default()).is_err());
}

#[test]
fn test_merge_at_root_and_on_built_router() {
    let a = Router::builder().procedure("health", echo()).unwrap().build();
    let b = Router::builder().procedure("version", echo()).unwrap().build();
    let merged = a.merge("", b).unwrap();
    assert_eq!(merged.paths().collect::<Vec<_>>(), vec!["health", "version"]);
}

#[test]
fn test_describe_lists_kinds_and_schemas() {
    let router = test_router(Arc::new(AtomicUsize::new(0)));
    let described = router.describe();
    let entry = &described["procedures"]["user.getById"];
    assert_eq!(entry["kind"], json!("query"));
    assert_eq!(entry["input"]["type"], json!("string"));
    assert_eq!(entry["input"]["minLength"], json!(1));
}

// ============================================================================
//  SERVER
// ============================================================================

#[tokio::test]
async fn test_single_call_keeps_its_id() {
    let server = Server::new(test_router(Arc::new(AtomicUsize::new(0))));
    let envs = roundtrip(&server, br#"{ "path": "user.getById", "input": "123", "id": "req-1" }"#).await;
    assert_eq!(envs.len(), 1);
    assert_eq!(envs[0].id, Some(CallId::from("req-1")));
    assert_eq!(envs[0].outcome, Ok(json!({ "id": "123", "name": "Ada" })));
}

#[tokio::test]
async fn test_batch_members_fail_independently() {
    let server = Server::new(test_router(Arc::new(AtomicUsize::new(0))));
    let envs = roundtrip(
        &server,
        br#"[
            { "path": "user.getById", "input": "123", "id": 1 },
            { "path": "explode", "id": 2 },
            { "path": "nope", "id": 3 },
            { "input": "no path", "id": 4 },
            { "path": "user.getById", "input": 42, "id": 5 },
            { "path": "echo", "input": [1, 2], "id": 6 }
        ]"#,
    )
    .await;

    let ids: Vec<Option<CallId>> = envs.iter().map(|e| e.id.clone()).collect();
    assert_eq!(ids, (1..=6).map(|n| Some(CallId::Number(n))).collect::<Vec<_>>());

    let codes: Vec<Option<ErrorCode>> = envs
        .iter()
        .map(|e| e.outcome.as_ref().err().map(|err| err.code))
        .collect();
    assert_eq!(
        codes,
        vec![
            None,
            Some(ErrorCode::Internal),
            Some(ErrorCode::NotFound),
            Some(ErrorCode::ParseError),
            Some(ErrorCode::BadInput),
            None,
        ]
    );
    assert_eq!(envs[5].outcome, Ok(json!([1, 2])));
}

#[tokio::test]
async fn test_failing_middle_call_does_not_disturb_neighbours() {
    let server = Server::new(test_router(Arc::new(AtomicUsize::new(0))));
    let envs = roundtrip(
        &server,
        br#"[
            { "path": "echo", "input": "first", "id": "a" },
            { "path": "explode", "id": "b" },
            { "path": "echo", "input": "third", "id": "c" }
        ]"#,
    )
    .await;

    assert_eq!(envs.len(), 3);
    assert_eq!((envs[0].id.clone(), envs[0].outcome.clone()), (Some(CallId::from("a")), Ok(json!("first"))));
    assert_eq!(envs[1].outcome, Err(CallError::internal()));
    assert_eq!((envs[2].id.clone(), envs[2].outcome.clone()), (Some(CallId::from("c")), Ok(json!("third"))));
}

#[tokio::test]
async fn test_unreadable_payload_is_answered() {
    let server = Server::new(Router::default());
    let envs = roundtrip(&server, b"{ not json").await;
    assert_eq!(envs.len(), 1);
    assert_eq!(envs[0].outcome.as_ref().unwrap_err().code, ErrorCode::ParseError);

    let envs = roundtrip(&server, b"[]").await;
    assert_eq!(envs[0].outcome.as_ref().unwrap_err().code, ErrorCode::ParseError);
}

#[tokio::test]
async fn test_oversized_payloads_and_batches() {
    let config = ServerConfig {
        max_batch_size: 2,
        max_payload_bytes: 256,
        ..ServerConfig::default()
    };
    let server = Server::new(test_router(Arc::new(AtomicUsize::new(0)))).with_config(config).unwrap();

    let envs = roundtrip(
        &server,
        br#"[{ "path": "echo", "id": 1 }, { "path": "echo", "id": 2 }, { "path": "echo", "id": 3 }]"#,
    )
    .await;
    assert_eq!(envs.len(), 3);
    for (n, env) in envs.iter().enumerate() {
        assert_eq!(env.id, Some(CallId::Number(n as i64 + 1)));
        assert_eq!(env.outcome.as_ref().unwrap_err().code, ErrorCode::PayloadTooLarge);
    }

    let big = format!(r#"{{ "path": "echo", "input": "{}" }}"#, "x".repeat(300));
    let envs = roundtrip(&server, big.as_bytes()).await;
    assert_eq!(envs[0].outcome.as_ref().unwrap_err().code, ErrorCode::PayloadTooLarge);
}

#[tokio::test]
async fn test_timeout_fails_only_the_slow_call() {
    let config = ServerConfig {
        call_timeout: Duration::from_millis(50),
        ..ServerConfig::default()
    };
    let server = Server::new(test_router(Arc::new(AtomicUsize::new(0)))).with_config(config).unwrap();

    let envs = roundtrip(
        &server,
        br#"[{ "path": "slow", "id": 1 }, { "path": "echo", "input": "fast", "id": 2 }]"#,
    )
    .await;
    assert_eq!(envs[0].outcome.as_ref().unwrap_err().code, ErrorCode::Timeout);
    assert_eq!(envs[1].outcome, Ok(json!("fast")));
}

struct Connection(Arc<AtomicUsize>);

impl Drop for Connection {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_context_resources_are_released_after_each_call() {
    let released = Arc::new(AtomicUsize::new(0));
    let hook_released = released.clone();

    let router = Router::builder()
        .procedure(
            "db.ping",
            Procedure::query().resolve(|ctx: Context, _input: Value| async move {
                match ctx.get::<Connection>() {
                    Some(_) => Ok(json!("pong")),
                    None => Err(CallError::internal()),
                }
            }),
        )
        .unwrap()
        .procedure("explode", Procedure::query().resolve(explode))
        .unwrap()
        .build();

    let server = Server::new(router).with_context(move |_meta, builder| {
        builder.insert(Connection(hook_released.clone()));
        Ok(())
    });

    let envs = roundtrip(&server, br#"{ "path": "db.ping" }"#).await;
    assert_eq!(envs[0].outcome, Ok(json!("pong")));
    assert_eq!(released.load(Ordering::SeqCst), 1);

    let envs = roundtrip(&server, br#"{ "path": "explode" }"#).await;
    assert!(envs[0].outcome.is_err());
    assert_eq!(released.load(Ordering::SeqCst), 2);

    // unknown paths never build a context
    roundtrip(&server, br#"{ "path": "missing" }"#).await;
    assert_eq!(released.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_context_hook_can_refuse_a_call() {
    let server = Server::new(test_router(Arc::new(AtomicUsize::new(0)))).with_context(|meta, builder| {
        let token = meta
            .header("Authorization")
            .ok_or_else(|| CallError::unauthorized("missing token"))?;
        builder.insert(token.to_string());
        Ok(())
    });

    let envs = roundtrip(&server, br#"{ "path": "echo", "input": 1 }"#).await;
    assert_eq!(envs[0].outcome.as_ref().unwrap_err().code, ErrorCode::Unauthorized);

    let meta = RequestMeta::new().with_header("authorization", "Bearer t");
    let reply = server.handle_bytes(meta, br#"{ "path": "echo", "input": 1 }"#).await;
    let envs = parse_results(&reply).unwrap().into_vec();
    assert_eq!(envs[0].outcome, Ok(json!(1)));
}

fn guarded_batch_router() -> Router {
    Router::builder()
        .procedure("echo", echo())
        .unwrap()
        .procedure(
            "guarded",
            Procedure::query()
                .guard(|_ctx| panic!("guard boom"))
                .resolve(|_ctx: Context, _input: Value| async move { Ok::<_, CallError>(Value::Null) }),
        )
        .unwrap()
        .procedure(
            "sealed",
            Procedure::query()
                .guard(|_ctx| Err(CallError::new(ErrorCode::Internal, "acl table missing")))
                .resolve(|_ctx: Context, _input: Value| async move { Ok::<_, CallError>(Value::Null) }),
        )
        .unwrap()
        .build()
}

#[tokio::test]
async fn test_guard_panic_in_batch_leaves_siblings_answered() {
    let server = Arc::new(Server::new(guarded_batch_router()));
    let task = tokio::spawn(async move {
        roundtrip(
            &server,
            br#"[
                { "path": "echo", "input": 1, "id": 1 },
                { "path": "guarded", "id": 2 },
                { "path": "sealed", "id": 3 },
                { "path": "echo", "input": 4, "id": 4 }
            ]"#,
        )
        .await
    });
    let envs = task.await.unwrap();

    assert_eq!(envs.len(), 4);
    assert_eq!(envs[0].outcome, Ok(json!(1)));
    assert_eq!(envs[1].outcome, Err(CallError::internal()));
    assert_eq!(envs[2].outcome, Err(CallError::internal()));
    assert_eq!(envs[3].outcome, Ok(json!(4)));
}

#[tokio::test]
async fn test_context_hook_panic_fails_only_its_call() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counted = seen.clone();
    let server = Server::new(test_router(Arc::new(AtomicUsize::new(0)))).with_context(move |_meta, _builder| {
        // join_all starts members in order, so the second hook run is call 2
        if counted.fetch_add(1, Ordering::SeqCst) == 1 {
            panic!("hook boom");
        }
        Ok(())
    });
    let server = Arc::new(server);
    let task = tokio::spawn(async move {
        roundtrip(
            &server,
            br#"[
                { "path": "echo", "input": "a", "id": 1 },
                { "path": "echo", "input": "b", "id": 2 },
                { "path": "echo", "input": "c", "id": 3 }
            ]"#,
        )
        .await
    });
    let envs = task.await.unwrap();

    assert_eq!(envs[0].outcome, Ok(json!("a")));
    assert_eq!(envs[1].outcome, Err(CallError::internal()));
    assert_eq!(envs[2].outcome, Ok(json!("c")));
    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_context_hook_internal_errors_are_scrubbed() {
    let server = Server::new(test_router(Arc::new(AtomicUsize::new(0))))
        .with_context(|_meta, _builder| Err(CallError::new(ErrorCode::Internal, "pool exhausted on db-3")));

    let envs = roundtrip(&server, br#"{ "path": "echo", "input": 1 }"#).await;
    let err = envs[0].outcome.as_ref().unwrap_err();
    assert_eq!(err.message, "internal server error");
    assert!(!err.message.contains("db-3"));
}

#[test]
fn test_server_rejects_zero_limits() {
    let zero_batch = ServerConfig {
        max_batch_size: 0,
        ..ServerConfig::default()
    };
    let err = Server::new(Router::default()).with_config(zero_batch).err().unwrap();
    assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("server.max_batch_size")));

    let zero_timeout = ServerConfig {
        call_timeout: Duration::ZERO,
        ..ServerConfig::default()
    };
    assert!(Server::new(Router::default()).with_config(zero_timeout).is_err());
}

// ============================================================================
//  PEER
// ============================================================================

fn local(runs: Arc<AtomicUsize>) -> LocalTransport {
    LocalTransport::new(Arc::new(Server::new(test_router(runs))))
}

#[tokio::test]
async fn test_concurrent_calls_share_one_round_trip() {
    let recording = Arc::new(RecordingTransport::new(Arc::new(local(Arc::new(AtomicUsize::new(0))))));
    let peer = Peer::new("test", recording.clone(), &client_config(20, 50, 5_000));

    let (a, b, c) = tokio::join!(
        peer.call("user.getById", json!("123")),
        peer.call("user.getById", json!("999")),
        peer.call("echo", json!({ "n": 3 })),
    );

    assert_eq!(a, Ok(json!({ "id": "123", "name": "Ada" })));
    assert_eq!(b.unwrap_err().code(), ErrorCode::NotFound);
    assert_eq!(c, Ok(json!({ "n": 3 })));
    assert_eq!(recording.round_trips(), 1);
    assert_eq!(peer.in_flight(), 0);

    let sent: Value = serde_json::from_slice(&recording.payloads()[0]).unwrap();
    assert_eq!(sent.as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn test_batches_respect_max_size() {
    let recording = Arc::new(RecordingTransport::new(Arc::new(local(Arc::new(AtomicUsize::new(0))))));
    let peer = Peer::new("test", recording.clone(), &client_config(10, 2, 5_000));

    let (a, b, c) = tokio::join!(
        peer.call("echo", json!(1)),
        peer.call("echo", json!(2)),
        peer.call("echo", json!(3)),
    );
    assert_eq!((a, b, c), (Ok(json!(1)), Ok(json!(2)), Ok(json!(3))));
    assert_eq!(recording.round_trips(), 2);
}

#[tokio::test]
async fn test_transport_failure_fails_the_whole_batch() {
    let peer = Peer::new("dead", Arc::new(DeadTransport), &client_config(5, 50, 5_000));
    let (a, b) = tokio::join!(peer.call("echo", json!(1)), peer.call("echo", json!(2)));

    for outcome in [a, b] {
        let err = outcome.unwrap_err();
        assert!(matches!(err, ClientError::Transport(TransportError::ConnectionLost(_))));
        assert_eq!(err.code(), ErrorCode::ClientClosed);
    }
    assert_eq!(peer.in_flight(), 0);
}

#[tokio::test]
async fn test_missing_result_fails_only_its_caller() {
    // answers only the first member of every batch
    let transport = CallTransport::new(|payload: &[u8]| {
        let Ok(CallPayload::Batch(items)) = parse_calls(payload) else {
            return Err(TransportError::Io("expected a batch".into()));
        };
        let first = match &items[0] {
            BatchItem::Valid(envelope) => envelope.id.clone(),
            BatchItem::Invalid { id, .. } => id.clone(),
        };
        ResultPayload::Batch(vec![ResultEnvelope::success(first, json!("only me"))])
            .to_bytes()
            .map_err(|e| TransportError::Io(e.to_string()))
    });
    let peer = Peer::new("partial", Arc::new(transport), &client_config(10, 50, 5_000));

    let (a, b) = tokio::join!(peer.call("echo", json!(1)), peer.call("echo", json!(2)));
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|o| **o == Ok(json!("only me"))).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, Err(ClientError::MissingResult(_))))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_whole_payload_refusal_reaches_every_caller() {
    let transport = CallTransport::new(|_payload: &[u8]| {
        ResultPayload::Single(ResultEnvelope::failure(
            None,
            CallError::new(ErrorCode::PayloadTooLarge, "too big"),
        ))
        .to_bytes()
        .map_err(|e| TransportError::Io(e.to_string()))
    });
    let peer = Peer::new("refusing", Arc::new(transport), &client_config(5, 50, 5_000));

    let (a, b) = tokio::join!(peer.call("echo", json!(1)), peer.call("echo", json!(2)));
    assert_eq!(a.unwrap_err().code(), ErrorCode::PayloadTooLarge);
    assert_eq!(b.unwrap_err().code(), ErrorCode::PayloadTooLarge);
}

#[tokio::test]
async fn test_slow_reply_times_out_and_frees_the_slot() {
    let transport = SlowTransport {
        inner: local(Arc::new(AtomicUsize::new(0))),
        delay: Duration::from_millis(200),
    };
    let peer = Peer::new("slow", Arc::new(transport), &client_config(5, 50, 50));

    let err = peer.call("echo", json!(1)).await.unwrap_err();
    assert_eq!(err, ClientError::Timeout);
    assert_eq!(err.code(), ErrorCode::Timeout);
    assert_eq!(peer.in_flight(), 0);
}

#[tokio::test]
async fn test_abandoned_call_leaves_siblings_alone() {
    let transport = SlowTransport {
        inner: local(Arc::new(AtomicUsize::new(0))),
        delay: Duration::from_millis(50),
    };
    let peer = Peer::new("abandon", Arc::new(transport), &client_config(5, 50, 5_000));

    let (abandoned, kept) = tokio::join!(
        tokio::time::timeout(Duration::from_millis(20), peer.call("echo", json!(1))),
        peer.call("echo", json!(2)),
    );
    assert!(abandoned.is_err());
    assert_eq!(kept, Ok(json!(2)));
    assert_eq!(peer.in_flight(), 0);
}

#[tokio::test]
async fn test_each_call_runs_exactly_once() {
    let runs = Arc::new(AtomicUsize::new(0));
    let recording = Arc::new(RecordingTransport::new(Arc::new(local(runs.clone()))));
    let peer = Peer::new("once", recording.clone(), &client_config(5, 4, 5_000));

    let calls = (0..10).map(|_| peer.call("user.getById", json!("123")));
    let outcomes = futures::future::join_all(calls).await;

    assert!(outcomes.iter().all(Result::is_ok));
    assert_eq!(runs.load(Ordering::SeqCst), 10);
    assert_eq!(recording.round_trips(), 3);
}

// ============================================================================
//  CONFIG
// ============================================================================

#[test]
fn test_empty_config_uses_defaults() {
    let config = Config::from_toml_str("").unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.server.max_batch_size, 50);
    assert_eq!(config.client.batch_window, Duration::from_millis(2));
}

#[test]
fn test_partial_tables() {
    let config = Config::from_toml_str(
        r#"
        [server]
        call_timeout_ms = 250

        [client]
        batch_window_ms = 10
        "#,
    )
    .unwrap();
    assert_eq!(config.server.call_timeout, Duration::from_millis(250));
    assert_eq!(config.server.max_payload_bytes, 1024 * 1024);
    assert_eq!(config.client.batch_window, Duration::from_millis(10));
    assert_eq!(config.client.call_timeout, Duration::from_secs(30));
}

#[test]
fn test_zero_values_are_rejected() {
    let err = Config::from_toml_str("[server]\nmax_batch_size = 0\n").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("server.max_batch_size")));

    let err = Config::from_toml_str("[client]\ncall_timeout_ms = 0\n").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn test_unknown_keys_and_bad_types_fail_to_parse() {
    assert!(matches!(Config::from_toml_str("[server]\nbatch = 3\n"), Err(ConfigError::Parse(_))));
    assert!(matches!(
        Config::from_toml_str("[client]\nbatch_window_ms = \"fast\"\n"),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_missing_file() {
    let err = Config::load("/definitely/not/here.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("/definitely/not/here.toml"));
}
