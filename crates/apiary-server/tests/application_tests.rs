//! Application core tests: dispatch, access and validation, the service
//! lifecycle, static files and the method table.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use apiary_protocol::{
    AnonymousSession, ApplicationError, BoxError, ErrorKind, Failure, Service, Session,
};
use apiary_server::*;
use apiary_transport::ClientSession;
use serde_json::{Value, json};

fn anonymous() -> Arc<dyn Session> {
    Arc::new(AnonymousSession::new())
}

fn signed_in(username: &str) -> Arc<dyn Session> {
    let session = ClientSession::new();
    session.authorize(&json!({"token": "t", "username": username}));
    Arc::new(session)
}

fn constant(value: Value) -> ApiMethod {
    ApiMethod::new(move |_ctx, _params| {
        let value = value.clone();
        async move { Ok::<_, BoxError>(value) }
    })
}

fn echo() -> ApiMethod {
    ApiMethod::new(|_ctx, params| async move { Ok::<_, BoxError>(params) })
}

async fn started(table: ApiTable) -> Application {
    let app = Application::new(Config::default(), "test");
    app.start_api(table, None).await.unwrap();
    app
}

/// Service counting its shutdowns.
#[derive(Debug)]
struct Counter {
    id: String,
    stops: Arc<AtomicUsize>,
    fail: bool,
}

impl Counter {
    fn new(id: &str, stops: &Arc<AtomicUsize>) -> Self {
        Self {
            id: id.into(),
            stops: stops.clone(),
            fail: false,
        }
    }
}

impl Service for Counter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn shutdown(&self) -> Result<(), BoxError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err("disk gone".into());
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

mod dispatch {
    use super::*;

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let app = started(ApiTable::new().with("Foo.Bar", constant(json!("bar")).public())).await;
        for name in ["foo.bar", "Foo.Bar", "FOO.BAR"] {
            let result = app.call_api(name, json!({}), anonymous()).await.unwrap();
            assert_eq!(result, Some(json!("bar")));
        }
        assert_eq!(app.get_api_method("FOO.bar").unwrap().name(), "foo.bar");
    }

    #[tokio::test]
    async fn unknown_method_is_not_found_for_any_session() {
        let app = started(ApiTable::new()).await;
        for session in [anonymous(), signed_in("ann")] {
            let err = app.call_api("nonexistent", json!({}), session).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MethodNotFound);
        }
    }

    #[tokio::test]
    async fn handler_errors_become_server_errors() {
        let failing = ApiMethod::new(|_ctx, _params| async {
            Err::<Value, BoxError>(std::io::Error::other("boom").into())
        })
        .public();
        let app = started(ApiTable::new().with("fail", failing)).await;
        let err = app.call_api("fail", json!({}), anonymous()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(err.message(), "Server Error");
        let record = err.data().unwrap();
        assert_eq!(record["error"], "IoError");
        assert_eq!(record["message"], "boom");
    }

    #[tokio::test]
    async fn application_errors_pass_through() {
        let denied = ApiMethod::new(|_ctx, _params| async {
            Err::<Value, BoxError>(ApplicationError::unauthorized().into())
        })
        .public();
        let app = started(ApiTable::new().with("denied", denied)).await;
        let err = app.call_api("denied", json!({}), anonymous()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn handlers_reach_services_through_context() {
        let method = ApiMethod::new(|ctx, _params| async move {
            let id = ctx.service::<Counter>("counter").map(|c| c.id.clone());
            let missing = ctx.service::<Counter>("absent").is_none();
            Ok::<_, BoxError>(json!({"id": id, "missing": missing, "about": ctx.config().about.name}))
        })
        .public();

        let app = Application::new(Config::default(), "test");
        let stops = Arc::new(AtomicUsize::new(0));
        app.init_service("counter", |_app| async move { Ok::<_, BoxError>(Counter::new("c-1", &stops)) })
            .await
            .unwrap();
        app.start_api(ApiTable::new().with("whoami", method), None)
            .await
            .unwrap();

        let result = app.call_api("whoami", Value::Null, anonymous()).await.unwrap();
        assert_eq!(result, Some(json!({"id": "c-1", "missing": true, "about": "apiary"})));
    }

    #[tokio::test]
    async fn rpc_envelopes() {
        let nothing = ApiMethod::new(|_ctx, _params| async { Ok::<_, BoxError>(()) }).public();
        let table = ApiTable::new()
            .with("ping", constant(json!("pong")).public())
            .with("nothing", nothing)
            .with("private", constant(json!(1)));
        let app = started(table).await;

        let out = app
            .call_rpc_api(r#"{"jsonrpc":"2.0","method":"Ping","id":"x"}"#, anonymous())
            .await;
        assert_eq!(out, r#"{"jsonrpc":"2.0","result":"pong","id":"x"}"#);

        let out: Value = serde_json::from_str(
            &app.call_rpc_api(
                json!([
                    {"jsonrpc": "2.0", "method": "nothing", "id": 1},
                    {"jsonrpc": "2.0", "method": "private", "id": 2},
                    {"jsonrpc": "2.0", "method": "missing", "id": 3},
                ]),
                anonymous(),
            )
            .await,
        )
        .unwrap();
        assert_eq!(out[0]["error"]["code"], -32603);
        assert_eq!(out[1]["error"]["code"], "ForbiddenRequestError");
        assert_eq!(out[2]["error"]["code"], "MethodNotFoundError");
        assert_eq!(out[2]["id"], 3);
    }

    #[tokio::test]
    async fn rpc_api_through_transport_handler() {
        use apiary_transport::RpcHandler;

        let app = started(ApiTable::new().with("ping", constant(json!("pong")).public())).await;
        let out = app
            .call_rpc(r#"{"jsonrpc":"2.0","method":"ping","id":7}"#.into(), anonymous())
            .await;
        assert_eq!(out, r#"{"jsonrpc":"2.0","result":"pong","id":7}"#);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Access and validation
// ─────────────────────────────────────────────────────────────────────────────

mod policy {
    use super::*;

    #[tokio::test]
    async fn private_methods_need_an_authorized_session() {
        let app = started(ApiTable::new().with("secret", constant(json!(42)))).await;

        let err = app.call_api("secret", json!({}), anonymous()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let ok = app.call_api("secret", json!({}), signed_in("ann")).await.unwrap();
        assert_eq!(ok, Some(json!(42)));
    }

    #[tokio::test]
    async fn access_predicate_sees_the_context() {
        let method = constant(json!("ok")).access(Access::check(|ctx| async move {
            Ok::<_, BoxError>(ctx.config().environment == Environment::Production)
        }));
        let app = started(ApiTable::new().with("prod-only", method)).await;
        assert!(app.call_api("prod-only", json!({}), anonymous()).await.is_ok());
    }

    #[tokio::test]
    async fn failing_access_predicate_is_converted() {
        let method = constant(json!("ok")).access(Access::check(|_ctx| async {
            Err::<bool, BoxError>(Failure::new("ValidationError", "no").into())
        }));
        let app = started(ApiTable::new().with("m", method)).await;
        let err = app.call_api("m", json!({}), anonymous()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);
    }

    #[tokio::test]
    async fn access_predicate_also_decides_for_signed_in_sessions() {
        let method = constant(json!("admin")).access(Access::check(|ctx| async move {
            let role = ctx.session().get("role", None);
            Ok::<_, BoxError>(role == Some(json!("admin")))
        }));
        let app = started(ApiTable::new().with("admin.only", method)).await;

        let bob = signed_in("bob");
        assert!(bob.authorized());
        let err = app.call_api("admin.only", json!({}), bob).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let admin = signed_in("alice");
        admin.set("role", json!("admin"));
        let result = app.call_api("admin.only", json!({}), admin).await.unwrap();
        assert_eq!(result, Some(json!("admin")));
    }

    #[tokio::test]
    async fn signed_in_sessions_reach_private_and_public_methods() {
        let table = ApiTable::new()
            .with("private", constant(json!(1)))
            .with("public", constant(json!(2)).public());
        let app = started(table).await;
        assert_eq!(app.call_api("private", json!({}), signed_in("bob")).await.unwrap(), Some(json!(1)));
        assert_eq!(app.call_api("public", json!({}), signed_in("bob")).await.unwrap(), Some(json!(2)));
        assert_eq!(app.call_api("public", json!({}), anonymous()).await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn validator_replaces_params() {
        let method = echo().public().validate(|params, _ctx| async move {
            let n = params["n"].as_i64().unwrap_or(0);
            Ok::<_, BoxError>(json!({"n": n * 2}))
        });
        let app = started(ApiTable::new().with("double", method)).await;
        let result = app.call_api("double", json!({"n": 21}), anonymous()).await.unwrap();
        assert_eq!(result, Some(json!({"n": 42})));
    }

    #[tokio::test]
    async fn validation_failures_are_invalid_params() {
        let method = echo().public().validate(|_params, _ctx| async {
            Err::<Value, BoxError>(
                Failure::new("ValidationError", "n must be positive")
                    .with_details(json!([{"path": "n"}]))
                    .into(),
            )
        });
        let app = started(ApiTable::new().with("checked", method)).await;
        let err = app.call_api("checked", json!({}), anonymous()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);
        assert_eq!(err.message(), "n must be positive");
        assert_eq!(err.data(), Some(&json!([{"path": "n"}])));
    }

    #[tokio::test]
    async fn validation_error_names_are_configurable() {
        let method = echo().public().validate(|_params, _ctx| async {
            Err::<Value, BoxError>(Failure::new("SchemaError", "bad").into())
        });
        let app = started(ApiTable::new().with("checked", method)).await;

        let err = app.call_api("checked", json!({}), anonymous()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerError);

        app.set_validation_errors(["SchemaError"]);
        let err = app.call_api("checked", json!({}), anonymous()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);
    }

    #[tokio::test]
    async fn access_hook_replaces_default_policy() {
        let app = started(ApiTable::new().with("open", constant(json!(1)).public())).await;
        app.set_access_method(Some(access_hook(|_ctx, access| async move {
            Ok::<_, BoxError>(!matches!(access, Access::Public))
        })));
        let err = app.call_api("open", json!({}), signed_in("ann")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        app.set_access_method(None);
        assert!(app.call_api("open", json!({}), anonymous()).await.is_ok());
    }

    #[tokio::test]
    async fn validate_hook_receives_the_method_validator() {
        let method = echo().public().validate(|_params, _ctx| async {
            Ok::<_, BoxError>(json!("from validator"))
        });
        let app = started(ApiTable::new().with("m", method).with("plain", echo().public())).await;
        app.set_validate_method(Some(validate_hook(|_ctx, validator, params| async move {
            Ok::<_, BoxError>(json!({"had_validator": validator.is_some(), "params": params}))
        })));

        let result = app.call_api("m", json!(1), anonymous()).await.unwrap();
        assert_eq!(result, Some(json!({"had_validator": true, "params": 1})));
        let result = app.call_api("plain", json!(2), anonymous()).await.unwrap();
        assert_eq!(result, Some(json!({"had_validator": false, "params": 2})));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn concurrent_shutdown_drains_once() {
        let app = Application::new(Config::default(), "test");
        let stops = Arc::new(AtomicUsize::new(0));
        let observed = Arc::new(AtomicUsize::new(0));

        let service_stops = stops.clone();
        app.init_service("counter", |_app| async move {
            Ok::<_, BoxError>(Counter::new("counter", &service_stops))
        })
        .await
        .unwrap();
        let seen = observed.clone();
        app.on_shutdown(move || async move {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(())
        });
        app.start_api(ApiTable::new().with("ping", constant(json!(1)).public()), None)
            .await
            .unwrap();

        tokio::join!(app.shutdown(), app.shutdown());
        app.shutdown().await;

        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert!(app.finalization());
        assert!(app.services().is_empty());
        assert!(app.get_api_method("ping").is_none());
    }

    #[tokio::test]
    async fn failing_units_do_not_block_siblings() {
        let app = Application::new(Config::default(), "test");
        let stops = Arc::new(AtomicUsize::new(0));

        let (a, b, s) = (stops.clone(), stops.clone(), stops.clone());
        app.init_services([
            ServiceFactory::group([
                ServiceFactory::named("broken", move |_app| async move {
                    Ok::<_, BoxError>(Counter {
                        fail: true,
                        ..Counter::new("broken", &a)
                    })
                }),
                ServiceFactory::named("healthy", move |_app| async move {
                    Ok::<_, BoxError>(Counter::new("healthy", &b))
                }),
            ]),
            ServiceFactory::server(move |_app| async move {
                Ok::<_, BoxError>(Counter::new("server", &s))
            }),
        ])
        .await
        .unwrap();

        assert_eq!(app.services().len(), 2);
        assert_eq!(app.servers().len(), 1);
        assert_eq!(app.servers()[0].id_dyn(), "server");
        assert!(app.get_service("server").is_none());

        app.shutdown().await;
        assert_eq!(stops.load(Ordering::SeqCst), 3);
        assert!(app.servers().is_empty());
    }

    #[tokio::test]
    async fn observer_failures_are_not_fatal() {
        let app = Application::new(Config::default(), "test");
        let stops = Arc::new(AtomicUsize::new(0));
        let service_stops = stops.clone();
        app.init_service("counter", |_app| async move {
            Ok::<_, BoxError>(Counter::new("counter", &service_stops))
        })
        .await
        .unwrap();
        app.on_shutdown(|| async { Err::<(), BoxError>("observer failed".into()) });

        app.shutdown().await;
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn registries_freeze_at_start() {
        let app = started(ApiTable::new()).await;
        assert!(app.is_frozen());

        let stops = Arc::new(AtomicUsize::new(0));
        let err = app
            .init_service("late", |_app| async move { Ok::<_, BoxError>(Counter::new("late", &stops)) })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Frozen));
        assert!(matches!(
            app.start_api(ApiTable::new(), None).await,
            Err(AppError::Frozen)
        ));
    }

    #[tokio::test]
    async fn factory_failures_propagate() {
        let app = Application::new(Config::default(), "test");
        let err = app
            .init_service("db", |_app| async { Err::<Counter, BoxError>("connection refused".into()) })
            .await
            .unwrap_err();
        match err {
            AppError::Factory { name, source } => {
                assert_eq!(name, "db");
                assert_eq!(source.to_string(), "connection refused");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(app.get_service("db").is_none());
    }

    #[tokio::test]
    async fn factories_receive_the_application() {
        let app = Application::new(Config::default().with_extra("pool", json!(4)), "test");
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = app
            .init_service("sized", |app| async move {
                let pool = app.config().get("pool").and_then(Value::as_u64).unwrap_or(0);
                Ok::<_, BoxError>(Counter::new(&format!("pool-{pool}"), &stops))
            })
            .await
            .unwrap();
        assert_eq!(counter.id(), "pool-4");
        assert_eq!(app.get_service("sized").unwrap().id_dyn(), "pool-4");
    }

    #[tokio::test]
    async fn ready_resolves_after_start() {
        let app = Application::new(Config::default(), "test");
        let waiter = tokio::spawn({
            let app = app.clone();
            async move { app.ready().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        app.start_api(ApiTable::new(), None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        // Already ready: resolves immediately.
        app.ready().await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Static files
// ─────────────────────────────────────────────────────────────────────────────

mod statics {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn loads_nested_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        std::fs::write(dir.path().join("css/site.css"), "body{}").unwrap();

        let app = Application::new(Config::default(), "test");
        app.start_api(ApiTable::new(), Some(dir.path())).await.unwrap();

        assert_eq!(app.get_static_file("/index.html").unwrap().as_ref(), b"<h1>hi</h1>");
        assert_eq!(app.get_static_file("/css/site.css").unwrap().as_ref(), b"body{}");
        assert!(app.get_static_file("/missing").is_none());
    }

    #[tokio::test]
    async fn missing_directory_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(Config::default(), "test");
        app.start_api(ApiTable::new(), Some(&dir.path().join("absent")))
            .await
            .unwrap();
        assert!(app.get_static_file("/index.html").is_none());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Method table and configuration
// ─────────────────────────────────────────────────────────────────────────────

mod table {
    use super::*;
    use std::path::Path;

    #[test]
    fn names_derive_from_module_paths() {
        assert_eq!(method_name(Path::new("users/getProfile.rs")), "users.getprofile");
        assert_eq!(method_name(Path::new("healthcheck.rs")), "healthcheck");
        assert_eq!(method_name(Path::new("a/b/C")), "a.b.c");
    }

    #[test]
    fn mount_skips_test_modules() {
        let mut table = ApiTable::new();
        assert!(table.mount("users/getProfile.rs", echo()));
        assert!(!table.mount("users/profile_test.rs", echo()));
        assert!(!table.mount("users/profile.test.rs", echo()));
        assert!(!table.mount("tests/users.rs", echo()));
        assert!(!table.mount("README.md", echo()));
        assert_eq!(table.names(), vec!["users.getprofile"]);
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let table = ApiTable::new()
            .with("dup", constant(json!(1)).public())
            .with("DUP", constant(json!(2)).public());
        assert_eq!(table.len(), 1);
        let app = started(table).await;
        assert_eq!(app.call_api("dup", json!({}), anonymous()).await.unwrap(), Some(json!(2)));
    }

    #[test]
    fn logger_levels_follow_environment() {
        assert_eq!(LoggerConfig::for_environment(Environment::Development).filter_directive(), "debug");
        assert_eq!(LoggerConfig::for_environment(Environment::Production).filter_directive(), "info");
        assert_eq!("dev".parse::<Environment>(), Ok(Environment::Development));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn config_keeps_extra_keys() {
        let config: Config = serde_json::from_value(json!({
            "about": {"name": "svc", "description": "Service", "version": "2.0.0"},
            "domain": "http://localhost:9000",
            "smtp": {"host": "mail"},
        }))
        .unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.get("smtp"), Some(&json!({"host": "mail"})));
        assert_eq!(apiary_server::config::resolve_domain(Some(9000)), "http://localhost:9000");
    }
}
