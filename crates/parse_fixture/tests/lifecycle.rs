use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use parse_fixture::{
    DatabaseRuntime, EnvSnapshot, Fixture, FixtureController, FixtureError, FixtureOptions,
    MountPathError, RuntimeError,
};
use reqwest::StatusCode;
use shared::protocol::{CreatedObject, HealthStatus, QueryResults, ServerInfo};

#[derive(Clone, Default)]
struct Events(Arc<Mutex<Vec<&'static str>>>);

impl Events {
    fn push(&self, event: &'static str) {
        self.0.lock().expect("events lock").push(event);
    }

    fn recorded(&self) -> Vec<&'static str> {
        self.0.lock().expect("events lock").clone()
    }
}

struct RecordingRuntime {
    events: Events,
    fail_start: bool,
}

impl RecordingRuntime {
    fn boxed(events: &Events) -> Box<dyn DatabaseRuntime> {
        Box::new(Self {
            events: events.clone(),
            fail_start: false,
        })
    }
}

#[async_trait]
impl DatabaseRuntime for RecordingRuntime {
    async fn start(&mut self) -> Result<(), RuntimeError> {
        if self.fail_start {
            return Err(RuntimeError::Io(std::io::Error::other("mongod crashed")));
        }
        self.events.push("start");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RuntimeError> {
        self.events.push("stop");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

fn sqlite_options() -> FixtureOptions {
    FixtureOptions {
        database_uri: Some("sqlite::memory:".to_string()),
        port: Some(0),
        ..FixtureOptions::default()
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .expect("client")
}

async fn create_object(base_url: &str, app_id: &str) -> reqwest::Response {
    client()
        .post(format!("{base_url}/classes/GameScore"))
        .header("X-Parse-Application-Id", app_id)
        .json(&serde_json::json!({ "score": 1 }))
        .send()
        .await
        .expect("request")
}

#[tokio::test]
async fn started_fixture_serves_health_and_stops_cleanly() {
    let fixture = Fixture::start(sqlite_options(), &EnvSnapshot::default())
        .await
        .expect("start");
    let base_url = fixture.local_base_url();
    assert!(base_url.ends_with("/1"));
    assert_eq!(fixture.options().database_uri, "sqlite::memory:");

    let health: HealthStatus = client()
        .get(format!("{base_url}/health"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(health.status, "ok");

    fixture.stop().await.expect("stop");

    let after = client().get(format!("{base_url}/health")).send().await;
    assert!(after.is_err(), "listener should be closed after stop");
}

#[tokio::test]
async fn custom_mount_path_serves_under_prefix() {
    let options = FixtureOptions {
        mount_path: Some("/api".to_string()),
        ..sqlite_options()
    };
    let fixture = Fixture::start(options, &EnvSnapshot::default())
        .await
        .expect("start");
    let root = format!("http://127.0.0.1:{}", fixture.local_addr().port());

    let nested = client()
        .get(format!("{root}/api/health"))
        .send()
        .await
        .expect("request");
    assert_eq!(nested.status(), StatusCode::OK);

    let default_path = client()
        .get(format!("{root}/1/health"))
        .send()
        .await
        .expect("request");
    assert_eq!(default_path.status(), StatusCode::NOT_FOUND);

    fixture.stop().await.expect("stop");
}

#[tokio::test]
async fn application_id_and_master_key_propagate_to_server() {
    let options = FixtureOptions {
        app_id: Some("x".to_string()),
        master_key: Some("y".to_string()),
        ..sqlite_options()
    };
    let fixture = Fixture::start(options, &EnvSnapshot::default())
        .await
        .expect("start");
    let base_url = fixture.local_base_url();

    let accepted = create_object(&base_url, "x").await;
    assert_eq!(accepted.status(), StatusCode::CREATED);

    let rejected = create_object(&base_url, "test").await;
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);

    let info: ServerInfo = client()
        .get(format!("{base_url}/serverInfo"))
        .header("X-Parse-Application-Id", "x")
        .header("X-Parse-Master-Key", "y")
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(info.app_id, "x");
    assert_eq!(info.server_url, fixture.server_url());

    fixture.stop().await.expect("stop");
}

#[tokio::test]
async fn reset_data_clears_objects_but_keeps_listener() {
    let fixture = Fixture::start(sqlite_options(), &EnvSnapshot::default())
        .await
        .expect("start");
    let base_url = fixture.local_base_url();
    let addr_before = fixture.local_addr();

    let created = create_object(&base_url, "test").await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let _: CreatedObject = created.json().await.expect("json");
    assert_eq!(fixture.storage().count_objects().await.expect("count"), 1);

    fixture.reset_data().await.expect("reset");

    assert_eq!(fixture.storage().count_objects().await.expect("count"), 0);
    assert_eq!(fixture.local_addr(), addr_before);
    let listed: QueryResults = client()
        .get(format!("{base_url}/classes/GameScore"))
        .header("X-Parse-Application-Id", "test")
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert!(listed.results.is_empty());

    fixture.stop().await.expect("stop");
}

#[tokio::test]
async fn restart_yields_fresh_state() {
    let env = EnvSnapshot::default();
    let first = Fixture::start(sqlite_options(), &env).await.expect("first");
    let first_storage = first.storage().clone();
    assert_eq!(
        create_object(&first.local_base_url(), "test").await.status(),
        StatusCode::CREATED
    );
    first.stop().await.expect("stop first");

    // The old handle is closed along with its fixture.
    assert!(first_storage.health_check().await.is_err());

    let second = Fixture::start(sqlite_options(), &env).await.expect("second");
    assert_eq!(second.storage().count_objects().await.expect("count"), 0);
    second.stop().await.expect("stop second");
}

#[tokio::test]
async fn connect_failure_stops_database_runtime() {
    let events = Events::default();
    let options = FixtureOptions {
        database_uri: Some("postgres://localhost/parse-test".to_string()),
        ..sqlite_options()
    };

    let result =
        Fixture::start_with_runtime(options, &EnvSnapshot::default(), RecordingRuntime::boxed(&events))
            .await;

    assert!(matches!(result, Err(FixtureError::DatabaseConnect { .. })));
    assert_eq!(events.recorded(), vec!["start", "stop"]);
}

#[tokio::test]
async fn bind_failure_rolls_back_connection_and_runtime() {
    let blocker = tokio::net::TcpListener::bind("0.0.0.0:0")
        .await
        .expect("blocker");
    let port = blocker.local_addr().expect("addr").port();
    let events = Events::default();
    let options = FixtureOptions {
        port: Some(port),
        ..sqlite_options()
    };

    let result =
        Fixture::start_with_runtime(options, &EnvSnapshot::default(), RecordingRuntime::boxed(&events))
            .await;

    match result {
        Err(FixtureError::ListenerBind { port: failed, .. }) => assert_eq!(failed, port),
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("bind should fail while the port is taken"),
    }
    assert_eq!(events.recorded(), vec!["start", "stop"]);
}

#[tokio::test]
async fn runtime_start_failure_propagates_without_cleanup() {
    let events = Events::default();
    let runtime = Box::new(RecordingRuntime {
        events: events.clone(),
        fail_start: true,
    });

    let result = Fixture::start_with_runtime(sqlite_options(), &EnvSnapshot::default(), runtime).await;

    assert!(matches!(result, Err(FixtureError::DatabaseStart(_))));
    assert!(events.recorded().is_empty());
}

#[tokio::test]
async fn controller_enforces_single_running_fixture() {
    let controller = FixtureController::new();
    let env = EnvSnapshot::default();
    let events = Events::default();

    assert!(matches!(
        controller.reset_data().await,
        Err(FixtureError::NotRunning)
    ));
    assert!(matches!(controller.stop().await, Err(FixtureError::NotRunning)));
    assert!(controller.snapshot().await.is_none());

    let snapshot = controller
        .start_with_runtime(sqlite_options(), &env, RecordingRuntime::boxed(&events))
        .await
        .expect("start");
    assert!(controller.is_running().await);
    assert_eq!(snapshot.options.app_id, "test");
    assert_eq!(snapshot.database_name, "parse-test");
    assert_eq!(controller.snapshot().await, Some(snapshot.clone()));

    let second = controller.start(sqlite_options(), &env).await;
    assert!(matches!(second, Err(FixtureError::AlreadyRunning)));
    // The live fixture is untouched by the rejected start.
    assert_eq!(controller.snapshot().await, Some(snapshot));

    let storage = controller.storage().await.expect("storage while running");
    storage.health_check().await.expect("live connection");
    controller.reset_data().await.expect("reset");

    controller.stop().await.expect("stop");
    assert!(!controller.is_running().await);
    assert!(controller.snapshot().await.is_none());
    assert_eq!(events.recorded(), vec!["start", "stop"]);

    assert!(matches!(controller.stop().await, Err(FixtureError::NotRunning)));
}

fn current_thread_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

#[test]
fn fixture_stops_after_the_runtime_that_started_it_is_gone() {
    let events = Events::default();
    let first = current_thread_runtime();
    let fixture = first
        .block_on(Fixture::start_with_runtime(
            sqlite_options(),
            &EnvSnapshot::default(),
            RecordingRuntime::boxed(&events),
        ))
        .expect("start");
    drop(first);

    current_thread_runtime().block_on(async {
        assert!(!fixture.is_serving());
        fixture.stop().await.expect("stop");
    });
    assert_eq!(events.recorded(), vec!["start", "stop"]);
}

#[test]
fn controller_discards_fixture_whose_listener_died() {
    let controller = FixtureController::new();
    let env = EnvSnapshot::default();
    let events = Events::default();

    let first = current_thread_runtime();
    first
        .block_on(controller.start_with_runtime(
            sqlite_options(),
            &env,
            RecordingRuntime::boxed(&events),
        ))
        .expect("start");
    drop(first);

    current_thread_runtime().block_on(async {
        assert!(!controller.is_running().await);
        assert!(controller.snapshot().await.is_none());
        assert_eq!(events.recorded(), vec!["start", "stop"]);

        let snapshot = controller
            .start_with_runtime(sqlite_options(), &env, RecordingRuntime::boxed(&events))
            .await
            .expect("restart");
        let health = client()
            .get(format!("{}/health", snapshot.local_base_url))
            .send()
            .await
            .expect("request");
        assert_eq!(health.status(), StatusCode::OK);
        controller.stop().await.expect("stop");
    });
    assert_eq!(events.recorded(), vec!["start", "stop", "start", "stop"]);
}

#[tokio::test]
async fn route_pattern_mount_path_is_rejected_before_database_starts() {
    let events = Events::default();
    let options = FixtureOptions {
        mount_path: Some("/*".to_string()),
        ..sqlite_options()
    };

    let result =
        Fixture::start_with_runtime(options, &EnvSnapshot::default(), RecordingRuntime::boxed(&events))
            .await;

    assert!(matches!(
        result,
        Err(FixtureError::MountPath(MountPathError::Wildcard(_)))
    ));
    assert!(events.recorded().is_empty());
}
