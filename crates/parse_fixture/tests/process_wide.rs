//! The process-wide controller is shared, so everything touching it lives in
//! this single test.

use parse_fixture::{
    drop_db, parse_server_state, parse_server_storage, start_parse_server, stop_parse_server,
    FixtureError, FixtureOptions,
};

#[tokio::test]
async fn process_wide_helpers_follow_start_stop_lifecycle() {
    assert!(matches!(drop_db().await, Err(FixtureError::NotRunning)));
    assert!(matches!(
        stop_parse_server().await,
        Err(FixtureError::NotRunning)
    ));
    assert!(parse_server_state().await.is_none());

    let options = FixtureOptions {
        database_uri: Some("sqlite::memory:".to_string()),
        port: Some(0),
        ..FixtureOptions::default()
    };
    let snapshot = start_parse_server(options.clone())
        .await
        .expect("start");
    assert_eq!(parse_server_state().await, Some(snapshot.clone()));
    assert!(matches!(
        start_parse_server(options).await,
        Err(FixtureError::AlreadyRunning)
    ));

    let storage = parse_server_storage().await.expect("storage");
    storage.health_check().await.expect("live connection");
    drop_db().await.expect("drop");

    stop_parse_server().await.expect("stop");
    assert!(parse_server_state().await.is_none());
}
