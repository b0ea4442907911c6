//! End-to-end Tests Against the Simulated Service
//!
//! Runs the built-in suites and hand-written sessions over the simulated
//! service with paused time, so latencies and timeouts resolve
//! deterministically.

use std::time::Duration;

use callbridge_core::handlers::{LobbyCreated, LobbyId, LobbyLeft, LobbyList, LobbyType};
use callbridge_core::{
    ConnectionState, HarnessConfig, HarnessError, HarnessResult, LogonDetails, ResultCode,
};
use callbridge_sim::{Identities, SimulatedService, SimulationConfig, Suite};
use tokio::time::Instant;

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn service_with_identities(config: SimulationConfig) -> (SimulatedService, Identities) {
    init_tracing();
    let service = SimulatedService::new(config);
    let identities = Identities::simulated().unwrap();
    identities.register(&service);
    (service, identities)
}

// ----------------------------------------------------------------------------
// Built-in Suites
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_single_user_suite_passes() -> HarnessResult<()> {
    let (service, identities) = service_with_identities(SimulationConfig::default());

    let report = Suite::SingleUser
        .run(&service, &identities, &HarnessConfig::testing())
        .await?;

    assert!(report.is_success(), "{:?}", report);
    assert_eq!(report.passed(), 4);
    assert_eq!(service.lobby_count(), 0);
    assert_eq!(service.stats().lobbies_created, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dual_user_suite_passes_with_high_latency() -> HarnessResult<()> {
    let (service, identities) = service_with_identities(SimulationConfig::high_latency());

    let report = Suite::DualUser
        .run(&service, &identities, &HarnessConfig::testing())
        .await?;

    let order: Vec<&str> = report.outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(
        order,
        vec![
            "primary_creates_lobby",
            "secondary_finds_lobby",
            "secondary_joins_lobby",
            "secondary_leaves_lobby",
            "primary_leaves_lobby",
        ]
    );
    assert!(report.is_success(), "{:?}", report);
    assert_eq!(service.lobby_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rejected_identity_fails_suite_before_any_procedure() {
    init_tracing();
    let service = SimulatedService::default();
    let identities = Identities::simulated().unwrap();
    service.register_account(&LogonDetails::with_login_key("sim-primary", "rotated").unwrap());

    let error = Suite::SingleUser
        .run(&service, &identities, &HarnessConfig::testing())
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        HarnessError::LogonRejected {
            result: ResultCode::InvalidPassword,
            ..
        }
    ));
    assert_eq!(service.stats().requests, 0);
}

#[test]
fn test_suite_catalog() {
    assert_eq!(Suite::from_name("dual-user"), Some(Suite::DualUser));
    assert_eq!(Suite::from_name("triple-user"), None);
    assert_eq!(Suite::DualUser.identities().len(), 2);
    assert_eq!(
        Suite::SingleUser.procedures().unwrap(),
        vec!["create_lobby", "set_lobby_data", "find_lobby", "leave_lobby"]
    );
}

// ----------------------------------------------------------------------------
// Session Behavior
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_sessions_initialize_concurrently() -> HarnessResult<()> {
    let (service, identities) = service_with_identities(SimulationConfig::high_latency());
    let config = HarnessConfig::testing();
    let mut primary = service.session("primary", identities.primary.clone(), config.clone());
    let mut secondary = service.session("secondary", identities.secondary.clone(), config);

    let start = Instant::now();
    tokio::try_join!(primary.initialize(), secondary.initialize())?;
    // two round trips each, overlapped
    assert!(start.elapsed() <= service.latency_bound() * 2);

    assert_eq!(primary.state(), ConnectionState::LoggedOn);
    assert_eq!(secondary.state(), ConnectionState::LoggedOn);

    tokio::try_join!(primary.teardown(), secondary.teardown())?;
    assert_eq!(primary.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_same_identity_twice_is_logged_in_elsewhere() -> HarnessResult<()> {
    let (service, identities) = service_with_identities(SimulationConfig::ideal());
    let config = HarnessConfig::testing();
    let mut first = service.session("first", identities.primary.clone(), config.clone());
    let mut second = service.session("second", identities.primary.clone(), config);

    first.initialize().await?;
    let error = second.initialize().await.unwrap_err();
    assert!(matches!(
        error,
        HarnessError::LogonRejected {
            result: ResultCode::LoggedInElsewhere,
            ..
        }
    ));
    assert_eq!(second.state(), ConnectionState::Connected);

    second.teardown().await?;
    first.teardown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_remote_drop_fails_pending_wait_fast() -> HarnessResult<()> {
    let (service, identities) = service_with_identities(SimulationConfig::ideal());
    let mut primary = service.session("primary", identities.primary.clone(), HarnessConfig::testing());
    primary.initialize().await?;

    let dropper = service.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        dropper.drop_connection("sim-primary");
    });

    let start = Instant::now();
    let error = primary.wait_for::<LobbyCreated, _>(|_| {}).await.unwrap_err();
    assert!(error.is_unexpected_state(), "got {}", error);
    assert!(start.elapsed() < Duration::from_millis(200));
    assert_eq!(primary.state(), ConnectionState::Disconnected);

    // teardown of a dropped session is a no-op
    primary.teardown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_listing_right_after_peer_deletion_drops_session() -> HarnessResult<()> {
    let (service, identities) = service_with_identities(SimulationConfig::racy());
    let config = HarnessConfig::testing();
    let app_id = config.app_id;
    let mut primary = service.session("primary", identities.primary.clone(), config.clone());
    let mut secondary = service.session("secondary", identities.secondary.clone(), config);
    tokio::try_join!(primary.initialize(), secondary.initialize())?;

    secondary.matchmaking().create_lobby(app_id, LobbyType::Public, 2)?;
    let created = secondary.wait_for::<LobbyCreated, _>(|_| {}).await?;
    let lobby_id: LobbyId = created.lobby_id.expect("lobby id");
    secondary.matchmaking().leave_lobby(app_id, lobby_id)?;
    let left = secondary.wait_for::<LobbyLeft, _>(|_| {}).await?;
    assert_eq!(left.result, ResultCode::Ok);

    primary.matchmaking().get_lobby_list(app_id)?;
    let error = primary.wait_for::<LobbyList, _>(|_| {}).await.unwrap_err();
    assert!(matches!(
        error,
        HarnessError::UnexpectedState {
            current: ConnectionState::Disconnected,
            ..
        }
    ));
    assert_eq!(service.stats().sessions_dropped, 1);

    primary.teardown().await?;
    secondary.teardown().await?;
    Ok(())
}
