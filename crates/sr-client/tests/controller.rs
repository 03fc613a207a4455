//! Command surface tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use sr_client::{ActivityLevel, ClientState, Command, Controller};
use sr_core::traits::SessionHandle;
use sr_core::{ConnectionStatus, ProxyEngine, SrError};

use common::{sample_servers, test_config, FakePrivileges, MockEngine};

fn controller(engine: &Arc<MockEngine>) -> Arc<Controller> {
    *engine.catalog.lock() = sample_servers();
    let dyn_engine: Arc<dyn ProxyEngine> = engine.clone();
    let mut config = test_config();
    config.subscription_url = Some("https://sub.example.com/feed".into());
    Controller::new(config, dyn_engine, Arc::new(FakePrivileges(false)))
}

fn errors(state: &ClientState) -> Vec<String> {
    state
        .activity
        .lines()
        .into_iter()
        .filter(|line| line.level == ActivityLevel::Error)
        .map(|line| line.message)
        .collect()
}

async fn wait_for(state: &ClientState, status: ConnectionStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.read().session.status != status {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("status never reached");
}

#[tokio::test]
async fn test_rejected_command_logs_one_line() {
    let engine = MockEngine::new();
    let controller = controller(&engine);

    controller.dispatch(Command::Connect(3));
    let errors = errors(controller.state());
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Connect failed: Invalid selection"));
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_refresh_loads_catalog() {
    let engine = MockEngine::new();
    let controller = controller(&engine);

    let count = controller.refresh_catalog().await.unwrap();
    assert_eq!(count, 4);

    let snapshot = controller.state().snapshot();
    assert_eq!(snapshot.servers.len(), 4);
    assert_eq!(snapshot.selected().unwrap().name, "Tokyo");
    assert!(snapshot
        .activity
        .iter()
        .any(|line| line.message == "Loaded 4 servers"));
    assert!(!controller.state().read().refresh_running);
}

#[tokio::test]
async fn test_refresh_without_subscription() {
    let engine = MockEngine::new();
    let dyn_engine: Arc<dyn ProxyEngine> = engine.clone();
    let controller = Controller::new(test_config(), dyn_engine, Arc::new(FakePrivileges(false)));

    let err = controller
        .execute(Command::RefreshCatalog)
        .await
        .unwrap_err();
    assert!(matches!(err, SrError::Config(_)));

    controller.dispatch(Command::RefreshCatalog);
    assert_eq!(errors(controller.state()).len(), 1);
    assert_eq!(engine.count("fetch_catalog"), 0);
}

#[tokio::test]
async fn test_set_subscription_refreshes() {
    let engine = MockEngine::new();
    let dyn_engine: Arc<dyn ProxyEngine> = engine.clone();
    *engine.catalog.lock() = sample_servers();
    let controller = Controller::new(test_config(), dyn_engine, Arc::new(FakePrivileges(false)));

    controller
        .execute(Command::SetSubscription("  https://sub.example.com/new  ".into()))
        .await
        .unwrap();

    let shared = controller.state().read();
    assert_eq!(
        shared.subscription_url.as_deref(),
        Some("https://sub.example.com/new")
    );
    assert_eq!(shared.catalog.len(), 4);
}

#[tokio::test]
async fn test_connect_selected_switches_server() {
    let engine = MockEngine::new();
    let controller = controller(&engine);
    controller.refresh_catalog().await.unwrap();

    controller.execute(Command::ConnectSelected).await.unwrap();
    controller.dispatch(Command::MoveSelection(1));

    let snapshot = controller.state().snapshot();
    assert_eq!(snapshot.selected().unwrap().name, "Osaka");
    assert_eq!(snapshot.active_server.as_ref().unwrap().name, "Tokyo");
    assert!(snapshot.selection_pending());

    controller.execute(Command::ConnectSelected).await.unwrap();
    let snapshot = controller.state().snapshot();
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(snapshot.active_server.as_ref().unwrap().name, "Osaka");
    assert_eq!(engine.ended(), vec![SessionHandle("session-1".into())]);
}

#[tokio::test]
async fn test_connect_selected_on_active_server_is_noop() {
    let engine = MockEngine::new();
    let controller = controller(&engine);
    controller.refresh_catalog().await.unwrap();

    controller.execute(Command::ConnectSelected).await.unwrap();
    controller.execute(Command::ConnectSelected).await.unwrap();
    assert_eq!(engine.count("begin_session"), 1);
    assert!(errors(controller.state()).is_empty());
}

#[tokio::test]
async fn test_dispatch_runs_in_background() {
    let engine = MockEngine::new();
    let controller = controller(&engine);
    controller.refresh_catalog().await.unwrap();

    controller.dispatch(Command::Connect(2));
    wait_for(controller.state(), ConnectionStatus::Connected).await;
    assert_eq!(
        controller.state().snapshot().active_server.unwrap().name,
        "Frankfurt"
    );

    controller.dispatch(Command::Disconnect);
    wait_for(controller.state(), ConnectionStatus::Disconnected).await;
    assert!(errors(controller.state()).is_empty());
}

#[tokio::test]
async fn test_toggle_without_privilege_rejected_at_dispatch() {
    let engine = MockEngine::new();
    let controller = controller(&engine);

    controller.dispatch(Command::ToggleRoutingMode);
    let errors = errors(controller.state());
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Permission denied"));
}

#[tokio::test]
async fn test_task_panic_reported_once() {
    let engine = MockEngine::new();
    let controller = controller(&engine);

    let handle = controller
        .supervisor()
        .spawn("exploding task", async {
            panic!("boom");
        });
    assert!(handle.await.unwrap().is_none());

    let errors = errors(controller.state());
    assert_eq!(errors, vec!["Task 'exploding task' failed: boom".to_string()]);
}

#[tokio::test]
async fn test_quit_disconnects_and_cancels() {
    let engine = MockEngine::new();
    let controller = controller(&engine);
    controller.refresh_catalog().await.unwrap();
    controller.execute(Command::Connect(0)).await.unwrap();

    let cancel = controller.cancel_token();
    controller.execute(Command::Quit).await.unwrap();

    assert!(cancel.is_cancelled());
    assert_eq!(
        controller.state().read().session.status,
        ConnectionStatus::Disconnected
    );
    assert_eq!(engine.count("end_session"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_quit_during_connect_ends_session() {
    let engine = MockEngine::new();
    let controller = controller(&engine);
    controller.refresh_catalog().await.unwrap();
    engine.set_begin_delay(Duration::from_secs(2));

    controller.dispatch(Command::Connect(0));
    wait_for(controller.state(), ConnectionStatus::Connecting).await;

    let cancel = controller.cancel_token();
    controller.execute(Command::Quit).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(cancel.is_cancelled());
    assert_eq!(
        controller.state().read().session.status,
        ConnectionStatus::Disconnected
    );
    assert_eq!(engine.count("begin_session"), 1);
    assert_eq!(engine.ended(), vec![SessionHandle("session-1".into())]);
}

#[tokio::test]
async fn test_connect_after_quit_is_refused() {
    let engine = MockEngine::new();
    let controller = controller(&engine);
    controller.refresh_catalog().await.unwrap();
    controller.execute(Command::Quit).await.unwrap();

    let err = controller.execute(Command::Connect(0)).await.unwrap_err();
    assert!(matches!(err, SrError::InvalidState(_)));
    assert_eq!(engine.count("begin_session"), 0);
}

#[tokio::test]
async fn test_engine_version_logged() {
    let engine = MockEngine::new();
    let controller = controller(&engine);

    let handle = controller.report_engine_version();
    assert_eq!(handle.await.unwrap(), Some(()));

    assert!(controller
        .state()
        .activity
        .lines()
        .iter()
        .any(|line| line.message == "Engine version: mock-1.0"));
    assert!(errors(controller.state()).is_empty());
}
