//! End-to-end tests: a real server on an ephemeral port and real clients

use staffpulse_client::{
    ClientConfig, ConnectionManager, ConnectionState, Credentials, DisconnectReason, Listeners,
    WsConnector,
};
use staffpulse_core::{
    LeaveStatus, LeaveStatusChanged, Priority, PrincipalId, SystemAnnouncement,
    CLOSE_SERVER_DISCONNECT,
};
use staffpulse_server::{
    run_server, AppState, DomainTrigger, ServerConfig, StaticTokenResolver, TokenGrant,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let config = ServerConfig {
            tokens: vec![grant("tok-alice", "u1"), grant("tok-bob", "u2")],
            ..ServerConfig::default()
        };
        let resolver = Arc::new(StaticTokenResolver::new(config.tokens.clone()));
        let state = AppState::new(config, resolver);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let server_state = state.clone();
        tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            run_server(server_state, listener, shutdown).await.unwrap();
        });

        Self {
            addr,
            state,
            shutdown: Some(tx),
        }
    }

    fn client(&self) -> ConnectionManager {
        let config = ClientConfig::builder()
            .url(format!("ws://{}/ws", self.addr))
            .base_delay_ms(50)
            .max_attempts(2)
            .build();
        ConnectionManager::start(config, WsConnector, Listeners::default()).unwrap()
    }

    async fn wait_online(&self, count: usize) {
        timeout(WAIT, async {
            while self.state.registry.online_count() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn grant(token: &str, principal: &str) -> TokenGrant {
    TokenGrant {
        token: token.to_string(),
        principal: principal.to_string(),
    }
}

async fn wait_state(manager: &ConnectionManager, state: ConnectionState) {
    let mut rx = manager.status_receiver();
    let _ = timeout(WAIT, rx.wait_for(|status| status.state == state))
        .await
        .unwrap()
        .unwrap();
}

fn leave_approved(employee: &str) -> LeaveStatusChanged {
    LeaveStatusChanged {
        leave_id: "L-42".to_string(),
        employee_id: employee.to_string(),
        status: LeaveStatus::Approved,
        approved_by: "manager-1".to_string(),
        timestamp: chrono::Utc::now(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_leave_update_reaches_only_its_user() {
    let server = TestServer::start().await;

    let alice = server.client();
    let bob = server.client();

    let (alice_tx, mut alice_leaves) = mpsc::unbounded_channel();
    alice.listeners().on_leave_update(move |change| {
        let _ = alice_tx.send(change.clone());
    });
    let (bob_tx, mut bob_leaves) = mpsc::unbounded_channel();
    bob.listeners().on_leave_update(move |change| {
        let _ = bob_tx.send(change.clone());
    });
    let (announce_tx, mut bob_announcements) = mpsc::unbounded_channel();
    bob.listeners().on_system_announcement(move |a| {
        let _ = announce_tx.send(a.id.clone());
    });

    alice.connect(Credentials::new("tok-alice").with_user("u1"));
    bob.connect(Credentials::new("tok-bob").with_user("u2"));
    wait_state(&alice, ConnectionState::Connected).await;
    wait_state(&bob, ConnectionState::Connected).await;
    server.wait_online(2).await;

    let change = leave_approved("u1");
    let report = server
        .state
        .dispatcher
        .raise(DomainTrigger::LeaveDecided(change.clone()));
    // The personal event plus the dashboard summary
    assert_eq!(report.events, 2);
    assert!(report.delivered >= 1);

    let received = timeout(WAIT, alice_leaves.recv()).await.unwrap().unwrap();
    assert_eq!(received, change);

    // Bob's socket is ordered: once the broadcast arrives, nothing earlier is in flight
    server
        .state
        .dispatcher
        .raise(DomainTrigger::SystemAnnouncement(SystemAnnouncement {
            id: "A-1".to_string(),
            title: "Maintenance".to_string(),
            message: "Tonight".to_string(),
            priority: Priority::Low,
            timestamp: chrono::Utc::now(),
            target_roles: None,
            target_users: None,
        }));
    let announced = timeout(WAIT, bob_announcements.recv()).await.unwrap().unwrap();
    assert_eq!(announced, "A-1");

    assert!(bob_leaves.try_recv().is_err());
    assert!(alice_leaves.try_recv().is_err());

    alice.teardown().await;
    bob.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_presence_follows_first_and_last_connection() {
    let server = TestServer::start().await;

    let bob = server.client();
    let (presence_tx, mut alice_presence) = mpsc::unbounded_channel();
    bob.listeners().on_user_presence(move |presence| {
        if presence.user_id == "u1" {
            let _ = presence_tx.send((presence.online, presence.online_count));
        }
    });
    bob.connect(Credentials::new("tok-bob").with_user("u2"));
    wait_state(&bob, ConnectionState::Connected).await;
    server.wait_online(1).await;

    let first_tab = server.client();
    first_tab.connect(Credentials::new("tok-alice").with_user("u1"));
    wait_state(&first_tab, ConnectionState::Connected).await;
    let online = timeout(WAIT, alice_presence.recv()).await.unwrap().unwrap();
    assert_eq!(online, (true, 2));

    // A second tab and the first tab's departure are both silent
    let second_tab = server.client();
    second_tab.connect(Credentials::new("tok-alice").with_user("u1"));
    wait_state(&second_tab, ConnectionState::Connected).await;
    server.wait_online(3).await;

    first_tab.disconnect();
    server.wait_online(2).await;

    second_tab.disconnect();
    server.wait_online(1).await;

    // Bob's socket is ordered, so any stray event would arrive before this one
    let offline = timeout(WAIT, alice_presence.recv()).await.unwrap().unwrap();
    assert_eq!(offline, (false, 1));
    assert!(alice_presence.try_recv().is_err());

    bob.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bad_token_is_rejected_without_retry() {
    let server = TestServer::start().await;
    let mallory = server.client();

    mallory.connect(Credentials::new("tok-mallory"));
    wait_state(&mallory, ConnectionState::Closed).await;

    assert_eq!(mallory.status().reason, Some(DisconnectReason::Rejected));
    assert!(!mallory.status().requires_refresh());
    assert_eq!(server.state.registry.online_count(), 0);
    assert_eq!(server.state.metrics.snapshot().rejected, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_eviction_closes_and_requires_refresh() {
    let server = TestServer::start().await;
    let bob = server.client();

    bob.connect(Credentials::new("tok-bob").with_user("u2"));
    wait_state(&bob, ConnectionState::Connected).await;
    server.wait_online(1).await;

    let closed = server.state.registry.evict(
        &PrincipalId::from("u2"),
        CLOSE_SERVER_DISCONNECT,
        "disconnected by server",
    );
    assert_eq!(closed, 1);

    wait_state(&bob, ConnectionState::Closed).await;
    assert_eq!(bob.status().reason, Some(DisconnectReason::ServerClosed));
    assert!(bob.status().requires_refresh());
    server.wait_online(0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_voluntary_disconnect_removes_connection() {
    let server = TestServer::start().await;
    let alice = server.client();

    alice.connect(Credentials::new("tok-alice").with_user("u1"));
    wait_state(&alice, ConnectionState::Connected).await;
    server.wait_online(1).await;

    alice.disconnect();
    wait_state(&alice, ConnectionState::Closed).await;
    server.wait_online(0).await;
    assert_eq!(server.state.registry.room_count(), 0);
}
