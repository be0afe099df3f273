//! Integration tests for the session server and its clients
//!
//! Every test runs a real server on loopback ephemeral ports and talks to it
//! through the client library.

use client::network::{ClientError, HeartbeatStream, SessionClient};
use server::config::Config;
use server::game::SharedGameState;
use server::Server;
use shared::{Message, PlayerMap, ServerMessage, UdpConnection, WireFormat};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(150);

struct Running {
    udp: SocketAddr,
    tcp: SocketAddr,
    format: WireFormat,
    state: Arc<SharedGameState>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<usize>,
}

impl Running {
    async fn start(config: Config) -> Self {
        let format = config.wire_format;
        let server = Server::bind(&config).await.unwrap();
        let udp = server.udp_addr().unwrap();
        let tcp = server.tcp_addr().unwrap();
        let state = server.state();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve(async move {
            let _ = stopped.await;
        }));
        Self {
            udp,
            tcp,
            format,
            state,
            stop,
            task,
        }
    }

    async fn local() -> Self {
        Self::start(Config::local()).await
    }

    async fn client(&self) -> SessionClient {
        SessionClient::connect(self.udp, self.format).await.unwrap()
    }

    /// Stops the server and returns how many handlers failed.
    async fn shutdown(self) -> usize {
        let _ = self.stop.send(());
        tokio::time::timeout(WAIT, self.task).await.unwrap().unwrap()
    }
}

async fn next(client: &SessionClient) -> ServerMessage {
    client.recv_timeout(WAIT).await.unwrap()
}

async fn players(client: &SessionClient) -> (u64, PlayerMap, bool) {
    match next(client).await {
        ServerMessage::UpdatingPlayers {
            update_id,
            players,
            resending,
        } => (update_id, players, resending),
        other => panic!("Expected player update, got {:?}", other),
    }
}

async fn is_quiet(client: &SessionClient) -> bool {
    matches!(
        client.recv_timeout(QUIET).await,
        Err(ClientError::Timeout(_))
    )
}

/// SESSION LIFECYCLE TESTS
mod session_tests {
    use super::*;

    /// Two clients join, see each other and get to move; one leaves and the
    /// other is frozen again.
    #[tokio::test]
    async fn two_clients_join_and_leave() {
        let server = Running::local().await;

        let a = server.client().await;
        assert_ok!(a.send_ready(None).await);
        let (_, seen_by_a, _) = players(&a).await;
        assert!(seen_by_a.is_empty());
        assert!(is_quiet(&a).await);

        let b = server.client().await;
        assert_ok!(b.send_ready(None).await);

        let (_, seen_by_a, _) = players(&a).await;
        assert_eq!(seen_by_a.keys().cloned().collect::<Vec<_>>(), vec![b.id().to_string()]);
        assert_eq!(next(&a).await, ServerMessage::ClientCanMove);

        let (_, seen_by_b, _) = players(&b).await;
        assert_eq!(seen_by_b.keys().cloned().collect::<Vec<_>>(), vec![a.id().to_string()]);
        assert_eq!(next(&b).await, ServerMessage::ClientCanMove);

        assert_ok!(b.disconnect().await);
        let (_, seen_by_a, _) = players(&a).await;
        assert!(seen_by_a.is_empty());
        assert_eq!(next(&a).await, ServerMessage::ClientCannotMove);
        assert_eq!(server.state.len().await, 1);

        assert_eq!(server.shutdown().await, 0);
    }

    /// Local data updates the stored pose and the other clients see it.
    #[tokio::test]
    async fn local_data_is_relayed() {
        let server = Running::local().await;
        let a = server.client().await;
        a.send_ready(None).await.unwrap();
        players(&a).await;
        let b = server.client().await;
        b.send_ready(None).await.unwrap();
        players(&a).await;
        next(&a).await;
        players(&b).await;
        next(&b).await;

        let mut pose = shared::Player::spawn_for_slot(1);
        pose.position.shift_x(10.0);
        assert_ok!(b.send_local_data(pose.clone()).await);

        let (_, seen_by_a, _) = players(&a).await;
        assert_eq!(seen_by_a.get(&b.id().to_string()), Some(&pose));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn slots_are_capped_and_recycled() {
        let server = Running::local().await;
        let mut clients = Vec::new();
        let mut slots = Vec::new();

        for _ in 0..5 {
            let client = server.client().await;
            slots.push(client.slot());
            client.send_ready(None).await.unwrap();
            players(&client).await;
            clients.push(client);
        }

        assert_eq!(slots, vec![Some(0), Some(1), Some(2), Some(3), None]);
        assert_eq!(server.state.len().await, 4);

        // Four players are present, but the slot-less client may not move.
        let spectator = clients.last().unwrap();
        assert!(is_quiet(spectator).await);

        let first = clients.remove(0);
        first.disconnect().await.unwrap();
        // The last client still sees the disconnect broadcast, which proves it ran.
        let spectator = clients.last().unwrap();
        loop {
            match next(spectator).await {
                ServerMessage::UpdatingPlayers { players, .. } if players.len() == 3 => break,
                ServerMessage::ClientCanMove => panic!("Spectator was told it can move"),
                _ => {}
            }
        }

        let late = server.client().await;
        assert_eq!(late.slot(), Some(0));

        server.shutdown().await;
    }
}

/// RESEND TESTS
mod resend_tests {
    use super::*;

    #[tokio::test]
    async fn resends_are_identical() {
        let server = Running::local().await;
        let a = server.client().await;
        let b = server.client().await;
        a.send_ready(None).await.unwrap();
        players(&a).await;
        b.send_ready(None).await.unwrap();
        let (update_id, original, _) = players(&a).await;
        assert_eq!(next(&a).await, ServerMessage::ClientCanMove);

        a.request_update(update_id).await.unwrap();
        let (first_id, first, first_resend) = players(&a).await;
        a.request_update(update_id).await.unwrap();
        let (second_id, second, second_resend) = players(&a).await;

        assert_eq!((first_id, second_id), (update_id, update_id));
        assert!(first_resend && second_resend);
        assert_eq!(first, original);
        assert_eq!(first, second);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_update_goes_unanswered() {
        let server = Running::local().await;
        let a = server.client().await;
        a.send_ready(None).await.unwrap();
        players(&a).await;

        a.request_update(9_999).await.unwrap();
        assert!(is_quiet(&a).await);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn evicted_update_goes_unanswered() {
        let server = Running::start(Config {
            history_capacity: 2,
            ..Config::local()
        })
        .await;
        let a = server.client().await;
        a.send_ready(None).await.unwrap();
        let (oldest, _, _) = players(&a).await;
        for _ in 0..3 {
            a.send_ready(None).await.unwrap();
            players(&a).await;
        }

        a.request_update(oldest).await.unwrap();
        assert!(is_quiet(&a).await);

        server.shutdown().await;
    }
}

/// FAILURE HANDLING TESTS
mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn malformed_datagram_is_skipped() {
        let server = Running::local().await;
        let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(b"definitely not a message", server.udp).await.unwrap();
        raw.send_to(&[], server.udp).await.unwrap();

        let a = server.client().await;
        assert_ok!(a.send_ready(None).await);
        players(&a).await;

        assert_eq!(server.shutdown().await, 0);
    }

    /// An unreachable advertised port stops the session handler, but the
    /// heartbeat keeps running until shutdown.
    #[tokio::test]
    async fn dial_failure_stops_only_the_session_handler() {
        let server = Running::start(Config {
            heartbeat_ms: 60_000,
            ..Config::local()
        })
        .await;
        let raw = UdpConnection::bind("127.0.0.1:0", WireFormat::Json).await.unwrap();
        let bad = Message::FromClient(shared::ClientMessage::SendingUdpPort {
            udp_port: "0".into(),
        });
        raw.write_to(&bad, server.udp).await.unwrap();

        let unreachable = SessionClient::connect_with(server.udp, WireFormat::Json, 1, QUIET).await;
        assert!(matches!(assert_err!(unreachable), ClientError::Timeout(_)));

        let heartbeat = HeartbeatStream::connect(server.tcp, WireFormat::Json).await.unwrap();
        assert_ok!(heartbeat.first_ping(QUIET).await);

        assert_eq!(server.shutdown().await, 1);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_binding() {
        let result = Server::bind(&Config {
            heartbeat_ms: 0,
            ..Config::local()
        })
        .await;
        assert!(matches!(result, Err(server::error::ServerError::Config(_))));
    }

    /// `run` is the binary's only validation step, so it must fail fast.
    #[tokio::test]
    async fn run_rejects_invalid_config_without_waiting_for_shutdown() {
        let config = Config {
            tcp_port: 7000,
            udp_port: 7000,
            ..Config::local()
        };
        let result = tokio::time::timeout(WAIT, server::run(config, std::future::pending()))
            .await
            .unwrap();
        assert!(matches!(result, Err(server::error::ServerError::Config(_))));
    }
}

/// HEARTBEAT TESTS
mod heartbeat_tests {
    use super::*;

    #[tokio::test]
    async fn heartbeat_greets_and_closes_on_shutdown() {
        let server = Running::start(Config {
            heartbeat_ms: 60_000,
            ..Config::local()
        })
        .await;

        let heartbeat = HeartbeatStream::connect(server.tcp, WireFormat::Json).await.unwrap();
        assert_ok!(heartbeat.first_ping(QUIET).await);
        let drained = tokio::spawn(heartbeat.run());

        assert_eq!(server.shutdown().await, 0);
        let result = tokio::time::timeout(WAIT, drained).await.unwrap().unwrap();
        assert_ok!(result);
    }
}

/// WIRE FORMAT TESTS
mod wire_format_tests {
    use super::*;

    #[tokio::test]
    async fn bincode_session_end_to_end() {
        let server = Running::start(Config {
            wire_format: WireFormat::Bincode,
            ..Config::local()
        })
        .await;

        let a = server.client().await;
        a.send_ready(None).await.unwrap();
        players(&a).await;
        let b = server.client().await;
        b.send_ready(None).await.unwrap();

        let (_, seen_by_b, resending) = players(&b).await;
        assert!(!resending);
        let seen = seen_by_b.get(&a.id().to_string()).unwrap();
        assert_eq!(seen.colour, shared::PlayerColour::Blue);
        assert_eq!(next(&b).await, ServerMessage::ClientCanMove);

        server.shutdown().await;
    }
}
