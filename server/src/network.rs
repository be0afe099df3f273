//! UDP session handler: the server side of the session protocol
//!
//! One task owns the session socket and processes datagrams strictly in the
//! order they are read. Each datagram advances the update counter once and the
//! state as it stands after processing is recorded under the new id, which is
//! what resend requests are served from.

use log::{debug, error, info, trace, warn};
use shared::{
    ClientMessage, Message, Player, PlayerColour, ServerMessage, UdpConnection, WireFormat,
    MIN_PLAYERS_TO_MOVE,
};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::client_manager::{ClientManager, SessionState};
use crate::error::ServerError;
use crate::game::SharedGameState;
use crate::history::UpdateHistory;
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownListener;

/// Which movement directive follows a player broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveGate {
    /// "can move" once enough players are present
    Joined,
    /// "cannot move" once too few players remain
    Left,
}

/// Owns the session socket and everything only the session loop mutates
pub struct SessionHandler {
    socket: UdpConnection,
    state: Arc<SharedGameState>,
    connections: Arc<ConnectionRegistry<UdpConnection>>,
    clients: ClientManager,
    history: UpdateHistory,
    update_id: u64,
    shutdown: ShutdownListener,
}

impl SessionHandler {
    pub fn new(
        socket: UdpConnection,
        state: Arc<SharedGameState>,
        history_capacity: usize,
        shutdown: ShutdownListener,
    ) -> Self {
        Self {
            socket,
            state,
            connections: Arc::new(ConnectionRegistry::new()),
            clients: ClientManager::new(),
            history: UpdateHistory::new(history_capacity),
            update_id: 0,
            shutdown,
        }
    }

    /// Binds the session socket on `addr`
    pub async fn bind(
        addr: &str,
        format: WireFormat,
        state: Arc<SharedGameState>,
        history_capacity: usize,
        shutdown: ShutdownListener,
    ) -> Result<Self, ServerError> {
        let socket = UdpConnection::bind(addr, format)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self::new(socket, state, history_capacity, shutdown))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn connections(&self) -> Arc<ConnectionRegistry<UdpConnection>> {
        Arc::clone(&self.connections)
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn history(&self) -> &UpdateHistory {
        &self.history
    }

    pub fn update_id(&self) -> u64 {
        self.update_id
    }

    /// Runs the read loop until shutdown
    ///
    /// Unreadable datagrams are logged and skipped. The loop only ends early
    /// when a client's advertised address cannot be dialled.
    pub async fn handle(mut self) -> Result<(), ServerError> {
        info!("[UDP] Started session socket on {}", self.local_addr()?);

        loop {
            let received = tokio::select! {
                _ = &mut self.shutdown => {
                    info!("[UDP] Stopping...");
                    break;
                }
                received = self.socket.read_from() => received,
            };

            match received {
                Ok((message, len, from)) => {
                    trace!("[UDP] Read {} bytes from {}: {:?}", len, from, message);
                    self.process(message, from).await?;
                }
                Err(e) if e.is_nothing_read() => continue,
                Err(e) if e.is_closed() => break,
                Err(e) => error!("[UDP] {}", e),
            }
        }

        self.connections.clear().await;
        warn!("[UDP] Closed");
        Ok(())
    }

    /// Applies one decoded datagram from `from`
    ///
    /// The history entry is recorded even when the datagram fails, so ids stay
    /// contiguous.
    pub async fn process(&mut self, message: Message, from: SocketAddr) -> Result<(), ServerError> {
        self.update_id += 1;

        let result = match message {
            Message::FromClient(message) => self.dispatch(message, from).await,
            Message::FromServer(message) => {
                warn!("[UDP] Ignoring {} sent by {}", message.subkind(), from);
                Ok(())
            }
        };

        let snapshot = self.state.snapshot().await;
        self.history.record(self.update_id, snapshot);
        result
    }

    async fn dispatch(&mut self, message: ClientMessage, from: SocketAddr) -> Result<(), ServerError> {
        match message.client_id() {
            Some(id) => debug!("[UDP] {} from {} ({})", message.subkind(), id, from),
            None => debug!("[UDP] {} from {}", message.subkind(), from),
        }
        match message {
            ClientMessage::SendingUdpPort { udp_port } => self.handshake(from, &udp_port).await?,
            ClientMessage::Ready { id, player } => self.ready(id, player).await,
            ClientMessage::SendingLocalData { id, player } => self.local_data(id, player).await,
            ClientMessage::RequestingUpdateId { id, update_id } => self.resend(id, update_id).await,
            ClientMessage::Disconnecting { id } => self.disconnect(id).await,
        }
        Ok(())
    }

    async fn handshake(&mut self, from: SocketAddr, udp_port: &str) -> Result<(), ServerError> {
        let (id, retry) = match self.clients.find_by_addr(from) {
            Some(id) => (id, true),
            None => (Uuid::new_v4(), false),
        };
        let key = id.to_string();

        let existing = self.connections.get(&key).await;
        let reachable = existing
            .as_ref()
            .and_then(|conn| conn.peer_addr().ok())
            .map(|peer| peer.port().to_string() == udp_port.trim())
            .unwrap_or(false);

        if !reachable {
            let conn = UdpConnection::dial(from.ip(), udp_port, self.socket.format())
                .await
                .map_err(|source| ServerError::Dial {
                    from,
                    port: udp_port.to_string(),
                    source,
                })?;
            if existing.is_some() {
                self.connections.remove(&key).await;
            }
            self.connections.upsert(key.clone(), conn).await;
            info!(
                "[UDP] Connected to client's UDP socket at {}:{}. Client ID: {}",
                from.ip(),
                udp_port.trim(),
                id
            );
        } else {
            debug!("[UDP] Handshake retry from {} reuses client ID {}", from, id);
        }
        if !retry {
            self.clients.open(id, from);
        }

        let slot = self
            .clients
            .slot_of(&id)
            .or_else(|| self.clients.peek_next_slot());
        let (spawn, colour) = match slot {
            Some(slot) => (Player::spawn_for_slot(slot).position, PlayerColour::from_slot(slot)),
            None => Default::default(),
        };
        let reply = Message::FromServer(ServerMessage::FirstConnectionInfo {
            id,
            slot,
            spawn,
            colour,
        });

        if let Some(conn) = self.connections.get(&key).await {
            match conn.write(&reply).await {
                Ok(_) => info!("[UDP] Sent initial data to client {}", id),
                Err(e) => error!("[UDP] Couldn't send initial data to client {}: {}", id, e),
            }
        }
        Ok(())
    }

    async fn ready(&mut self, id: Uuid, player: Option<Player>) {
        let key = id.to_string();
        if !self.connections.contains(&key).await {
            warn!("[UDP] Client with id '{}' not found", id);
            return;
        }

        let slot = self.clients.assign_slot(&id);
        if self.clients.state_of(&id) == Some(SessionState::Handshaking) {
            self.clients.transition(&id, SessionState::Ready);
        }

        let player = slot.map(|slot| player.unwrap_or_else(|| Player::spawn_for_slot(slot)));
        self.connect_and_broadcast(&key, player).await;
    }

    async fn local_data(&mut self, id: Uuid, player: Player) {
        let key = id.to_string();
        if !self.connections.contains(&key).await {
            warn!("[UDP] Client with id '{}' not found", id);
            return;
        }

        self.clients.transition(&id, SessionState::Active);
        let player = self.clients.slot_of(&id).map(|_| player);
        self.connect_and_broadcast(&key, player).await;
    }

    /// Stores the sender's player, if it holds a slot, and pushes the new
    /// player set to every connection.
    async fn connect_and_broadcast(&self, key: &str, player: Option<Player>) {
        match player {
            Some(player) => self.state.add_or_update(key, player).await,
            None => debug!("[UDP] Client {} has no slot, broadcasting without it", key),
        }
        self.broadcast_players(MoveGate::Joined).await;
    }

    /// Sends every registered connection the players other than itself
    ///
    /// The registry stays read-locked for the whole fan-out. Only connections
    /// holding a slot are ever told they can move; spectators get the player
    /// set alone.
    async fn broadcast_players(&self, gate: MoveGate) {
        let total = self.state.len().await;
        let view = self.connections.iterate().await;

        for (id, conn) in view.iter() {
            let others = self.state.filter(|key, _| key != id).await;
            if let Err(e) = conn.write(&Message::updating_players(self.update_id, others)).await {
                error!("[UDP] Could not send other player state to {}: {}", id, e);
                continue;
            }

            let seated = Uuid::parse_str(id)
                .map(|uuid| self.clients.slot_of(&uuid).is_some())
                .unwrap_or(false);
            let directive = match gate {
                MoveGate::Joined if seated && total >= MIN_PLAYERS_TO_MOVE => Message::can_move(),
                MoveGate::Left if total < MIN_PLAYERS_TO_MOVE => Message::cannot_move(),
                _ => continue,
            };
            if let Err(e) = conn.write(&directive).await {
                error!("[UDP] Could not send {} to {}: {}", directive.subkind(), id, e);
            }
        }
    }

    async fn resend(&mut self, id: Uuid, update_id: u64) {
        let key = id.to_string();
        let conn = match self.connections.get(&key).await {
            Some(conn) => conn,
            None => {
                warn!("[UDP] Client with id '{}' not found", id);
                return;
            }
        };
        let players = match self.history.get(update_id) {
            Some(snapshot) => snapshot.without(&key),
            None => {
                error!("[UDP] Requested update with id '{}' not found", update_id);
                return;
            }
        };

        let previous = self.clients.state_of(&id);
        self.clients.transition(&id, SessionState::Resyncing);

        let message = Message::FromServer(ServerMessage::UpdatingPlayers {
            update_id,
            players,
            resending: true,
        });
        match conn.write(&message).await {
            Ok(_) => debug!("[UDP] Resent update {} to {}", update_id, id),
            Err(e) => error!("[UDP] Could not resend update with id '{}': {}", update_id, e),
        }

        let resumed = match previous {
            Some(SessionState::Handshaking) | Some(SessionState::Ready) => previous,
            _ => Some(SessionState::Active),
        };
        if let Some(state) = resumed {
            self.clients.transition(&id, state);
        }
    }

    async fn disconnect(&mut self, id: Uuid) {
        let key = id.to_string();
        if !self.connections.contains(&key).await {
            warn!("[UDP] Disconnect from unknown client '{}'", id);
            return;
        }

        self.clients.release(&id);
        self.connections.remove(&key).await;
        self.state.remove(&key).await;
        info!("[UDP] Disconnected from client with id: {}", id);

        self.broadcast_players(MoveGate::Left).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownCoordinator;
    use assert_approx_eq::assert_approx_eq;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_test::assert_ok;

    struct Peer {
        socket: UdpConnection,
        from: SocketAddr,
    }

    impl Peer {
        async fn new() -> Self {
            let socket = UdpConnection::bind("127.0.0.1:0", WireFormat::Json).await.unwrap();
            let from = socket.local_addr().unwrap();
            Self { socket, from }
        }

        fn hello(&self) -> Message {
            Message::udp_port(self.from.port())
        }

        async fn recv(&self) -> Message {
            let (message, _, _) = timeout(Duration::from_secs(1), self.socket.read_from())
                .await
                .expect("no datagram")
                .unwrap();
            message
        }

        async fn nothing_pending(&self) -> bool {
            timeout(Duration::from_millis(50), self.socket.read_from())
                .await
                .is_err()
        }

        /// Everything queued for this peer, in arrival order.
        async fn drain(&self) -> Vec<shared::Subkind> {
            let mut seen = Vec::new();
            while let Ok(Ok((message, _, _))) =
                timeout(Duration::from_millis(50), self.socket.read_from()).await
            {
                seen.push(message.subkind());
            }
            seen
        }
    }

    async fn handler() -> (SessionHandler, ShutdownCoordinator) {
        let mut coordinator = ShutdownCoordinator::new();
        let (state, _rx) = SharedGameState::new(64);
        let handler = SessionHandler::bind(
            "127.0.0.1:0",
            WireFormat::Json,
            Arc::new(state),
            8,
            coordinator.listener(),
        )
        .await
        .unwrap();
        (handler, coordinator)
    }

    async fn handshake(handler: &mut SessionHandler, peer: &Peer) -> Uuid {
        assert_ok!(handler.process(peer.hello(), peer.from).await);
        match peer.recv().await {
            Message::FromServer(ServerMessage::FirstConnectionInfo { id, .. }) => id,
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    fn ready(id: Uuid) -> Message {
        Message::FromClient(ClientMessage::Ready { id, player: None })
    }

    #[tokio::test]
    async fn test_handshake_registers_connection() {
        let (mut handler, _coordinator) = handler().await;
        let peer = Peer::new().await;

        assert_ok!(handler.process(peer.hello(), peer.from).await);
        match peer.recv().await {
            Message::FromServer(ServerMessage::FirstConnectionInfo {
                id,
                slot,
                spawn,
                colour,
            }) => {
                assert_eq!(slot, Some(0));
                assert_approx_eq!(spawn.x, 32.0);
                assert_approx_eq!(spawn.y, 400.0);
                assert_eq!(colour, PlayerColour::Blue);
                assert!(handler.connections().contains(&id.to_string()).await);
                assert_eq!(
                    handler.clients().state_of(&id),
                    Some(SessionState::Handshaking)
                );
            }
            other => panic!("Unexpected message: {:?}", other),
        }
        assert_eq!(handler.update_id(), 1);
        assert_eq!(handler.history().latest(), Some(1));
    }

    #[tokio::test]
    async fn test_handshake_retry_reuses_id() {
        let (mut handler, _coordinator) = handler().await;
        let peer = Peer::new().await;

        let first = handshake(&mut handler, &peer).await;
        let second = handshake(&mut handler, &peer).await;

        assert_eq!(first, second);
        assert_eq!(handler.connections().len().await, 1);
        assert_eq!(handler.clients().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_client_is_ignored() {
        let (mut handler, _coordinator) = handler().await;
        let peer = Peer::new().await;
        handshake(&mut handler, &peer).await;

        assert_ok!(handler.process(ready(Uuid::new_v4()), peer.from).await);
        assert!(peer.nothing_pending().await);
        assert_eq!(handler.clients().occupied(), 0);
    }

    #[tokio::test]
    async fn test_ready_assigns_slot_and_broadcasts() {
        let (mut handler, _coordinator) = handler().await;
        let peer = Peer::new().await;
        let id = handshake(&mut handler, &peer).await;

        assert_ok!(handler.process(ready(id), peer.from).await);

        match peer.recv().await {
            Message::FromServer(ServerMessage::UpdatingPlayers {
                update_id,
                players,
                resending,
            }) => {
                assert_eq!(update_id, 2);
                assert!(players.is_empty());
                assert!(!resending);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
        assert!(peer.nothing_pending().await);
        assert_eq!(handler.clients().slot_of(&id), Some(0));
        assert_eq!(handler.clients().state_of(&id), Some(SessionState::Ready));
    }

    #[tokio::test]
    async fn test_spectator_is_never_told_to_move() {
        use shared::Subkind;

        let (mut handler, _coordinator) = handler().await;
        let mut peers = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let peer = Peer::new().await;
            ids.push(handshake(&mut handler, &peer).await);
            peers.push(peer);
        }
        for (id, peer) in ids.iter().zip(&peers) {
            assert_ok!(handler.process(ready(*id), peer.from).await);
        }
        let spectator = ids[4];
        assert_eq!(handler.clients().slot_of(&spectator), None);

        // A repeated READY from the spectator still broadcasts.
        assert_ok!(handler.process(ready(spectator), peers[4].from).await);

        let seen = peers[4].drain().await;
        assert_eq!(seen, vec![Subkind::UpdatingPlayers; 6]);

        let seated = peers[0].drain().await;
        assert!(seated.contains(&Subkind::ClientCanMove));
    }

    #[tokio::test]
    async fn test_resend_serves_history_and_skips_unknown_ids() {
        let (mut handler, _coordinator) = handler().await;
        let peer = Peer::new().await;
        let id = handshake(&mut handler, &peer).await;
        handler.process(ready(id), peer.from).await.unwrap();
        peer.recv().await;

        let request = |update_id| {
            Message::FromClient(ClientMessage::RequestingUpdateId { id, update_id })
        };

        assert_ok!(handler.process(request(2), peer.from).await);
        match peer.recv().await {
            Message::FromServer(ServerMessage::UpdatingPlayers {
                update_id,
                resending,
                ..
            }) => {
                assert_eq!(update_id, 2);
                assert!(resending);
            }
            other => panic!("Unexpected message: {:?}", other),
        }

        assert_ok!(handler.process(request(99), peer.from).await);
        assert!(peer.nothing_pending().await);
        assert_eq!(handler.clients().state_of(&id), Some(SessionState::Ready));
    }

    #[tokio::test]
    async fn test_disconnect_releases_everything() {
        let (mut handler, _coordinator) = handler().await;
        let peer = Peer::new().await;
        let id = handshake(&mut handler, &peer).await;
        handler.process(ready(id), peer.from).await.unwrap();
        peer.recv().await;

        let bye = Message::FromClient(ClientMessage::Disconnecting { id });
        assert_ok!(handler.process(bye.clone(), peer.from).await);

        assert!(!handler.connections().contains(&id.to_string()).await);
        assert!(handler.clients().session(&id).is_none());
        assert_eq!(handler.clients().occupied(), 0);
        assert_eq!(handler.history().get(handler.update_id()).unwrap().len(), 0);

        // A second disconnect for the same id is ignored.
        assert_ok!(handler.process(bye, peer.from).await);
    }

    #[tokio::test]
    async fn test_dial_failure_is_fatal() {
        let (mut handler, _coordinator) = handler().await;
        let peer = Peer::new().await;

        let bad = Message::FromClient(ClientMessage::SendingUdpPort {
            udp_port: "not-a-port".into(),
        });
        let err = handler.process(bad, peer.from).await.unwrap_err();
        assert!(matches!(err, ServerError::Dial { .. }));
        assert_eq!(handler.update_id(), 1);
        assert!(handler.connections().is_empty().await);
    }

    #[tokio::test]
    async fn test_server_messages_are_ignored() {
        let (mut handler, _coordinator) = handler().await;
        let peer = Peer::new().await;

        assert_ok!(handler.process(Message::ping(), peer.from).await);
        assert_eq!(handler.update_id(), 1);
    }

    #[tokio::test]
    async fn test_handle_stops_on_shutdown() {
        let (handler, coordinator) = handler().await;
        let task = tokio::spawn(handler.handle());

        coordinator.trigger();
        let result = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_ok!(result);
    }
}
