use log::{debug, info, trace, warn};
use shared::{
    ClientMessage, Message, Player, PlayerColour, Position, ServerMessage, Subkind,
    TcpConnection, TransportError, UdpConnection, WireFormat,
};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use uuid::Uuid;

pub const HANDSHAKE_ATTEMPTS: u32 = 3;
pub const HANDSHAKE_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("unexpected {0}")]
    Unexpected(Subkind),
    #[error("not connected to the server")]
    NotConnected,
}

/// Client end of the UDP session.
///
/// One unconnected socket both advertises its port to the server and receives
/// everything the server sends back, so the advertised port always matches the
/// source port of the handshake.
#[derive(Debug)]
pub struct SessionClient {
    socket: UdpConnection,
    server: SocketAddr,
    id: Uuid,
    slot: Option<u8>,
    spawn: Position,
    colour: PlayerColour,
}

impl SessionClient {
    pub async fn connect(server: SocketAddr, format: WireFormat) -> Result<Self, ClientError> {
        Self::connect_with(server, format, HANDSHAKE_ATTEMPTS, HANDSHAKE_WAIT).await
    }

    /// Advertises the receive port and waits for `FIRST_CONNECTION_INFO`,
    /// repeating the advertisement up to `attempts` times.
    pub async fn connect_with(
        server: SocketAddr,
        format: WireFormat,
        attempts: u32,
        wait: Duration,
    ) -> Result<Self, ClientError> {
        let bind_addr = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpConnection::bind(bind_addr, format).await?;
        let port = socket.local_addr()?.port();

        for attempt in 1..=attempts.max(1) {
            socket.write_to(&Message::udp_port(port), server).await?;
            debug!("Sent handshake {} of {} from port {}", attempt, attempts, port);

            match timeout(wait, Self::await_welcome(&socket)).await {
                Ok(Ok((id, slot, spawn, colour))) => {
                    info!("Connected to {} as {} (slot {:?})", server, id, slot);
                    return Ok(Self {
                        socket,
                        server,
                        id,
                        slot,
                        spawn,
                        colour,
                    });
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => warn!("No reply to handshake {} from {}", attempt, server),
            }
        }
        Err(ClientError::Timeout("first connection info"))
    }

    async fn await_welcome(
        socket: &UdpConnection,
    ) -> Result<(Uuid, Option<u8>, Position, PlayerColour), ClientError> {
        loop {
            match socket.read_from().await {
                Ok((message, _, from)) => match message {
                    Message::FromServer(ServerMessage::FirstConnectionInfo {
                        id,
                        slot,
                        spawn,
                        colour,
                    }) => return Ok((id, slot, spawn, colour)),
                    other => trace!("Ignoring {} from {} during handshake", other.subkind(), from),
                },
                Err(e) if e.is_nothing_read() || e.is_decode() => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Slot offered in the handshake; the server confirms it on READY.
    pub fn slot(&self) -> Option<u8> {
        self.slot
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.socket.local_addr()?)
    }

    /// The handshake reply, for feeding into a [`crate::game::ClientGameState`].
    pub fn welcome(&self) -> ServerMessage {
        ServerMessage::FirstConnectionInfo {
            id: self.id,
            slot: self.slot,
            spawn: self.spawn,
            colour: self.colour,
        }
    }

    async fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        trace!("Sending {}", message.subkind());
        self.socket
            .write_to(&Message::FromClient(message), self.server)
            .await?;
        Ok(())
    }

    pub async fn send_ready(&self, player: Option<Player>) -> Result<(), ClientError> {
        self.send(ClientMessage::Ready { id: self.id, player }).await
    }

    pub async fn send_local_data(&self, player: Player) -> Result<(), ClientError> {
        self.send(ClientMessage::SendingLocalData { id: self.id, player })
            .await
    }

    pub async fn request_update(&self, update_id: u64) -> Result<(), ClientError> {
        self.send(ClientMessage::RequestingUpdateId {
            id: self.id,
            update_id,
        })
        .await
    }

    pub async fn disconnect(self) -> Result<(), ClientError> {
        self.send(ClientMessage::Disconnecting { id: self.id }).await?;
        info!("Disconnected from {}", self.server);
        Ok(())
    }

    /// Waits for the next server message.
    pub async fn recv(&self) -> Result<ServerMessage, ClientError> {
        loop {
            match self.socket.read_from().await {
                Ok((Message::FromServer(message), _, _)) => return Ok(message),
                Ok((message, _, _)) => return Err(ClientError::Unexpected(message.subkind())),
                Err(e) if e.is_nothing_read() => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn recv_timeout(&self, wait: Duration) -> Result<ServerMessage, ClientError> {
        timeout(wait, self.recv())
            .await
            .map_err(|_| ClientError::Timeout("server message"))?
    }
}

/// Client end of the TCP heartbeat.
pub struct HeartbeatStream {
    stream: TcpConnection,
}

impl HeartbeatStream {
    pub async fn connect(server: SocketAddr, format: WireFormat) -> Result<Self, ClientError> {
        let stream = TcpConnection::connect(server, format).await?;
        info!("Heartbeat stream open to {}", server);
        Ok(Self { stream })
    }

    /// Reads the greeting ping. `wait` must stay below the heartbeat interval,
    /// or later pings run into the same read.
    pub async fn first_ping(&self, wait: Duration) -> Result<(), ClientError> {
        match self.stream.read(wait).await {
            Ok((Message::FromServer(ServerMessage::Ping), _)) => Ok(()),
            Ok((message, _)) => Err(ClientError::Unexpected(message.subkind())),
            Err(e) if e.is_nothing_read() => Err(ClientError::Timeout("heartbeat")),
            Err(e) => Err(e.into()),
        }
    }

    /// Discards pings until the server closes the stream.
    pub async fn run(self) -> Result<usize, ClientError> {
        let received = self.stream.drain().await?;
        info!("Heartbeat stream closed after {} bytes", received);
        Ok(received)
    }
}
