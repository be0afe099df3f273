//! Typed wrappers over UDP sockets and TCP streams.
//!
//! Each wrapper is specialised for one message type and marshals it through a
//! [`WireFormat`]. UDP framing is one datagram per message. The stream mode has
//! no framing of its own: a read collects bytes until the peer closes or the
//! timeout elapses, then unmarshals the whole buffer, so one message must fit in
//! a single read cycle.

use log::trace;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::marker::PhantomData;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};

use crate::codec::{Codec, CodecError, WireFormat};

/// Largest datagram the receive side accepts.
pub const MAX_DATAGRAM: usize = 4096;

const STREAM_CHUNK: usize = 256;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not marshal data to write: {0}")]
    Encode(#[source] CodecError),
    #[error("could not unmarshal {len} byte buffer: {source}")]
    Decode {
        len: usize,
        #[source]
        source: CodecError,
    },
    #[error("nothing read")]
    NothingRead,
    #[error("marshalled message of {0} bytes does not fit in one datagram")]
    TooLarge(usize),
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransportError {
    /// The local socket can no longer be used; the read loop owning it should stop.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            TransportError::Io(e) if matches!(e.kind(), io::ErrorKind::NotConnected | io::ErrorKind::ConnectionAborted)
        )
    }

    /// The remote end went away while writing or reading a stream.
    pub fn is_peer_gone(&self) -> bool {
        matches!(
            self,
            TransportError::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::WriteZero
                    | io::ErrorKind::UnexpectedEof
            )
        )
    }

    pub fn is_nothing_read(&self) -> bool {
        matches!(self, TransportError::NothingRead)
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, TransportError::Decode { .. })
    }
}

fn decode<T: DeserializeOwned>(format: WireFormat, bytes: &[u8]) -> Result<T, TransportError> {
    format.decode(bytes).map_err(|source| TransportError::Decode {
        len: bytes.len(),
        source,
    })
}

fn unspecified_for(addr: &SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

/// UDP socket that reads and writes `T`.
#[derive(Debug)]
pub struct TypedUdpSocket<T> {
    socket: UdpSocket,
    format: WireFormat,
    _message: PhantomData<fn() -> T>,
}

impl<T> TypedUdpSocket<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn from_socket(socket: UdpSocket, format: WireFormat) -> Self {
        Self {
            socket,
            format,
            _message: PhantomData,
        }
    }

    pub async fn bind(addr: impl ToSocketAddrs, format: WireFormat) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::from_socket(socket, format))
    }

    /// Opens a socket whose default destination is `addr`.
    pub async fn connect_to(addr: SocketAddr, format: WireFormat) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(unspecified_for(&addr)).await?;
        socket.connect(addr).await?;
        Ok(Self::from_socket(socket, format))
    }

    /// Dials `host:port` where the port comes from a peer-supplied string.
    pub async fn dial(host: IpAddr, port: &str, format: WireFormat) -> Result<Self, TransportError> {
        let port = match port.trim().parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => return Err(TransportError::InvalidAddress(format!("{}:{}", host, port))),
        };
        Self::connect_to(SocketAddr::new(host, port), format).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.peer_addr()?)
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    fn marshal(&self, message: &T) -> Result<Vec<u8>, TransportError> {
        let buffer = self.format.encode(message).map_err(TransportError::Encode)?;
        if buffer.len() > MAX_DATAGRAM {
            return Err(TransportError::TooLarge(buffer.len()));
        }
        Ok(buffer)
    }

    /// Writes to the connected peer.
    pub async fn write(&self, message: &T) -> Result<usize, TransportError> {
        let buffer = self.marshal(message)?;
        let written = self.socket.send(&buffer).await?;
        trace!("[NET] Wrote {} bytes to {:?}", written, self.socket.peer_addr().ok());
        Ok(written)
    }

    pub async fn write_to(&self, message: &T, addr: SocketAddr) -> Result<usize, TransportError> {
        let buffer = self.marshal(message)?;
        let written = self.socket.send_to(&buffer, addr).await?;
        trace!("[NET] Wrote {} bytes to {}", written, addr);
        Ok(written)
    }

    /// Reads one datagram and unmarshals it.
    ///
    /// A zero-length datagram yields [`TransportError::NothingRead`] so callers
    /// can retry without treating it as a failure.
    pub async fn read_from(&self) -> Result<(T, usize, SocketAddr), TransportError> {
        let mut buffer = [0u8; MAX_DATAGRAM];
        let (len, addr) = self.socket.recv_from(&mut buffer).await?;
        if len == 0 {
            return Err(TransportError::NothingRead);
        }
        let message = decode(self.format, &buffer[..len])?;
        Ok((message, len, addr))
    }

    /// Reads one datagram from the connected peer.
    pub async fn read(&self) -> Result<(T, usize), TransportError> {
        let mut buffer = [0u8; MAX_DATAGRAM];
        let len = self.socket.recv(&mut buffer).await?;
        if len == 0 {
            return Err(TransportError::NothingRead);
        }
        let message = decode(self.format, &buffer[..len])?;
        Ok((message, len))
    }
}

/// TCP stream that reads and writes `T`.
///
/// Read and write halves are locked independently so a pending read never
/// blocks a writer sharing the same stream.
#[derive(Debug)]
pub struct TypedStream<T> {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    local: SocketAddr,
    peer: SocketAddr,
    format: WireFormat,
    _message: PhantomData<fn() -> T>,
}

impl<T> TypedStream<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(stream: TcpStream, format: WireFormat) -> Result<Self, TransportError> {
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            local,
            peer,
            format,
            _message: PhantomData,
        })
    }

    pub async fn connect(addr: SocketAddr, format: WireFormat) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        Self::new(stream, format)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn write(&self, message: &T) -> Result<usize, TransportError> {
        let buffer = self.format.encode(message).map_err(TransportError::Encode)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&buffer).await?;
        writer.flush().await?;
        Ok(buffer.len())
    }

    /// Collects bytes until the peer closes or `wait` elapses, then unmarshals
    /// the whole buffer as one message.
    pub async fn read(&self, wait: Duration) -> Result<(T, usize), TransportError> {
        let deadline = Instant::now() + wait;
        let mut buffer = Vec::with_capacity(MAX_DATAGRAM);
        let mut chunk = [0u8; STREAM_CHUNK];
        let mut reader = self.reader.lock().await;

        loop {
            match timeout_at(deadline, reader.read(&mut chunk)).await {
                Err(_) | Ok(Ok(0)) => break,
                Ok(Ok(n)) => buffer.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        if buffer.is_empty() {
            return Err(TransportError::NothingRead);
        }
        let message = decode(self.format, &buffer)?;
        Ok((message, buffer.len()))
    }

    /// Reads and discards everything until the peer closes. Returns the byte count.
    pub async fn drain(&self) -> Result<usize, TransportError> {
        let mut chunk = [0u8; STREAM_CHUNK];
        let mut total = 0;
        let mut reader = self.reader.lock().await;
        loop {
            match reader.read(&mut chunk).await? {
                0 => return Ok(total),
                n => total += n,
            }
        }
    }
}

/// TCP listener producing [`TypedStream`]s.
#[derive(Debug)]
pub struct TypedTcpListener<T> {
    listener: TcpListener,
    format: WireFormat,
    _message: PhantomData<fn() -> T>,
}

impl<T> TypedTcpListener<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn from_listener(listener: TcpListener, format: WireFormat) -> Self {
        Self {
            listener,
            format,
            _message: PhantomData,
        }
    }

    pub async fn bind(addr: impl ToSocketAddrs, format: WireFormat) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, format))
    }

    pub async fn accept(&self) -> Result<TypedStream<T>, TransportError> {
        let (stream, _) = self.listener.accept().await?;
        TypedStream::new(stream, self.format)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }
}
