use std::net::ToSocketAddrs;
use std::time::Duration;

use prost::Message;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::pb;
use crate::protocol::error::{KrpcError, Result};
use crate::transport::codec::{ProtobufCodec, MAX_MESSAGE_SIZE};
use crate::wire;

/// Default timeout for establishing a TCP connection (5 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Async TCP transport for kRPC.
///
/// Handles connecting and moving framed protobuf messages over a socket.
/// Reads and writes carry no timeout of their own; a call waits for the full
/// response unless the caller wraps it in one.
///
/// # Wire Protocol
///
/// ```text
/// [uvarint length] [protobuf message]
/// ```
///
/// # Example
///
/// ```no_run
/// use krpc_common::transport::{RpcConnection, TcpTransport};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = TcpTransport::new();
/// let connection = RpcConnection::open(&transport, "127.0.0.1:50000", "my client").await?;
/// println!("client id: {:02x?}", connection.client_id());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Creates a transport with the default connect timeout.
    pub fn new() -> Self {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Connects to a remote endpoint.
    ///
    /// The address may resolve to several socket addresses; each is tried in
    /// turn until one accepts.
    pub async fn connect(&self, addr: &str) -> Result<TcpStream> {
        let socket_addrs = addr
            .to_socket_addrs()
            .map_err(|e| KrpcError::Connection(format!("Invalid address '{}': {}", addr, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(socket_addr)).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true).map_err(|e| {
                        KrpcError::Connection(format!("Failed to set TCP_NODELAY: {}", e))
                    })?;
                    return Ok(stream);
                }
                Ok(Err(e)) => last_err = Some(e.to_string()),
                Err(_) => {
                    last_err = Some(format!("timed out after {}ms", self.connect_timeout.as_millis()))
                }
            }
        }

        Err(KrpcError::Connection(format!(
            "Failed to connect to {}: {}",
            addr,
            last_err.unwrap_or_else(|| "Unknown error".to_string())
        )))
    }

    /// Sends a message with its varint length prefix.
    pub async fn send_message<W, M>(writer: &mut W, message: &M) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        M: Message,
    {
        let framed = ProtobufCodec::encode_framed(message);

        writer
            .write_all(&framed)
            .await
            .map_err(|e| Self::map_io_error(e, "writing message"))?;

        writer
            .flush()
            .await
            .map_err(|e| Self::map_io_error(e, "flushing stream"))?;

        Ok(())
    }

    /// Receives one length-prefixed message.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The length prefix is not a valid varint
    /// - Message exceeds maximum size (100 MB)
    /// - Reading the data fails or the body does not decode as `M`
    pub async fn receive_message<R, M>(reader: &mut R) -> Result<M>
    where
        R: AsyncRead + Unpin,
        M: Message + Default,
    {
        let len = Self::read_varint(reader).await? as usize;

        if len > MAX_MESSAGE_SIZE {
            return Err(KrpcError::InvalidResponse(format!(
                "Message too large: {} bytes (max {} bytes)",
                len, MAX_MESSAGE_SIZE
            )));
        }

        let mut buf = vec![0u8; len];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(|e| Self::map_io_error(e, "reading data"))?;

        ProtobufCodec::decode(&buf)
    }

    /// Reads a varint one byte at a time.
    ///
    /// Validation is shared with [`wire::decode_varint`], so an over-long
    /// prefix fails as `MalformedVarint` without reading further.
    pub async fn read_varint<R>(reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut bytes = [0u8; wire::MAX_VARINT_LEN];
        for i in 0..wire::MAX_VARINT_LEN {
            bytes[i] = reader
                .read_u8()
                .await
                .map_err(|e| Self::map_io_error(e, "reading length prefix"))?;
            if bytes[i] & 0x80 == 0 {
                return Ok(wire::decode_varint(&bytes[..=i])?.0);
            }
        }
        Err(KrpcError::MalformedVarint)
    }

    /// Map IO errors to KrpcError variants
    ///
    /// - Timeouts/would block -> `Timeout`
    /// - Peer closed or reset the socket -> `Connection`
    /// - Other IO errors -> `Io`
    pub fn map_io_error(err: std::io::Error, context: &str) -> KrpcError {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => KrpcError::Timeout(0),
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected => {
                KrpcError::Connection(format!("{}: Connection lost", context))
            }
            _ => KrpcError::Io(err),
        }
    }

    /// Sends a connection request and checks the server's verdict.
    async fn handshake(
        stream: &mut TcpStream,
        request: &pb::ConnectionRequest,
    ) -> Result<pb::ConnectionResponse> {
        Self::send_message(stream, request).await?;
        let response: pb::ConnectionResponse = Self::receive_message(stream).await?;

        if response.status != pb::ConnectionStatus::Ok as i32 {
            let status = pb::ConnectionStatus::try_from(response.status)
                .map(|s| format!("{:?}", s))
                .unwrap_or_else(|_| response.status.to_string());
            return Err(KrpcError::Connection(format!("{} -- {}", status, response.message)));
        }

        Ok(response)
    }

    /// Runs a handshake, shutting the socket down if it fails.
    async fn open_with_handshake(
        &self,
        addr: &str,
        request: &pb::ConnectionRequest,
    ) -> Result<(TcpStream, pb::ConnectionResponse)> {
        let mut stream = self.connect(addr).await?;
        match Self::handshake(&mut stream, request).await {
            Ok(response) => Ok((stream, response)),
            Err(e) => {
                tracing::warn!("Handshake with {} failed: {}", addr, e);
                let _ = stream.shutdown().await;
                Err(e)
            }
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// The connection procedure calls travel over.
///
/// Its handshake yields the client identifier the server uses to pair a
/// [`StreamConnection`] with this client.
#[derive(Debug)]
pub struct RpcConnection {
    stream: TcpStream,
    client_id: Vec<u8>,
}

impl RpcConnection {
    /// Connects and performs the `RPC` handshake.
    pub async fn open(transport: &TcpTransport, addr: &str, client_name: &str) -> Result<Self> {
        let request = pb::ConnectionRequest::rpc(client_name);
        let (stream, response) = transport.open_with_handshake(addr, &request).await?;
        tracing::debug!("RPC connection to {} established", addr);

        Ok(Self {
            stream,
            client_id: response.client_identifier,
        })
    }

    /// Identifier assigned by the server during the handshake.
    pub fn client_id(&self) -> &[u8] {
        &self.client_id
    }

    /// Sends a request and waits for the complete response.
    pub async fn send_request(&mut self, request: &pb::Request) -> Result<pb::Response> {
        TcpTransport::send_message(&mut self.stream, request).await?;
        TcpTransport::receive_message(&mut self.stream).await
    }

    pub async fn shutdown(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// The connection stream updates arrive on.
///
/// Reads are buffered so the caller can wait for the next frame to start
/// without consuming any of it (see [`StreamConnection::wait_for_frame`]).
#[derive(Debug)]
pub struct StreamConnection {
    reader: BufReader<TcpStream>,
}

impl StreamConnection {
    /// Connects and performs the `STREAM` handshake for `client_id`.
    ///
    /// `client_id` must come from an already established [`RpcConnection`].
    pub async fn open(transport: &TcpTransport, addr: &str, client_id: &[u8]) -> Result<Self> {
        if client_id.is_empty() {
            return Err(KrpcError::Connection(
                "RPC connection must obtain a client identifier before the stream connection can handshake"
                    .to_string(),
            ));
        }

        let request = pb::ConnectionRequest::stream(client_id);
        let (stream, _) = transport.open_with_handshake(addr, &request).await?;
        tracing::debug!("Stream connection to {} established", addr);

        Ok(Self {
            reader: BufReader::new(stream),
        })
    }

    /// Waits until at least one byte of the next frame is buffered.
    ///
    /// Returns `false` when the server closed the connection. Dropping this
    /// future before it completes consumes nothing, so it is safe to race
    /// against a shutdown signal.
    pub async fn wait_for_frame(&mut self) -> Result<bool> {
        let buf = self
            .reader
            .fill_buf()
            .await
            .map_err(|e| TcpTransport::map_io_error(e, "waiting for stream update"))?;
        Ok(!buf.is_empty())
    }

    /// Reads the next complete stream update.
    pub async fn next_update(&mut self) -> Result<pb::StreamUpdate> {
        TcpTransport::receive_message(&mut self.reader).await
    }

    pub async fn shutdown(mut self) {
        let _ = self.reader.get_mut().shutdown().await;
    }
}
