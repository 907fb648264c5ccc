//! Connection establishment: prelogin negotiation, the optional TLS tunnel,
//! and the Login7 exchange.

use bytes::{BufMut, BytesMut};
use sqlserver_framing::MessageStream;
use sqlserver_tls::{HandshakeFrames, TlsConnector, TlsOptions};
use tds_wire::packet::{PacketHeader, PacketStatus, PacketType, HEADER_LEN};
use tds_wire::prelogin::{Encryption, Prelogin};
use tds_wire::token::{EnvChange, Token, TokenReader};
use tds_wire::Login7;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::Transport;
use crate::config::{Config, Credentials, EncryptionMode};
use crate::error::{Error, Result};

/// What a connection attempt produced.
pub(crate) enum ConnectOutcome {
    /// Logged in and ready.
    Established(LoginOutcome),
    /// The server routed us elsewhere (Azure gateways do this mid-login).
    Redirect {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
    },
}

/// A ready transport plus what the login exchange reported.
pub(crate) struct LoginOutcome {
    pub(crate) transport: Transport,
    pub(crate) database: Option<String>,
    pub(crate) tds_version: Option<u32>,
}

/// Level of TLS the prelogin negotiation settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tunnel {
    None,
    LoginOnly,
    Full,
}

pub(crate) async fn connect(config: &Config, host: &str, port: u16) -> Result<ConnectOutcome> {
    let address = format!("{host}:{port}");
    tracing::info!(%address, database = %config.database, "connecting");

    let mut tcp = timeout(config.timeouts.connect, TcpStream::connect(&address))
        .await
        .map_err(|_| Error::Timeout)??;
    tcp.set_nodelay(true)?;

    // Prelogin rides on bare packets; nothing is framed yet.
    let client_encryption = match config.encryption {
        EncryptionMode::Required => Encryption::On,
        EncryptionMode::LoginOnly => Encryption::Off,
        EncryptionMode::Disabled => Encryption::NotSupported,
    };
    let prelogin = Prelogin::client(client_encryption);
    write_message(
        &mut tcp,
        PacketType::Prelogin,
        &prelogin.encode(),
        tds_wire::DEFAULT_PACKET_SIZE,
    )
    .await?;
    let response = read_message(&mut tcp).await?;
    let server = Prelogin::decode(&response)?;
    tracing::debug!(
        client = ?client_encryption,
        server = ?server.encryption,
        "prelogin encryption negotiation"
    );

    let tunnel = match (client_encryption, server.encryption) {
        (Encryption::NotSupported, Encryption::NotSupported | Encryption::Off) => Tunnel::None,
        (Encryption::NotSupported, _) => {
            return Err(Error::Tls("server requires encryption".into()));
        }
        (Encryption::Off, Encryption::Off) => Tunnel::LoginOnly,
        (Encryption::On, Encryption::Off | Encryption::NotSupported) => {
            return Err(Error::Tls(
                "server does not support the required encryption".into(),
            ));
        }
        _ => Tunnel::Full,
    };

    let login = build_login(config)?;

    match tunnel {
        Tunnel::None => {
            tracing::warn!("connection is not encrypted");
            let mut transport = Transport::Plain(new_stream(tcp, config));
            transport
                .send(PacketType::Login7, login.encode())
                .await
                .map_err(Error::from_framing)?;
            finish_login(config, transport).await
        }
        Tunnel::Full => {
            let tls = tls_handshake(config, host, tcp).await?;
            let mut transport = Transport::Tls(Box::new(new_stream(tls, config)));
            transport
                .send(PacketType::Login7, login.encode())
                .await
                .map_err(Error::from_framing)?;
            finish_login(config, transport).await
        }
        Tunnel::LoginOnly => {
            // Login-only encryption: credentials ride the tunnel, then both
            // sides fall back to plaintext. The server's login response is
            // already unencrypted, so the TLS layer comes off right after
            // the login record is flushed.
            let mut tls = tls_handshake(config, host, tcp).await?;
            write_message(&mut tls, PacketType::Login7, &login.encode(), config.packet_size as usize)
                .await?;
            tls.flush().await?;

            let (frames, _session) = tls.into_inner();
            let tcp = frames.into_inner();
            let transport = Transport::Plain(new_stream(tcp, config));
            finish_login(config, transport).await
        }
    }
}

fn new_stream<S>(transport: S, config: &Config) -> MessageStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = MessageStream::new(transport);
    stream.set_packet_size(config.packet_size as usize);
    stream
}

async fn tls_handshake(
    config: &Config,
    host: &str,
    tcp: TcpStream,
) -> Result<sqlserver_tls::TlsStream<TcpStream>> {
    let connector = TlsConnector::new(TlsOptions {
        trust_server_certificate: config.trust_server_certificate,
        root_certificates: Vec::new(),
        server_name: None,
    })?;

    let mut tls = timeout(
        config.timeouts.tls,
        connector.connect(HandshakeFrames::new(tcp), host),
    )
    .await
    .map_err(|_| Error::Timeout)??;

    // From here on TLS records travel bare, not inside prelogin packets.
    let (frames, _session) = tls.get_mut();
    frames.handshake_complete();

    Ok(tls)
}

fn build_login(config: &Config) -> Result<Login7> {
    let (username, password) = match &config.credentials {
        Credentials::SqlPassword { username, password } => (username.clone(), password.clone()),
        Credentials::ExternalToken { .. } => {
            return Err(Error::Config(
                "external token authentication is not supported by this client".into(),
            ));
        }
    };

    Ok(Login7 {
        packet_size: config.packet_size,
        hostname: std::env::var("HOSTNAME").unwrap_or_default(),
        username,
        password,
        app_name: config.app_name.clone(),
        server_name: config.host.clone(),
        database: config.database.clone(),
        read_only_intent: config.read_only_intent,
        ..Login7::default()
    })
}

/// Read the login response, applying ENVCHANGE state as it arrives.
async fn finish_login(config: &Config, mut transport: Transport) -> Result<ConnectOutcome> {
    let mut database = None;
    let mut tds_version = None;

    let message = timeout(config.timeouts.login, transport.recv())
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(Error::from_framing)?
        .ok_or(Error::ConnectionClosed)?;

    let mut reader = TokenReader::new(message.payload);
    while let Some(token) = reader.next()? {
        match token {
            Token::LoginAck(ack) => {
                tracing::debug!(
                    program = %ack.program,
                    tds_version = format_args!("{:08X}", ack.tds_version),
                    "login acknowledged"
                );
                tds_version = Some(ack.tds_version);
            }
            Token::EnvChange(EnvChange::Database { new, .. }) => {
                database = Some(new);
            }
            Token::EnvChange(EnvChange::PacketSize(size)) => {
                tracing::debug!(size, "server adjusted packet size");
                transport.set_packet_size(size as usize);
            }
            Token::EnvChange(EnvChange::Routing { host, port }) => {
                return Ok(ConnectOutcome::Redirect { host, port });
            }
            Token::EnvChange(_) => {}
            Token::Error(message) => {
                tracing::warn!(number = message.number, %message.message, "login rejected");
                return Err(Error::Authentication(message.message));
            }
            Token::Info(info) => {
                tracing::debug!(number = info.number, %info.message, "login info");
            }
            Token::Done(_) => {
                if tds_version.is_none() {
                    return Err(Error::Authentication(
                        "server completed login without LOGINACK".into(),
                    ));
                }
                break;
            }
            other => {
                tracing::debug!(?other, "ignoring login token");
            }
        }
    }

    tracing::info!(database = ?database, "login complete");
    Ok(ConnectOutcome::Established(LoginOutcome {
        transport,
        database,
        tds_version,
    }))
}

/// Write one message as raw packets over an unframed stream.
async fn write_message<S>(
    stream: &mut S,
    ty: PacketType,
    payload: &[u8],
    packet_size: usize,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let max_payload = packet_size.max(HEADER_LEN + 1) - HEADER_LEN;
    let mut chunks = payload.chunks(max_payload).peekable();
    let mut packet_id: u8 = 1;

    // An empty payload still needs its EOM packet.
    if payload.is_empty() {
        let header = PacketHeader {
            ty,
            status: PacketStatus::END_OF_MESSAGE,
            length: HEADER_LEN as u16,
            spid: 0,
            packet_id,
            window: 0,
        };
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        header.encode(&mut buf);
        stream.write_all(&buf).await?;
        return Ok(());
    }

    while let Some(chunk) = chunks.next() {
        let status = if chunks.peek().is_none() {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::empty()
        };
        let header = PacketHeader {
            ty,
            status,
            length: (HEADER_LEN + chunk.len()) as u16,
            spid: 0,
            packet_id,
            window: 0,
        };
        let mut buf = BytesMut::with_capacity(HEADER_LEN + chunk.len());
        header.encode(&mut buf);
        buf.put_slice(chunk);
        stream.write_all(&buf).await?;
        packet_id = packet_id.wrapping_add(1);
    }

    Ok(())
}

/// Read one complete message from an unframed stream.
async fn read_message<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut payload = Vec::new();
    loop {
        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).await?;
        let length = u16::from_be_bytes([header[2], header[3]]) as usize;
        if length < HEADER_LEN {
            return Err(Error::Protocol(format!("packet length {length} too short")));
        }
        let mut body = vec![0u8; length - HEADER_LEN];
        stream.read_exact(&mut body).await?;
        payload.extend_from_slice(&body);
        if header[1] & PacketStatus::END_OF_MESSAGE.bits() != 0 {
            return Ok(payload);
        }
    }
}
