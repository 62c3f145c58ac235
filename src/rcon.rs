//! Live server control over Source RCON
//!
//! Packet layout (little endian): `size:i32 id:i32 type:i32 body\0 \0`, where
//! `size` counts everything after itself. A session authenticates once and
//! then executes a single command.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::event::{ServerRef, SteamId};
use crate::store::{with_deadline, Store, StoreError};

const SERVERDATA_AUTH: i32 = 3;
const SERVERDATA_AUTH_RESPONSE: i32 = 2;
const SERVERDATA_EXECCOMMAND: i32 = 2;
const SERVERDATA_RESPONSE_VALUE: i32 = 0;

const AUTH_ID: i32 = 1;
const EXEC_ID: i32 = 2;
const MAX_PACKET_SIZE: i32 = 4096 + 10;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("server lookup failed: {0}")]
    Lookup(#[from] StoreError),

    #[error("rcon connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("rcon authentication rejected")]
    AuthRejected,

    #[error("malformed rcon packet: {0}")]
    Protocol(String),

    #[error("rcon call exceeded {0:?}")]
    Timeout(Duration),
}

/// Commands sent to a running game server
#[async_trait]
pub trait ServerControl: Send + Sync {
    async fn kick(&self, server: &ServerRef, target: SteamId, reason: &str) -> Result<(), ControlError>;

    async fn gag(&self, server: &ServerRef, target: SteamId) -> Result<(), ControlError>;

    /// Private in-game message to one player
    async fn psay(&self, server: &ServerRef, target: SteamId, message: &str) -> Result<(), ControlError>;
}

pub fn kick_command(target: SteamId, reason: &str) -> String {
    format!("sm_kick \"#{}\" \"{}\"", target.steam3(), sanitize(reason))
}

pub fn gag_command(target: SteamId) -> String {
    format!("sm_gag \"#{}\"", target.steam3())
}

pub fn psay_command(target: SteamId, message: &str) -> String {
    format!("sm_psay \"#{}\" \"{}\"", target.steam3(), sanitize(message))
}

/// Quotes and line breaks would let text escape its argument
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '"' => '\'',
            '\n' | '\r' | ';' => ' ',
            other => other,
        })
        .collect()
}

// ============================================================================
// WIRE FORMAT
// ============================================================================

pub fn encode_packet(id: i32, kind: i32, body: &str) -> Vec<u8> {
    let size = (4 + 4 + body.len() + 2) as i32;
    let mut buf = Vec::with_capacity(size as usize + 4);
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&kind.to_le_bytes());
    buf.extend_from_slice(body.as_bytes());
    buf.extend_from_slice(&[0, 0]);
    buf
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

async fn read_packet<R>(reader: &mut R) -> Result<Packet, ControlError>
where
    R: AsyncRead + Unpin,
{
    let size = reader.read_i32_le().await?;
    if !(10..=MAX_PACKET_SIZE).contains(&size) {
        return Err(ControlError::Protocol(format!("packet size {}", size)));
    }

    let id = reader.read_i32_le().await?;
    let kind = reader.read_i32_le().await?;

    let mut body = vec![0u8; (size - 8) as usize];
    reader.read_exact(&mut body).await?;
    // Trailing body terminator and empty string
    body.truncate(body.len().saturating_sub(2));

    Ok(Packet {
        id,
        kind,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

/// Authenticate then run one command, returning its output
pub async fn execute(address: &str, password: &str, command: &str) -> Result<String, ControlError> {
    let mut stream = TcpStream::connect(address).await?;

    stream
        .write_all(&encode_packet(AUTH_ID, SERVERDATA_AUTH, password))
        .await?;

    // Servers send an empty RESPONSE_VALUE before the auth response
    loop {
        let packet = read_packet(&mut stream).await?;
        if packet.kind == SERVERDATA_RESPONSE_VALUE {
            continue;
        }
        if packet.kind != SERVERDATA_AUTH_RESPONSE {
            return Err(ControlError::Protocol(format!("unexpected packet type {}", packet.kind)));
        }
        if packet.id == -1 {
            return Err(ControlError::AuthRejected);
        }
        break;
    }

    stream
        .write_all(&encode_packet(EXEC_ID, SERVERDATA_EXECCOMMAND, command))
        .await?;

    let response = read_packet(&mut stream).await?;
    if response.id != EXEC_ID {
        return Err(ControlError::Protocol(format!("response id {}", response.id)));
    }

    Ok(response.body)
}

// ============================================================================
// RCON CONTROL
// ============================================================================

/// [`ServerControl`] that resolves the server's address and password from
/// the store and speaks RCON to it
pub struct RconControl {
    store: Arc<dyn Store>,
    timeout: Duration,
}

impl RconControl {
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn exec(&self, server: &ServerRef, command: String) -> Result<String, ControlError> {
        let record = with_deadline(self.timeout, self.store.get_server(server.id)).await?;
        let address = format!("{}:{}", record.address, record.port);

        let output = tokio::time::timeout(self.timeout, execute(&address, &record.rcon_password, &command))
            .await
            .map_err(|_| ControlError::Timeout(self.timeout))??;

        tracing::debug!(server = %server.name, command = %command, "RCON command executed");
        Ok(output)
    }
}

#[async_trait]
impl ServerControl for RconControl {
    async fn kick(&self, server: &ServerRef, target: SteamId, reason: &str) -> Result<(), ControlError> {
        self.exec(server, kick_command(target, reason)).await.map(|_| ())
    }

    async fn gag(&self, server: &ServerRef, target: SteamId) -> Result<(), ControlError> {
        self.exec(server, gag_command(target)).await.map(|_| ())
    }

    async fn psay(&self, server: &ServerRef, target: SteamId, message: &str) -> Result<(), ControlError> {
        self.exec(server, psay_command(target, message)).await.map(|_| ())
    }
}
