//! Master-agent transport.
//!
//! The endpoint comes from the snmpd configuration file (`agentxsocket`
//! directive); Unix stream, TCP stream, and UDP datagram endpoints are
//! supported. Stream transports frame by reading the fixed header and then
//! exactly `payload_length` octets; EOF mid-frame surfaces as a transport
//! error and resets the session.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use regex::RegexBuilder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket, UnixStream};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::pdu::{Header, HEADER_LEN};

/// Fallback endpoint when discovery finds nothing usable.
pub const DEFAULT_MASTER_PATH: &str = "/var/agentx/master";

/// Default snmpd configuration file scanned for `agentxsocket`.
pub const SNMPD_CONFIG_PATH: &str = "/etc/snmp/snmpd.conf";

/// Per-attempt connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Where the master agent listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterAddr {
    Unix(PathBuf),
    Tcp(String),
    Udp(String),
}

impl std::fmt::Display for MasterAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MasterAddr::Unix(path) => write!(f, "unix:{}", path.display()),
            MasterAddr::Tcp(addr) => write!(f, "tcp:{}", addr),
            MasterAddr::Udp(addr) => write!(f, "udp:{}", addr),
        }
    }
}

/// Map an `agentxsocket` value onto an endpoint.
pub fn parse_master_addr(value: &str) -> MasterAddr {
    if let Some(rest) = value.strip_prefix("unix:") {
        return MasterAddr::Unix(PathBuf::from(rest));
    }
    if let Some(rest) = value.strip_prefix("tcp:") {
        if rest.contains(':') {
            return MasterAddr::Tcp(rest.to_owned());
        }
        warn!(value, "malformed tcp agentxsocket, using default");
        return MasterAddr::Unix(PathBuf::from(DEFAULT_MASTER_PATH));
    }
    if let Some(rest) = value.strip_prefix("udp:") {
        if rest.contains(':') {
            return MasterAddr::Udp(rest.to_owned());
        }
        warn!(value, "malformed udp agentxsocket, using default");
        return MasterAddr::Unix(PathBuf::from(DEFAULT_MASTER_PATH));
    }
    if value.contains('/') {
        return MasterAddr::Unix(PathBuf::from(value));
    }
    if let Ok(port) = value.parse::<u16>() {
        return MasterAddr::Udp(format!("127.0.0.1:{}", port));
    }
    warn!(value, "unrecognized agentxsocket value, using default");
    MasterAddr::Unix(PathBuf::from(DEFAULT_MASTER_PATH))
}

/// Scan an snmpd config file for the `agentxsocket` directive
/// (case-insensitive; the last occurrence wins).
pub fn discover_master_addr(snmpd_conf: &Path) -> MasterAddr {
    let directive = RegexBuilder::new(r"^agentxsocket\s+(\S+)$")
        .case_insensitive(true)
        .build()
        .expect("static regex");

    let contents = match std::fs::read_to_string(snmpd_conf) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(
                path = %snmpd_conf.display(),
                error = %e,
                "snmpd config not readable, using default agentx socket"
            );
            return MasterAddr::Unix(PathBuf::from(DEFAULT_MASTER_PATH));
        }
    };

    let mut addr = MasterAddr::Unix(PathBuf::from(DEFAULT_MASTER_PATH));
    for line in contents.lines() {
        if let Some(captures) = directive.captures(line.trim_end()) {
            addr = parse_master_addr(&captures[1]);
        }
    }
    info!(%addr, "using agentx master endpoint");
    addr
}

/// One connected transport to the master.
pub enum MasterTransport {
    Unix(UnixStream),
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl MasterTransport {
    /// Dial the endpoint, bounded by [`CONNECT_TIMEOUT`].
    pub async fn connect(addr: &MasterAddr) -> Result<MasterTransport> {
        let connect = async {
            match addr {
                MasterAddr::Unix(path) => Ok(MasterTransport::Unix(
                    UnixStream::connect(path).await?,
                )),
                MasterAddr::Tcp(addr) => Ok(MasterTransport::Tcp(
                    TcpStream::connect(addr.as_str()).await?,
                )),
                MasterAddr::Udp(addr) => {
                    let socket = UdpSocket::bind("0.0.0.0:0").await?;
                    socket.connect(addr.as_str()).await?;
                    Ok(MasterTransport::Udp(socket))
                }
            }
        };
        match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
            Ok(result) => result,
            Err(_) => Err(Error::Transport {
                source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
            }),
        }
    }

    /// Write one encoded frame.
    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        match self {
            MasterTransport::Unix(stream) => stream.write_all(frame).await?,
            MasterTransport::Tcp(stream) => stream.write_all(frame).await?,
            MasterTransport::Udp(socket) => {
                socket.send(frame).await?;
            }
        }
        Ok(())
    }

    /// Read one frame: header plus exactly `payload_length` payload octets.
    pub async fn read_frame(&mut self) -> Result<(Header, Bytes)> {
        match self {
            MasterTransport::Unix(stream) => read_stream_frame(stream).await,
            MasterTransport::Tcp(stream) => read_stream_frame(stream).await,
            MasterTransport::Udp(socket) => {
                let mut buf = vec![0u8; 65535];
                let n = socket.recv(&mut buf).await?;
                let header = Header::decode(&buf[..n.min(HEADER_LEN)])?;
                let payload = Bytes::from(buf[HEADER_LEN.min(n)..n].to_vec());
                Ok((header, payload))
            }
        }
    }

    /// Close the write side where the transport has one.
    pub async fn close(&mut self) {
        let _ = match self {
            MasterTransport::Unix(stream) => stream.shutdown().await,
            MasterTransport::Tcp(stream) => stream.shutdown().await,
            MasterTransport::Udp(_) => Ok(()),
        };
    }
}

async fn read_stream_frame<S: AsyncReadExt + Unpin>(stream: &mut S) -> Result<(Header, Bytes)> {
    let mut header_buf = [0u8; HEADER_LEN];
    stream.read_exact(&mut header_buf).await?;
    let header = Header::decode(&header_buf)?;
    let mut payload = vec![0u8; header.payload_length as usize];
    stream.read_exact(&mut payload).await?;
    Ok((header, Bytes::from(payload)))
}
