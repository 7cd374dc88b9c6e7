//! AgentX session state machine.
//!
//! Owns the one transport to the master: connect with backoff, Open
//! handshake, Register sweep, then the request loop with trap notifications
//! interleaved from a bounded queue. Any transport or protocol fault resets
//! the transport and re-enters the reconnect loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::dispatch;
use crate::error::{Error, Result};
use crate::mib::MibTree;
use crate::oid::Oid;
use crate::pdu::{resp_error, CloseReason, Payload, Pdu, PduType};
use crate::transport::{MasterAddr, MasterTransport};
use crate::varbind::VarBind;

/// Session tuning knobs; the defaults match the deployed daemon.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Descriptor sent in the Open PDU.
    pub descriptor: String,
    /// AgentX session timeout advertised in Open, seconds.
    pub open_timeout: u8,
    /// Settle delay between connect and Open.
    pub pre_open_delay: Duration,
    /// Sleep between reconnect attempts.
    pub retry_interval: Duration,
    /// Bound on each administrative request/response exchange.
    pub handshake_timeout: Duration,
    /// Failures after which retry logging escalates from WARN to ERROR.
    pub retry_error_threshold: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            descriptor: "SONiC-like AgentX sub-agent".to_owned(),
            open_timeout: 5,
            pre_open_delay: Duration::from_secs(1),
            retry_interval: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(5),
            retry_error_threshold: 10,
        }
    }
}

/// Transport lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Handshaking,
    Registering,
    Ready,
    Closing,
    Closed,
}

pub struct Session {
    addr: MasterAddr,
    tree: Arc<MibTree>,
    options: SessionOptions,
    notify_rx: mpsc::Receiver<Vec<VarBind>>,
    notify_open: bool,
    cancel: CancellationToken,
    started_at: Instant,
    packet_id: u32,
    state: SessionState,
}

impl Session {
    pub fn new(
        addr: MasterAddr,
        tree: Arc<MibTree>,
        options: SessionOptions,
        notify_rx: mpsc::Receiver<Vec<VarBind>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            addr,
            tree,
            options,
            notify_rx,
            notify_open: true,
            cancel,
            started_at: Instant::now(),
            packet_id: 0,
            state: SessionState::Disconnected,
        }
    }

    /// Current lifecycle state, for logging and tests.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Agent-assigned packet id, monotonic, wrapping at 2^32.
    fn next_packet_id(&mut self) -> u32 {
        self.packet_id = self.packet_id.wrapping_add(1);
        self.packet_id
    }

    /// sysUpTime in 1/100 s ticks since agent start.
    fn uptime_ticks(&self) -> u32 {
        (self.started_at.elapsed().as_millis() / 10) as u32
    }

    /// Reconnect loop; returns on shutdown.
    pub async fn run(mut self) {
        let mut failures: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.state = SessionState::Connecting;
            match self.serve().await {
                Ok(()) => break,
                Err(e) => {
                    failures += 1;
                    if failures <= self.options.retry_error_threshold {
                        warn!(
                            error = %e,
                            failures,
                            "agentx session lost, is the master agent running? retrying in {:?}",
                            self.options.retry_interval
                        );
                    } else {
                        error!(
                            error = %e,
                            failures,
                            "agentx session lost, is the master agent running? retrying in {:?}",
                            self.options.retry_interval
                        );
                    }
                }
            }
            self.state = SessionState::Disconnected;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.options.retry_interval) => {}
            }
        }
        self.state = SessionState::Closed;
        info!("agentx session stopped");
    }

    /// One connect/handshake/serve cycle. `Ok(())` means clean shutdown.
    async fn serve(&mut self) -> Result<()> {
        let mut transport = MasterTransport::connect(&self.addr).await?;
        debug!(addr = %self.addr, "transport connected");

        tokio::select! {
            _ = self.cancel.cancelled() => {
                transport.close().await;
                return Ok(());
            }
            _ = tokio::time::sleep(self.options.pre_open_delay) => {}
        }

        self.state = SessionState::Handshaking;
        let session_id = self.open_handshake(&mut transport).await?;
        info!(session_id, descriptor = %self.options.descriptor, "agentx session open");

        self.state = SessionState::Registering;
        self.register_all(&mut transport, session_id).await?;

        self.state = SessionState::Ready;
        info!(
            session_id,
            subtrees = self.tree.registrations().len(),
            "agentx session ready"
        );
        self.ready_loop(&mut transport, session_id).await
    }

    async fn open_handshake(&mut self, transport: &mut MasterTransport) -> Result<u32> {
        let packet_id = self.next_packet_id();
        let open = Pdu::open(
            packet_id,
            self.options.open_timeout,
            Oid::empty(),
            &self.options.descriptor,
        );
        transport.send(&open.encode()).await?;
        let response = self.await_response(transport, packet_id).await?;
        match &response.payload {
            Payload::Response { error, .. } if *error == resp_error::NO_AGENTX_ERROR => {
                Ok(response.header.session_id)
            }
            Payload::Response { error, .. } => Err(Error::Master {
                operation: "open",
                code: *error,
            }),
            _ => Err(Error::protocol(
                0,
                crate::error::ProtocolErrorKind::UnexpectedPduType(
                    response.header.ty.as_u8(),
                ),
            )),
        }
    }

    async fn register_all(
        &mut self,
        transport: &mut MasterTransport,
        session_id: u32,
    ) -> Result<()> {
        let tree = self.tree.clone();
        for registration in tree.registrations() {
            let packet_id = self.next_packet_id();
            let pdu = Pdu::register(
                session_id,
                packet_id,
                0,
                registration.priority,
                registration.subtree.clone(),
                registration.range_subid,
                registration.upper_bound,
            );
            transport.send(&pdu.encode()).await?;
            let response = self.await_response(transport, packet_id).await?;
            let error = match &response.payload {
                Payload::Response { error, .. } => *error,
                _ => resp_error::NO_AGENTX_ERROR,
            };
            match error {
                resp_error::NO_AGENTX_ERROR => {
                    debug!(subtree = %registration.subtree, "registered subtree");
                }
                resp_error::DUPLICATE_REGISTRATION => {
                    debug!(subtree = %registration.subtree, "subtree already registered");
                }
                code => {
                    return Err(Error::Master {
                        operation: "register",
                        code,
                    })
                }
            }
        }
        Ok(())
    }

    /// Read responses until the matching packet_id appears, bounded by the
    /// handshake timeout. Requests arriving mid-handshake are answered.
    async fn await_response(
        &mut self,
        transport: &mut MasterTransport,
        packet_id: u32,
    ) -> Result<Pdu> {
        let deadline = Instant::now() + self.options.handshake_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Transport {
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "handshake timed out",
                    ),
                });
            }
            let frame = match tokio::time::timeout(remaining, transport.read_frame()).await {
                Ok(frame) => frame?,
                Err(_) => continue,
            };
            let pdu = Pdu::decode(frame.0, frame.1)?;
            if pdu.header.ty == PduType::Response {
                if pdu.header.packet_id == packet_id {
                    return Ok(pdu);
                }
                debug!(
                    packet_id = pdu.header.packet_id,
                    "stale response during handshake, ignoring"
                );
            } else if dispatch::is_request(pdu.header.ty) {
                let uptime = self.uptime_ticks();
                if let Some(response) = dispatch::respond(&self.tree, uptime, &pdu) {
                    transport.send(&response.encode()).await?;
                }
            }
        }
    }

    async fn ready_loop(
        &mut self,
        transport: &mut MasterTransport,
        session_id: u32,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.state = SessionState::Closing;
                    let packet_id = self.next_packet_id();
                    let close = Pdu::close(session_id, packet_id, CloseReason::Shutdown);
                    // Pending writes may be dropped on shutdown.
                    let _ = transport.send(&close.encode()).await;
                    transport.close().await;
                    return Ok(());
                }
                notification = self.notify_rx.recv(), if self.notify_open => {
                    match notification {
                        Some(varbinds) => {
                            let packet_id = self.next_packet_id();
                            let pdu = Pdu::notify(session_id, packet_id, varbinds);
                            transport.send(&pdu.encode()).await?;
                        }
                        None => {
                            // Trap engine gone; keep serving requests.
                            self.notify_open = false;
                        }
                    }
                }
                frame = transport.read_frame() => {
                    let (header, payload) = frame?;
                    let pdu = Pdu::decode(header, payload)?;
                    self.handle_pdu(transport, pdu).await?;
                }
            }
        }
    }

    async fn handle_pdu(&mut self, transport: &mut MasterTransport, pdu: Pdu) -> Result<()> {
        match pdu.header.ty {
            PduType::Response => {
                // Responses here acknowledge our Notify PDUs.
                if let Payload::Response { error, .. } = &pdu.payload {
                    if *error != resp_error::NO_AGENTX_ERROR {
                        warn!(error = *error, "master rejected notification");
                    }
                }
                Ok(())
            }
            PduType::Close => {
                info!("master closed the session");
                let response = Pdu::response_to(
                    &pdu.header,
                    self.uptime_ticks(),
                    resp_error::NO_AGENTX_ERROR,
                    0,
                    Vec::new(),
                );
                let _ = transport.send(&response.encode()).await;
                transport.close().await;
                Err(Error::Transport {
                    source: std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "session closed by master",
                    ),
                })
            }
            _ => {
                let uptime = self.uptime_ticks();
                if let Some(response) = dispatch::respond(&self.tree, uptime, &pdu) {
                    transport.send(&response.encode()).await?;
                }
                Ok(())
            }
        }
    }
}
