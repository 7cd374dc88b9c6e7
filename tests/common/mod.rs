//! Shared test utilities: an in-process AgentX master over a Unix socket.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

use agentx_subagent::oid::Oid;
use agentx_subagent::pdu::{
    flags, resp_error, Header, Payload, Pdu, PduType, SearchRange, HEADER_LEN,
};
use agentx_subagent::transport::MasterAddr;
use agentx_subagent::varbind::VarBind;

/// A listening master endpoint in a temp directory.
pub struct TestMaster {
    listener: UnixListener,
    path: PathBuf,
    _dir: tempfile::TempDir,
}

impl TestMaster {
    pub fn bind() -> TestMaster {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agentx.sock");
        let listener = UnixListener::bind(&path).expect("bind unix socket");
        TestMaster {
            listener,
            path,
            _dir: dir,
        }
    }

    pub fn addr(&self) -> MasterAddr {
        MasterAddr::Unix(self.path.clone())
    }

    /// Accept one sub-agent connection and complete the Open handshake,
    /// assigning `session_id`.
    pub async fn accept(&self, session_id: u32) -> MasterConn {
        let (stream, _) = self.listener.accept().await.expect("accept");
        let mut conn = MasterConn {
            stream,
            session_id,
            next_packet_id: 1000,
        };
        let open = conn.read_pdu().await;
        assert_eq!(open.header.ty, PduType::Open);
        match &open.payload {
            Payload::Open {
                timeout,
                descriptor,
                ..
            } => {
                assert_eq!(*timeout, 5);
                assert!(descriptor.contains("AgentX sub-agent"));
            }
            other => panic!("expected Open payload, got {:?}", other),
        }
        conn.respond(&open.header, resp_error::NO_AGENTX_ERROR).await;
        conn
    }
}

/// One accepted master-side connection.
pub struct MasterConn {
    stream: UnixStream,
    pub session_id: u32,
    next_packet_id: u32,
}

impl MasterConn {
    fn next_packet_id(&mut self) -> u32 {
        self.next_packet_id += 1;
        self.next_packet_id
    }

    pub async fn read_pdu(&mut self) -> Pdu {
        let mut header_buf = [0u8; HEADER_LEN];
        self.stream
            .read_exact(&mut header_buf)
            .await
            .expect("read header");
        let header = Header::decode(&header_buf).expect("decode header");
        let mut payload = vec![0u8; header.payload_length as usize];
        self.stream
            .read_exact(&mut payload)
            .await
            .expect("read payload");
        Pdu::decode(header, Bytes::from(payload)).expect("decode pdu")
    }

    pub async fn try_read_pdu(&mut self, wait: Duration) -> Option<Pdu> {
        tokio::time::timeout(wait, self.read_pdu()).await.ok()
    }

    pub async fn send_pdu(&mut self, pdu: &Pdu) {
        self.stream
            .write_all(&pdu.encode())
            .await
            .expect("write pdu");
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write raw");
    }

    /// Send a Response for an agent-initiated PDU (Open, Register, Notify).
    pub async fn respond(&mut self, request: &Header, error: u16) {
        let pdu = Pdu {
            header: Header {
                ty: PduType::Response,
                flags: flags::NETWORK_BYTE_ORDER,
                session_id: self.session_id,
                transaction_id: request.transaction_id,
                packet_id: request.packet_id,
                payload_length: 0,
            },
            payload: Payload::Response {
                sys_up_time: 0,
                error,
                index: 0,
                varbinds: Vec::new(),
            },
        };
        self.send_pdu(&pdu).await;
    }

    /// Consume the agent's Register sweep, answering noError, and assert
    /// the expected subtrees (in any order).
    pub async fn expect_registrations(&mut self, expected: &[Oid]) {
        let mut seen = Vec::new();
        for _ in 0..expected.len() {
            let pdu = self.read_pdu().await;
            assert_eq!(pdu.header.ty, PduType::Register);
            assert_eq!(pdu.header.session_id, self.session_id);
            match &pdu.payload {
                Payload::Register {
                    priority, subtree, ..
                } => {
                    assert_eq!(*priority, 127);
                    seen.push(subtree.clone());
                }
                other => panic!("expected Register payload, got {:?}", other),
            }
            self.respond(&pdu.header, resp_error::NO_AGENTX_ERROR).await;
        }
        let mut want = expected.to_vec();
        seen.sort();
        want.sort();
        assert_eq!(seen, want);
    }

    fn request_header(&mut self, ty: PduType) -> Header {
        Header {
            ty,
            flags: flags::NETWORK_BYTE_ORDER,
            session_id: self.session_id,
            transaction_id: 7,
            packet_id: self.next_packet_id(),
            payload_length: 0,
        }
    }

    /// Send a request and read PDUs until its Response arrives, acking any
    /// interleaved notifications.
    pub async fn transact(&mut self, pdu: Pdu) -> Pdu {
        let packet_id = pdu.header.packet_id;
        self.send_pdu(&pdu).await;
        loop {
            let pdu = self.read_pdu().await;
            match pdu.header.ty {
                PduType::Response if pdu.header.packet_id == packet_id => return pdu,
                PduType::Notify => {
                    self.respond(&pdu.header, resp_error::NO_AGENTX_ERROR).await;
                }
                other => panic!("unexpected PDU type {:?} awaiting response", other),
            }
        }
    }

    fn response_parts(pdu: Pdu) -> (u16, u16, Vec<VarBind>) {
        match pdu.payload {
            Payload::Response {
                error,
                index,
                varbinds,
                ..
            } => (error, index, varbinds),
            other => panic!("not a response: {:?}", other),
        }
    }

    pub async fn get(&mut self, oids: &[Oid]) -> (u16, u16, Vec<VarBind>) {
        let header = self.request_header(PduType::Get);
        let ranges = oids
            .iter()
            .map(|oid| SearchRange::unbounded(oid.clone(), false))
            .collect();
        let pdu = Pdu {
            header,
            payload: Payload::Get {
                context: None,
                ranges,
            },
        };
        Self::response_parts(self.transact(pdu).await)
    }

    pub async fn get_next(&mut self, start: &Oid, include: bool) -> (u16, Vec<VarBind>) {
        let header = self.request_header(PduType::GetNext);
        let pdu = Pdu {
            header,
            payload: Payload::GetNext {
                context: None,
                ranges: vec![SearchRange::unbounded(start.clone(), include)],
            },
        };
        let (error, _, varbinds) = Self::response_parts(self.transact(pdu).await);
        (error, varbinds)
    }

    pub async fn get_bulk(
        &mut self,
        non_repeaters: u16,
        max_repetitions: u16,
        starts: &[Oid],
    ) -> (u16, Vec<VarBind>) {
        let header = self.request_header(PduType::GetBulk);
        let ranges = starts
            .iter()
            .map(|oid| SearchRange::unbounded(oid.clone(), false))
            .collect();
        let pdu = Pdu {
            header,
            payload: Payload::GetBulk {
                context: None,
                non_repeaters,
                max_repetitions,
                ranges,
            },
        };
        let (error, _, varbinds) = Self::response_parts(self.transact(pdu).await);
        (error, varbinds)
    }

    /// Read until a Notify arrives; ack it and return its varbinds.
    pub async fn read_notify(&mut self) -> Vec<VarBind> {
        loop {
            let pdu = self.read_pdu().await;
            if pdu.header.ty == PduType::Notify {
                assert_eq!(pdu.header.session_id, self.session_id);
                self.respond(&pdu.header, resp_error::NO_AGENTX_ERROR).await;
                match pdu.payload {
                    Payload::Notify { varbinds, .. } => return varbinds,
                    other => panic!("not a notify payload: {:?}", other),
                }
            }
        }
    }
}
