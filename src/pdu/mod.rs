//! AgentX PDU framing and typed payloads (RFC 2741).
//!
//! A frame is a fixed 20-octet header followed by exactly
//! `payload_length` octets of type-specific payload. Multi-octet fields
//! honor the byte order recorded in the header flags; the agent always
//! emits network byte order.

pub mod wire;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, ProtocolErrorKind, Result};
use crate::oid::Oid;
use crate::varbind::{decode_varbind_list, encode_varbind_list, VarBind};
use wire::{WireReader, WireWriter};

/// Protocol version implemented by this agent.
pub const VERSION: u8 = 1;

/// Fixed header length in octets.
pub const HEADER_LEN: usize = 20;

/// Frame ceiling; a declared payload beyond this is treated as a framing
/// error rather than an allocation request.
pub const MAX_PAYLOAD_LEN: u32 = 1 << 20;

/// Header flag bits.
pub mod flags {
    pub const INSTANCE_REGISTRATION: u8 = 0x01;
    pub const NEW_INDEX: u8 = 0x02;
    pub const ANY_INDEX: u8 = 0x04;
    pub const NON_DEFAULT_CONTEXT: u8 = 0x08;
    pub const NETWORK_BYTE_ORDER: u8 = 0x10;
}

/// Response error codes: SNMPv2 PDU codes for request processing plus the
/// AgentX administrative range.
pub mod resp_error {
    pub const NO_AGENTX_ERROR: u16 = 0;
    pub const GEN_ERR: u16 = 5;
    pub const NOT_WRITABLE: u16 = 17;
    pub const OPEN_FAILED: u16 = 256;
    pub const NOT_OPEN: u16 = 257;
    pub const UNSUPPORTED_CONTEXT: u16 = 262;
    pub const DUPLICATE_REGISTRATION: u16 = 263;
    pub const UNKNOWN_REGISTRATION: u16 = 264;
    pub const PARSE_ERROR: u16 = 266;
    pub const PROCESSING_ERROR: u16 = 268;
}

/// PDU types (RFC 2741 section 6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PduType {
    Open,
    Close,
    Register,
    Unregister,
    Get,
    GetNext,
    GetBulk,
    TestSet,
    CommitSet,
    UndoSet,
    CleanupSet,
    Notify,
    Ping,
    IndexAllocate,
    IndexDeallocate,
    AddAgentCaps,
    RemoveAgentCaps,
    Response,
    /// A type octet outside RFC 2741; answered with genErr, never panics.
    Unknown(u8),
}

impl PduType {
    pub fn from_u8(v: u8) -> PduType {
        match v {
            1 => PduType::Open,
            2 => PduType::Close,
            3 => PduType::Register,
            4 => PduType::Unregister,
            5 => PduType::Get,
            6 => PduType::GetNext,
            7 => PduType::GetBulk,
            8 => PduType::TestSet,
            9 => PduType::CommitSet,
            10 => PduType::UndoSet,
            11 => PduType::CleanupSet,
            12 => PduType::Notify,
            13 => PduType::Ping,
            14 => PduType::IndexAllocate,
            15 => PduType::IndexDeallocate,
            16 => PduType::AddAgentCaps,
            17 => PduType::RemoveAgentCaps,
            18 => PduType::Response,
            other => PduType::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            PduType::Open => 1,
            PduType::Close => 2,
            PduType::Register => 3,
            PduType::Unregister => 4,
            PduType::Get => 5,
            PduType::GetNext => 6,
            PduType::GetBulk => 7,
            PduType::TestSet => 8,
            PduType::CommitSet => 9,
            PduType::UndoSet => 10,
            PduType::CleanupSet => 11,
            PduType::Notify => 12,
            PduType::Ping => 13,
            PduType::IndexAllocate => 14,
            PduType::IndexDeallocate => 15,
            PduType::AddAgentCaps => 16,
            PduType::RemoveAgentCaps => 17,
            PduType::Response => 18,
            PduType::Unknown(v) => v,
        }
    }
}

/// Close reasons (RFC 2741 section 6.2.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Other,
    ParseError,
    ProtocolError,
    Timeouts,
    Shutdown,
    ByManager,
}

impl CloseReason {
    pub fn from_u8(v: u8) -> CloseReason {
        match v {
            2 => CloseReason::ParseError,
            3 => CloseReason::ProtocolError,
            4 => CloseReason::Timeouts,
            5 => CloseReason::Shutdown,
            6 => CloseReason::ByManager,
            _ => CloseReason::Other,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            CloseReason::Other => 1,
            CloseReason::ParseError => 2,
            CloseReason::ProtocolError => 3,
            CloseReason::Timeouts => 4,
            CloseReason::Shutdown => 5,
            CloseReason::ByManager => 6,
        }
    }
}

/// The fixed 20-octet PDU header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub ty: PduType,
    pub flags: u8,
    pub session_id: u32,
    pub transaction_id: u32,
    pub packet_id: u32,
    pub payload_length: u32,
}

impl Header {
    /// True if the frame's multi-octet fields are big-endian.
    pub fn big_endian(&self) -> bool {
        self.flags & flags::NETWORK_BYTE_ORDER != 0
    }

    /// True if the payload starts with a context octet string.
    pub fn has_context(&self) -> bool {
        self.flags & flags::NON_DEFAULT_CONTEXT != 0
    }

    /// Decode a header from exactly [`HEADER_LEN`] octets.
    pub fn decode(buf: &[u8]) -> Result<Header> {
        if buf.len() < HEADER_LEN {
            return Err(Error::protocol(
                0,
                ProtocolErrorKind::Truncated {
                    needed: HEADER_LEN,
                    available: buf.len(),
                },
            ));
        }
        let version = buf[0];
        if version != VERSION {
            return Err(Error::UnsupportedVersion { version });
        }
        let ty = PduType::from_u8(buf[1]);
        let flags = buf[2];
        let big_endian = flags & flags::NETWORK_BYTE_ORDER != 0;

        let word = |i: usize| {
            let arr = [buf[i], buf[i + 1], buf[i + 2], buf[i + 3]];
            if big_endian {
                u32::from_be_bytes(arr)
            } else {
                u32::from_le_bytes(arr)
            }
        };
        let header = Header {
            ty,
            flags,
            session_id: word(4),
            transaction_id: word(8),
            packet_id: word(12),
            payload_length: word(16),
        };
        if header.payload_length > MAX_PAYLOAD_LEN {
            return Err(Error::protocol(
                16,
                ProtocolErrorKind::PayloadTooLarge {
                    length: header.payload_length,
                },
            ));
        }
        Ok(header)
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u8(VERSION);
        out.put_u8(self.ty.as_u8());
        out.put_u8(self.flags | flags::NETWORK_BYTE_ORDER);
        out.put_u8(0);
        out.put_u32(self.session_id);
        out.put_u32(self.transaction_id);
        out.put_u32(self.packet_id);
        out.put_u32(self.payload_length);
    }
}

/// One search range of a Get/GetNext/GetBulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRange {
    pub start: Oid,
    /// Whether `start` itself is an acceptable answer.
    pub include: bool,
    /// Exclusive upper bound; the null OID means unbounded.
    pub end: Oid,
}

impl SearchRange {
    pub fn new(start: Oid, include: bool, end: Oid) -> Self {
        Self {
            start,
            include,
            end,
        }
    }

    /// Range with no upper bound.
    pub fn unbounded(start: Oid, include: bool) -> Self {
        Self::new(start, include, Oid::empty())
    }

    pub fn is_unbounded(&self) -> bool {
        self.end.is_empty()
    }

    fn decode(r: &mut WireReader) -> Result<SearchRange> {
        let (start, include) = r.get_oid()?;
        let (end, _) = r.get_oid()?;
        Ok(SearchRange {
            start,
            include,
            end,
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        w.put_oid(&self.start, self.include);
        w.put_oid(&self.end, false);
    }
}

fn decode_ranges(r: &mut WireReader) -> Result<Vec<SearchRange>> {
    let mut ranges = Vec::new();
    while r.remaining() > 0 {
        ranges.push(SearchRange::decode(r)?);
    }
    Ok(ranges)
}

/// Typed PDU payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Open {
        timeout: u8,
        id: Oid,
        descriptor: String,
    },
    Close {
        reason: CloseReason,
    },
    Register {
        context: Option<Bytes>,
        timeout: u8,
        priority: u8,
        range_subid: u8,
        subtree: Oid,
        upper_bound: Option<u32>,
    },
    Unregister {
        context: Option<Bytes>,
        priority: u8,
        range_subid: u8,
        subtree: Oid,
        upper_bound: Option<u32>,
    },
    Get {
        context: Option<Bytes>,
        ranges: Vec<SearchRange>,
    },
    GetNext {
        context: Option<Bytes>,
        ranges: Vec<SearchRange>,
    },
    GetBulk {
        context: Option<Bytes>,
        non_repeaters: u16,
        max_repetitions: u16,
        ranges: Vec<SearchRange>,
    },
    TestSet {
        context: Option<Bytes>,
        varbinds: Vec<VarBind>,
    },
    CommitSet,
    UndoSet,
    CleanupSet,
    Notify {
        context: Option<Bytes>,
        varbinds: Vec<VarBind>,
    },
    Ping {
        context: Option<Bytes>,
    },
    Response {
        sys_up_time: u32,
        error: u16,
        index: u16,
        varbinds: Vec<VarBind>,
    },
    /// Index/caps operations and unknown types: raw payload retained so a
    /// Response can still be produced.
    Unsupported {
        raw: Bytes,
    },
}

/// A complete PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub header: Header,
    pub payload: Payload,
}

impl Pdu {
    /// Decode a typed payload against its header. The payload slice must be
    /// exactly `header.payload_length` octets and must be consumed exactly.
    pub fn decode(header: Header, payload: Bytes) -> Result<Pdu> {
        if payload.len() != header.payload_length as usize {
            return Err(Error::protocol(
                HEADER_LEN,
                ProtocolErrorKind::PayloadLengthMismatch {
                    declared: header.payload_length,
                    actual: payload.len(),
                },
            ));
        }
        let mut r = WireReader::new(payload.clone(), header.big_endian());
        let decoded = match header.ty {
            PduType::Open => {
                let timeout = r.get_u8()?;
                r.get_u8()?;
                r.get_u8()?;
                r.get_u8()?;
                let (id, _) = r.get_oid()?;
                let descriptor = String::from_utf8_lossy(&r.get_octet_string()?).into_owned();
                Payload::Open {
                    timeout,
                    id,
                    descriptor,
                }
            }
            PduType::Close => {
                let reason = CloseReason::from_u8(r.get_u8()?);
                r.get_u8()?;
                r.get_u8()?;
                r.get_u8()?;
                Payload::Close { reason }
            }
            PduType::Register => {
                let context = decode_context(&header, &mut r)?;
                let timeout = r.get_u8()?;
                let priority = r.get_u8()?;
                let range_subid = r.get_u8()?;
                r.get_u8()?;
                let (subtree, _) = r.get_oid()?;
                let upper_bound = if range_subid != 0 {
                    Some(r.get_u32()?)
                } else {
                    None
                };
                Payload::Register {
                    context,
                    timeout,
                    priority,
                    range_subid,
                    subtree,
                    upper_bound,
                }
            }
            PduType::Unregister => {
                let context = decode_context(&header, &mut r)?;
                r.get_u8()?;
                let priority = r.get_u8()?;
                let range_subid = r.get_u8()?;
                r.get_u8()?;
                let (subtree, _) = r.get_oid()?;
                let upper_bound = if range_subid != 0 {
                    Some(r.get_u32()?)
                } else {
                    None
                };
                Payload::Unregister {
                    context,
                    priority,
                    range_subid,
                    subtree,
                    upper_bound,
                }
            }
            PduType::Get => {
                let context = decode_context(&header, &mut r)?;
                Payload::Get {
                    context,
                    ranges: decode_ranges(&mut r)?,
                }
            }
            PduType::GetNext => {
                let context = decode_context(&header, &mut r)?;
                Payload::GetNext {
                    context,
                    ranges: decode_ranges(&mut r)?,
                }
            }
            PduType::GetBulk => {
                let context = decode_context(&header, &mut r)?;
                let non_repeaters = r.get_u16()?;
                let max_repetitions = r.get_u16()?;
                Payload::GetBulk {
                    context,
                    non_repeaters,
                    max_repetitions,
                    ranges: decode_ranges(&mut r)?,
                }
            }
            PduType::TestSet => {
                let context = decode_context(&header, &mut r)?;
                Payload::TestSet {
                    context,
                    varbinds: decode_varbind_list(&mut r)?,
                }
            }
            PduType::CommitSet => Payload::CommitSet,
            PduType::UndoSet => Payload::UndoSet,
            PduType::CleanupSet => Payload::CleanupSet,
            PduType::Notify => {
                let context = decode_context(&header, &mut r)?;
                Payload::Notify {
                    context,
                    varbinds: decode_varbind_list(&mut r)?,
                }
            }
            PduType::Ping => {
                let context = decode_context(&header, &mut r)?;
                Payload::Ping { context }
            }
            PduType::Response => {
                let sys_up_time = r.get_u32()?;
                let error = r.get_u16()?;
                let index = r.get_u16()?;
                Payload::Response {
                    sys_up_time,
                    error,
                    index,
                    varbinds: decode_varbind_list(&mut r)?,
                }
            }
            PduType::IndexAllocate
            | PduType::IndexDeallocate
            | PduType::AddAgentCaps
            | PduType::RemoveAgentCaps
            | PduType::Unknown(_) => {
                let raw = payload.clone();
                return Ok(Pdu {
                    header,
                    payload: Payload::Unsupported { raw },
                });
            }
        };
        r.expect_exhausted()?;
        Ok(Pdu {
            header,
            payload: decoded,
        })
    }

    /// Encode header + payload into a single frame.
    pub fn encode(&self) -> Bytes {
        let mut w = WireWriter::new();
        let mut flags_out = self.header.flags;
        match &self.payload {
            Payload::Open {
                timeout,
                id,
                descriptor,
            } => {
                w.put_u8(*timeout);
                w.put_u8(0);
                w.put_u8(0);
                w.put_u8(0);
                w.put_oid(id, false);
                w.put_octet_string(descriptor.as_bytes());
            }
            Payload::Close { reason } => {
                w.put_u8(reason.as_u8());
                w.put_u8(0);
                w.put_u8(0);
                w.put_u8(0);
            }
            Payload::Register {
                context,
                timeout,
                priority,
                range_subid,
                subtree,
                upper_bound,
            } => {
                flags_out |= encode_context(context, &mut w);
                w.put_u8(*timeout);
                w.put_u8(*priority);
                w.put_u8(*range_subid);
                w.put_u8(0);
                w.put_oid(subtree, false);
                if let Some(ub) = upper_bound {
                    w.put_u32(*ub);
                }
            }
            Payload::Unregister {
                context,
                priority,
                range_subid,
                subtree,
                upper_bound,
            } => {
                flags_out |= encode_context(context, &mut w);
                w.put_u8(0);
                w.put_u8(*priority);
                w.put_u8(*range_subid);
                w.put_u8(0);
                w.put_oid(subtree, false);
                if let Some(ub) = upper_bound {
                    w.put_u32(*ub);
                }
            }
            Payload::Get { context, ranges } | Payload::GetNext { context, ranges } => {
                flags_out |= encode_context(context, &mut w);
                for range in ranges {
                    range.encode(&mut w);
                }
            }
            Payload::GetBulk {
                context,
                non_repeaters,
                max_repetitions,
                ranges,
            } => {
                flags_out |= encode_context(context, &mut w);
                w.put_u16(*non_repeaters);
                w.put_u16(*max_repetitions);
                for range in ranges {
                    range.encode(&mut w);
                }
            }
            Payload::TestSet { context, varbinds } => {
                flags_out |= encode_context(context, &mut w);
                encode_varbind_list(&mut w, varbinds);
            }
            Payload::CommitSet | Payload::UndoSet | Payload::CleanupSet => {}
            Payload::Notify { context, varbinds } => {
                flags_out |= encode_context(context, &mut w);
                encode_varbind_list(&mut w, varbinds);
            }
            Payload::Ping { context } => {
                flags_out |= encode_context(context, &mut w);
            }
            Payload::Response {
                sys_up_time,
                error,
                index,
                varbinds,
            } => {
                w.put_u32(*sys_up_time);
                w.put_u16(*error);
                w.put_u16(*index);
                encode_varbind_list(&mut w, varbinds);
            }
            Payload::Unsupported { raw } => {
                // Re-emitted verbatim; only used by tests.
                let mut out = BytesMut::with_capacity(HEADER_LEN + raw.len());
                let header = Header {
                    payload_length: raw.len() as u32,
                    ..self.header.clone()
                };
                header.encode(&mut out);
                out.put_slice(raw);
                return out.freeze();
            }
        }

        let payload = w.into_bytes();
        let header = Header {
            flags: flags_out,
            payload_length: payload.len() as u32,
            ..self.header.clone()
        };
        let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
        header.encode(&mut out);
        out.put_slice(&payload);
        out.freeze()
    }
}

fn decode_context(header: &Header, r: &mut WireReader) -> Result<Option<Bytes>> {
    if header.has_context() {
        Ok(Some(r.get_octet_string()?))
    } else {
        Ok(None)
    }
}

fn encode_context(context: &Option<Bytes>, w: &mut WireWriter) -> u8 {
    match context {
        Some(ctx) => {
            w.put_octet_string(ctx);
            flags::NON_DEFAULT_CONTEXT
        }
        None => 0,
    }
}

fn header_for(ty: PduType, session_id: u32, transaction_id: u32, packet_id: u32) -> Header {
    Header {
        ty,
        flags: flags::NETWORK_BYTE_ORDER,
        session_id,
        transaction_id,
        packet_id,
        payload_length: 0,
    }
}

impl Pdu {
    /// Open handshake PDU.
    pub fn open(packet_id: u32, timeout: u8, id: Oid, descriptor: &str) -> Pdu {
        Pdu {
            header: header_for(PduType::Open, 0, 0, packet_id),
            payload: Payload::Open {
                timeout,
                id,
                descriptor: descriptor.to_owned(),
            },
        }
    }

    /// Close PDU for an established session.
    pub fn close(session_id: u32, packet_id: u32, reason: CloseReason) -> Pdu {
        Pdu {
            header: header_for(PduType::Close, session_id, 0, packet_id),
            payload: Payload::Close { reason },
        }
    }

    /// Register PDU for one subtree.
    pub fn register(
        session_id: u32,
        packet_id: u32,
        timeout: u8,
        priority: u8,
        subtree: Oid,
        range_subid: u8,
        upper_bound: Option<u32>,
    ) -> Pdu {
        Pdu {
            header: header_for(PduType::Register, session_id, 0, packet_id),
            payload: Payload::Register {
                context: None,
                timeout,
                priority,
                range_subid,
                subtree,
                upper_bound,
            },
        }
    }

    /// Notify PDU carrying assembled trap varbinds.
    pub fn notify(session_id: u32, packet_id: u32, varbinds: Vec<VarBind>) -> Pdu {
        Pdu {
            header: header_for(PduType::Notify, session_id, 0, packet_id),
            payload: Payload::Notify {
                context: None,
                varbinds,
            },
        }
    }

    /// Response echoing the request's session, transaction and packet ids.
    pub fn response_to(
        request: &Header,
        sys_up_time: u32,
        error: u16,
        index: u16,
        varbinds: Vec<VarBind>,
    ) -> Pdu {
        Pdu {
            header: header_for(
                PduType::Response,
                request.session_id,
                request.transaction_id,
                request.packet_id,
            ),
            payload: Payload::Response {
                sys_up_time,
                error,
                index,
                varbinds,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use crate::{oid, varbind::VarBind};

    fn roundtrip(pdu: &Pdu) -> Pdu {
        let frame = pdu.encode();
        let header = Header::decode(&frame[..HEADER_LEN]).unwrap();
        assert_eq!(
            header.payload_length as usize,
            frame.len() - HEADER_LEN,
            "declared payload length must match the frame"
        );
        Pdu::decode(header, frame.slice(HEADER_LEN..)).unwrap()
    }

    #[test]
    fn test_open_roundtrip() {
        let pdu = Pdu::open(7, 5, Oid::empty(), "SONiC-like AgentX sub-agent");
        let decoded = roundtrip(&pdu);
        assert_eq!(decoded.header.ty, PduType::Open);
        assert_eq!(decoded.payload, pdu.payload);
    }

    #[test]
    fn test_close_roundtrip() {
        let pdu = Pdu::close(42, 3, CloseReason::Shutdown);
        let decoded = roundtrip(&pdu);
        assert_eq!(decoded.header.session_id, 42);
        assert_eq!(
            decoded.payload,
            Payload::Close {
                reason: CloseReason::Shutdown
            }
        );
    }

    #[test]
    fn test_register_roundtrip() {
        let pdu = Pdu::register(42, 9, 0, 127, oid!(1, 3, 6, 1, 2, 1, 2), 0, None);
        let decoded = roundtrip(&pdu);
        match decoded.payload {
            Payload::Register {
                priority,
                range_subid,
                subtree,
                upper_bound,
                ..
            } => {
                assert_eq!(priority, 127);
                assert_eq!(range_subid, 0);
                assert_eq!(subtree, oid!(1, 3, 6, 1, 2, 1, 2));
                assert_eq!(upper_bound, None);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_register_with_range_roundtrip() {
        let pdu = Pdu::register(42, 9, 0, 127, oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1, 1), 11, Some(64));
        match roundtrip(&pdu).payload {
            Payload::Register {
                range_subid,
                upper_bound,
                ..
            } => {
                assert_eq!(range_subid, 11);
                assert_eq!(upper_bound, Some(64));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_get_roundtrip() {
        let pdu = Pdu {
            header: header_for(PduType::Get, 42, 17, 23),
            payload: Payload::Get {
                context: None,
                ranges: vec![
                    SearchRange::unbounded(oid!(1, 3, 6, 1, 2, 1, 1, 5, 0), false),
                    SearchRange::new(
                        oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1),
                        true,
                        oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2),
                    ),
                ],
            },
        };
        let decoded = roundtrip(&pdu);
        assert_eq!(decoded.header.transaction_id, 17);
        assert_eq!(decoded.payload, pdu.payload);
    }

    #[test]
    fn test_getbulk_roundtrip() {
        let pdu = Pdu {
            header: header_for(PduType::GetBulk, 42, 1, 2),
            payload: Payload::GetBulk {
                context: None,
                non_repeaters: 1,
                max_repetitions: 10,
                ranges: vec![
                    SearchRange::unbounded(oid!(1, 3, 6, 1, 2, 1, 1), false),
                    SearchRange::unbounded(oid!(1, 3, 6, 1, 2, 1, 2), false),
                ],
            },
        };
        assert_eq!(roundtrip(&pdu).payload, pdu.payload);
    }

    #[test]
    fn test_notify_roundtrip() {
        let pdu = Pdu::notify(
            42,
            77,
            vec![
                VarBind::new(
                    oid!(1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0),
                    Value::ObjectIdentifier(oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 3)),
                ),
                VarBind::new(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1, 1), Value::Integer(1)),
            ],
        );
        assert_eq!(roundtrip(&pdu).payload, pdu.payload);
    }

    #[test]
    fn test_response_roundtrip() {
        let request = header_for(PduType::Get, 42, 5, 6);
        let pdu = Pdu::response_to(
            &request,
            1234,
            resp_error::NO_AGENTX_ERROR,
            0,
            vec![VarBind::new(
                oid!(1, 3, 6, 1, 2, 1, 1, 5, 0),
                Value::string("switch1"),
            )],
        );
        let decoded = roundtrip(&pdu);
        assert_eq!(decoded.header.transaction_id, 5);
        assert_eq!(decoded.header.packet_id, 6);
        assert_eq!(decoded.payload, pdu.payload);
    }

    #[test]
    fn test_context_roundtrip() {
        let pdu = Pdu {
            header: header_for(PduType::Get, 1, 2, 3),
            payload: Payload::Get {
                context: Some(Bytes::from_static(b"backplane")),
                ranges: vec![SearchRange::unbounded(oid!(1, 3, 6, 1), true)],
            },
        };
        let frame = pdu.encode();
        let header = Header::decode(&frame[..HEADER_LEN]).unwrap();
        assert!(header.has_context());
        let decoded = Pdu::decode(header, frame.slice(HEADER_LEN..)).unwrap();
        assert_eq!(decoded.payload, pdu.payload);
    }

    #[test]
    fn test_little_endian_request_decodes() {
        // Hand-build a little-endian Get for OID 1.3.6.1.2 with an
        // unbounded range.
        let mut frame = vec![
            VERSION,
            PduType::Get.as_u8(),
            0x00, // no NETWORK_BYTE_ORDER: little-endian
            0x00,
        ];
        frame.extend_from_slice(&42u32.to_le_bytes());
        frame.extend_from_slice(&1u32.to_le_bytes());
        frame.extend_from_slice(&2u32.to_le_bytes());
        // payload: one search range, both OIDs header-only (4 octets each)
        let payload_len = 8u32;
        frame.extend_from_slice(&payload_len.to_le_bytes());
        frame.extend_from_slice(&[0, 2, 1, 0]); // start: n_subid=0 prefix=2 include=1
        frame.extend_from_slice(&[0, 0, 0, 0]); // end: null OID
        let header = Header::decode(&frame[..HEADER_LEN]).unwrap();
        assert!(!header.big_endian());
        assert_eq!(header.session_id, 42);
        let pdu = Pdu::decode(header, Bytes::from(frame[HEADER_LEN..].to_vec())).unwrap();
        match pdu.payload {
            Payload::Get { ranges, .. } => {
                assert_eq!(ranges.len(), 1);
                assert_eq!(ranges[0].start, oid!(1, 3, 6, 1, 2));
                assert!(ranges[0].include);
                assert!(ranges[0].is_unbounded());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut frame = [0u8; HEADER_LEN];
        frame[0] = 2;
        frame[1] = PduType::Get.as_u8();
        frame[2] = flags::NETWORK_BYTE_ORDER;
        assert!(matches!(
            Header::decode(&frame),
            Err(Error::UnsupportedVersion { version: 2 })
        ));
    }

    #[test]
    fn test_payload_length_mismatch_rejected() {
        let header = header_for(PduType::Get, 1, 1, 1);
        let mut header = header;
        header.payload_length = 32;
        let err = Pdu::decode(header, Bytes::from_static(&[0u8; 16])).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol {
                kind: ProtocolErrorKind::PayloadLengthMismatch {
                    declared: 32,
                    actual: 16
                },
                ..
            }
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let pdu = Pdu::close(1, 1, CloseReason::Shutdown);
        let mut frame = BytesMut::from(&pdu.encode()[..]);
        // Append 4 stray octets and fix up payload_length.
        frame.extend_from_slice(&[0, 0, 0, 0]);
        let declared = (frame.len() - HEADER_LEN) as u32;
        frame[16..20].copy_from_slice(&declared.to_be_bytes());
        let frame = frame.freeze();
        let header = Header::decode(&frame[..HEADER_LEN]).unwrap();
        let err = Pdu::decode(header, frame.slice(HEADER_LEN..)).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol {
                kind: ProtocolErrorKind::TrailingBytes { count: 4 },
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_type_keeps_raw_payload() {
        let header = Header {
            ty: PduType::Unknown(99),
            flags: flags::NETWORK_BYTE_ORDER,
            session_id: 1,
            transaction_id: 2,
            packet_id: 3,
            payload_length: 4,
        };
        let pdu = Pdu::decode(header, Bytes::from_static(&[1, 2, 3, 4])).unwrap();
        assert!(matches!(pdu.payload, Payload::Unsupported { .. }));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut frame = [0u8; HEADER_LEN];
        frame[0] = VERSION;
        frame[1] = PduType::Get.as_u8();
        frame[2] = flags::NETWORK_BYTE_ORDER;
        frame[16..20].copy_from_slice(&(MAX_PAYLOAD_LEN + 1).to_be_bytes());
        assert!(matches!(
            Header::decode(&frame),
            Err(Error::Protocol {
                kind: ProtocolErrorKind::PayloadTooLarge { .. },
                ..
            })
        ));
    }
}
