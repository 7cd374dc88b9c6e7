//! Byte-order-aware wire primitives.
//!
//! AgentX frames record their endianness in a header flag; the reader honors
//! whichever order the master chose, the writer always emits network byte
//! order. All reads are bounds-checked and surface [`ProtocolErrorKind`]
//! instead of panicking.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, ProtocolErrorKind, Result};
use crate::oid::{Oid, MAX_SUB_IDS};

/// Common-prefix compression root: a nonzero `prefix` octet N stands for
/// `1.3.6.1.N` prepended to the encoded sub-ids.
const COMPRESSION_ROOT: [u32; 4] = [1, 3, 6, 1];

/// Bounds-checked cursor over a PDU payload.
pub struct WireReader {
    buf: Bytes,
    pos: usize,
    big_endian: bool,
}

impl WireReader {
    /// Wrap a payload; `big_endian` comes from the header flags.
    pub fn new(buf: Bytes, big_endian: bool) -> Self {
        Self {
            buf,
            pos: 0,
            big_endian,
        }
    }

    /// Octets not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current offset, for error reporting.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Fail unless the payload was consumed exactly.
    pub fn expect_exhausted(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            count => Err(Error::protocol(
                self.pos,
                ProtocolErrorKind::TrailingBytes { count },
            )),
        }
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(Error::protocol(
                self.pos,
                ProtocolErrorKind::Truncated {
                    needed: n,
                    available: self.remaining(),
                },
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        let arr = [b[0], b[1]];
        Ok(if self.big_endian {
            u16::from_be_bytes(arr)
        } else {
            u16::from_le_bytes(arr)
        })
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        let arr = [b[0], b[1], b[2], b[3]];
        Ok(if self.big_endian {
            u32::from_be_bytes(arr)
        } else {
            u32::from_le_bytes(arr)
        })
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(if self.big_endian {
            u64::from_be_bytes(arr)
        } else {
            u64::from_le_bytes(arr)
        })
    }

    /// A 4-octet-length-prefixed octet string, padded to a 4-octet boundary.
    pub fn get_octet_string(&mut self) -> Result<Bytes> {
        let start = self.pos;
        let declared = self.get_u32()?;
        let len = declared as usize;
        if self.remaining() < len {
            return Err(Error::protocol(
                start,
                ProtocolErrorKind::BadOctetStringLength { declared },
            ));
        }
        let data = self.buf.slice(self.pos..self.pos + len);
        self.pos += len;
        let pad = (4 - len % 4) % 4;
        self.take(pad)?;
        Ok(data)
    }

    /// An encoded OID plus its `include` octet.
    pub fn get_oid(&mut self) -> Result<(Oid, bool)> {
        let start = self.pos;
        let n_subid = self.get_u8()? as usize;
        let prefix = self.get_u8()?;
        let include = self.get_u8()?;
        let _reserved = self.get_u8()?;

        let expanded = if prefix != 0 { 5 } else { 0 };
        if n_subid + expanded > MAX_SUB_IDS {
            return Err(Error::protocol(
                start,
                ProtocolErrorKind::OidTooLong {
                    count: n_subid + expanded,
                },
            ));
        }

        let mut arcs = Vec::with_capacity(n_subid + expanded);
        if prefix != 0 {
            arcs.extend_from_slice(&COMPRESSION_ROOT);
            arcs.push(u32::from(prefix));
        }
        for _ in 0..n_subid {
            arcs.push(self.get_u32()?);
        }
        let oid = Oid::try_from_slice(&arcs).ok_or_else(|| {
            Error::protocol(start, ProtocolErrorKind::OidTooLong { count: arcs.len() })
        })?;
        Ok((oid, include != 0))
    }
}

/// Payload writer. Always network byte order.
#[derive(Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn put_octet_string(&mut self, data: &[u8]) {
        self.buf.put_u32(data.len() as u32);
        self.buf.put_slice(data);
        let pad = (4 - data.len() % 4) % 4;
        for _ in 0..pad {
            self.buf.put_u8(0);
        }
    }

    /// Encode an OID, compressing a `1.3.6.1.N` prefix when possible.
    pub fn put_oid(&mut self, oid: &Oid, include: bool) {
        let arcs = oid.as_slice();
        let (prefix, rest) = match arcs {
            [1, 3, 6, 1, n, rest @ ..] if *n <= u32::from(u8::MAX) => (*n as u8, rest),
            _ => (0u8, arcs),
        };
        self.buf.put_u8(rest.len() as u8);
        self.buf.put_u8(prefix);
        self.buf.put_u8(u8::from(include));
        self.buf.put_u8(0);
        for arc in rest {
            self.buf.put_u32(*arc);
        }
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}
