//! Variable binding (VarBind) type.
//!
//! A VarBind pairs an OID with a typed value; on the wire it is
//! `(type, reserved, name, data)` with type-specific data encoding.

use crate::error::{Error, ProtocolErrorKind, Result};
use crate::oid::Oid;
use crate::pdu::wire::{WireReader, WireWriter};
use crate::value::{tag, Value};

/// Variable binding - an OID-value pair.
#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    /// The object identifier.
    pub name: Oid,
    /// The value.
    pub value: Value,
}

impl VarBind {
    /// Create a new VarBind.
    pub fn new(name: Oid, value: Value) -> Self {
        Self { name, value }
    }

    /// Create a VarBind with a NULL value.
    pub fn null(name: Oid) -> Self {
        Self {
            name,
            value: Value::Null,
        }
    }

    /// Encode to the wire.
    pub fn encode(&self, w: &mut WireWriter) {
        w.put_u16(self.value.type_tag());
        w.put_u16(0);
        w.put_oid(&self.name, false);
        match &self.value {
            Value::Integer(v) => w.put_u32(*v as u32),
            Value::OctetString(b) | Value::Opaque(b) => w.put_octet_string(b),
            Value::Null | Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView => {}
            Value::ObjectIdentifier(oid) => w.put_oid(oid, false),
            Value::IpAddress(a) => w.put_octet_string(a),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => w.put_u32(*v),
            Value::Counter64(v) => w.put_u64(*v),
        }
    }

    /// Decode from the wire.
    pub fn decode(r: &mut WireReader) -> Result<Self> {
        let start = r.position();
        let ty = r.get_u16()?;
        let _reserved = r.get_u16()?;
        let (name, _include) = r.get_oid()?;
        let value = match ty {
            tag::INTEGER => Value::Integer(r.get_u32()? as i32),
            tag::OCTET_STRING => Value::OctetString(r.get_octet_string()?),
            tag::NULL => Value::Null,
            tag::OBJECT_IDENTIFIER => Value::ObjectIdentifier(r.get_oid()?.0),
            tag::IP_ADDRESS => {
                let raw = r.get_octet_string()?;
                if raw.len() != 4 {
                    return Err(Error::protocol(
                        start,
                        ProtocolErrorKind::BadValueLength {
                            tag: ty,
                            length: raw.len(),
                        },
                    ));
                }
                Value::IpAddress([raw[0], raw[1], raw[2], raw[3]])
            }
            tag::COUNTER_32 => Value::Counter32(r.get_u32()?),
            tag::GAUGE_32 => Value::Gauge32(r.get_u32()?),
            tag::TIME_TICKS => Value::TimeTicks(r.get_u32()?),
            tag::OPAQUE => Value::Opaque(r.get_octet_string()?),
            tag::COUNTER_64 => Value::Counter64(r.get_u64()?),
            tag::NO_SUCH_OBJECT => Value::NoSuchObject,
            tag::NO_SUCH_INSTANCE => Value::NoSuchInstance,
            tag::END_OF_MIB_VIEW => Value::EndOfMibView,
            other => {
                return Err(Error::protocol(
                    start,
                    ProtocolErrorKind::UnknownValueType(other),
                ))
            }
        };
        Ok(VarBind { name, value })
    }
}

impl std::fmt::Display for VarBind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}", self.name, self.value)
    }
}

/// Decode VarBinds until the payload is exhausted.
pub fn decode_varbind_list(r: &mut WireReader) -> Result<Vec<VarBind>> {
    let mut varbinds = Vec::new();
    while r.remaining() > 0 {
        varbinds.push(VarBind::decode(r)?);
    }
    Ok(varbinds)
}

/// Encode a list of VarBinds.
pub fn encode_varbind_list(w: &mut WireWriter, varbinds: &[VarBind]) {
    for vb in varbinds {
        vb.encode(w);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;
    use bytes::Bytes;

    fn roundtrip(vb: &VarBind) -> VarBind {
        let mut w = WireWriter::new();
        vb.encode(&mut w);
        let mut r = WireReader::new(w.into_bytes(), true);
        let out = VarBind::decode(&mut r).unwrap();
        r.expect_exhausted().unwrap();
        out
    }

    #[test]
    fn test_varbind_roundtrip_all_types() {
        let varbinds = vec![
            VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::Integer(-7)),
            VarBind::new(
                oid!(1, 3, 6, 1, 2, 1, 1, 5, 0),
                Value::OctetString(Bytes::from_static(b"switch1")),
            ),
            VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 2, 0), Value::Null),
            VarBind::new(
                oid!(1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0),
                Value::ObjectIdentifier(oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 3)),
            ),
            VarBind::new(
                oid!(1, 3, 6, 1, 2, 1, 4, 20, 1, 1),
                Value::IpAddress([192, 168, 1, 1]),
            ),
            VarBind::new(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 10, 1), Value::Counter32(1000)),
            VarBind::new(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 5, 1), Value::Gauge32(40000)),
            VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 3, 0), Value::TimeTicks(123456)),
            VarBind::new(
                oid!(1, 3, 6, 1, 4, 1, 9, 9, 1),
                Value::Opaque(Bytes::from_static(&[1, 2, 3])),
            ),
            VarBind::new(
                oid!(1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 6, 1),
                Value::Counter64(u64::MAX),
            ),
            VarBind::new(oid!(1, 3, 6, 9), Value::NoSuchObject),
            VarBind::new(oid!(1, 3, 6, 9, 1), Value::NoSuchInstance),
            VarBind::new(oid!(1, 3, 6, 9, 2), Value::EndOfMibView),
        ];
        for vb in &varbinds {
            assert_eq!(&roundtrip(vb), vb);
        }
    }

    #[test]
    fn test_varbind_list_roundtrip() {
        let varbinds = vec![
            VarBind::new(oid!(1, 3, 6, 1), Value::Integer(1)),
            VarBind::new(oid!(1, 3, 6, 2), Value::Integer(2)),
        ];
        let mut w = WireWriter::new();
        encode_varbind_list(&mut w, &varbinds);
        let mut r = WireReader::new(w.into_bytes(), true);
        assert_eq!(decode_varbind_list(&mut r).unwrap(), varbinds);
    }

    #[test]
    fn test_varbind_list_empty() {
        let mut r = WireReader::new(Bytes::new(), true);
        assert!(decode_varbind_list(&mut r).unwrap().is_empty());
    }

    #[test]
    fn test_bad_ip_address_length() {
        let mut w = WireWriter::new();
        w.put_u16(tag::IP_ADDRESS);
        w.put_u16(0);
        w.put_oid(&oid!(1, 3, 6, 1, 4, 1), false);
        w.put_octet_string(&[1, 2, 3]);
        let mut r = WireReader::new(w.into_bytes(), true);
        assert!(VarBind::decode(&mut r).is_err());
    }

    #[test]
    fn test_unknown_type_tag() {
        let mut w = WireWriter::new();
        w.put_u16(99);
        w.put_u16(0);
        w.put_oid(&oid!(1, 3, 6), false);
        let mut r = WireReader::new(w.into_bytes(), true);
        let err = VarBind::decode(&mut r).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol {
                kind: ProtocolErrorKind::UnknownValueType(99),
                ..
            }
        ));
    }

    #[test]
    fn test_varbind_display() {
        let vb = VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::Integer(42));
        let rendered = format!("{}", vb);
        assert!(rendered.contains("1.3.6.1.2.1.1.1.0"));
        assert!(rendered.contains("42"));
    }
}
