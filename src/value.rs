//! Value representations carried by VarBinds.

use bytes::Bytes;

use crate::oid::Oid;

/// AgentX value type tags (RFC 2741 section 5.4).
pub mod tag {
    pub const INTEGER: u16 = 2;
    pub const OCTET_STRING: u16 = 4;
    pub const NULL: u16 = 5;
    pub const OBJECT_IDENTIFIER: u16 = 6;
    pub const IP_ADDRESS: u16 = 64;
    pub const COUNTER_32: u16 = 65;
    pub const GAUGE_32: u16 = 66;
    pub const TIME_TICKS: u16 = 67;
    pub const OPAQUE: u16 = 68;
    pub const COUNTER_64: u16 = 70;
    pub const NO_SUCH_OBJECT: u16 = 128;
    pub const NO_SUCH_INSTANCE: u16 = 129;
    pub const END_OF_MIB_VIEW: u16 = 130;
}

/// A typed SNMP value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i32),
    OctetString(Bytes),
    Null,
    ObjectIdentifier(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Bytes),
    Counter64(u64),
    /// Response-only: the object type is not implemented here.
    NoSuchObject,
    /// Response-only: the object exists but this instance does not.
    NoSuchInstance,
    /// Response-only: the walk ran off the end of the view.
    EndOfMibView,
}

impl Value {
    /// The on-wire type tag.
    pub fn type_tag(&self) -> u16 {
        match self {
            Value::Integer(_) => tag::INTEGER,
            Value::OctetString(_) => tag::OCTET_STRING,
            Value::Null => tag::NULL,
            Value::ObjectIdentifier(_) => tag::OBJECT_IDENTIFIER,
            Value::IpAddress(_) => tag::IP_ADDRESS,
            Value::Counter32(_) => tag::COUNTER_32,
            Value::Gauge32(_) => tag::GAUGE_32,
            Value::TimeTicks(_) => tag::TIME_TICKS,
            Value::Opaque(_) => tag::OPAQUE,
            Value::Counter64(_) => tag::COUNTER_64,
            Value::NoSuchObject => tag::NO_SUCH_OBJECT,
            Value::NoSuchInstance => tag::NO_SUCH_INSTANCE,
            Value::EndOfMibView => tag::END_OF_MIB_VIEW,
        }
    }

    /// True for the three response-only exception sentinels.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }

    /// An octet string value from UTF-8 text.
    pub fn string(s: impl Into<String>) -> Value {
        Value::OctetString(Bytes::from(s.into()))
    }

    /// An RFC 1213 32-bit counter from a 64-bit reading.
    pub fn counter32_masked(value: u64) -> Value {
        Value::Counter32((value & 0xFFFF_FFFF) as u32)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::OctetString(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "{:?}", s),
                Err(_) => {
                    for byte in b.iter() {
                        write!(f, "{:02x}", byte)?;
                    }
                    Ok(())
                }
            },
            Value::Null => write!(f, "null"),
            Value::ObjectIdentifier(oid) => write!(f, "{}", oid),
            Value::IpAddress(a) => write!(f, "{}.{}.{}.{}", a[0], a[1], a[2], a[3]),
            Value::Counter32(v) => write!(f, "{}", v),
            Value::Gauge32(v) => write!(f, "{}", v),
            Value::TimeTicks(v) => write!(f, "{}", v),
            Value::Opaque(b) => write!(f, "opaque[{}]", b.len()),
            Value::Counter64(v) => write!(f, "{}", v),
            Value::NoSuchObject => write!(f, "noSuchObject"),
            Value::NoSuchInstance => write!(f, "noSuchInstance"),
            Value::EndOfMibView => write!(f, "endOfMibView"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;

    #[test]
    fn test_type_tags() {
        assert_eq!(Value::Integer(1).type_tag(), 2);
        assert_eq!(Value::string("x").type_tag(), 4);
        assert_eq!(Value::Null.type_tag(), 5);
        assert_eq!(Value::ObjectIdentifier(oid!(1, 3)).type_tag(), 6);
        assert_eq!(Value::IpAddress([10, 0, 0, 1]).type_tag(), 64);
        assert_eq!(Value::Counter64(0).type_tag(), 70);
        assert_eq!(Value::EndOfMibView.type_tag(), 130);
    }

    #[test]
    fn test_exceptions() {
        assert!(Value::NoSuchObject.is_exception());
        assert!(Value::NoSuchInstance.is_exception());
        assert!(Value::EndOfMibView.is_exception());
        assert!(!Value::Null.is_exception());
        assert!(!Value::Integer(0).is_exception());
    }

    #[test]
    fn test_counter_masking() {
        assert_eq!(
            Value::counter32_masked(0x1_0000_0001),
            Value::Counter32(1)
        );
        assert_eq!(
            Value::counter32_masked(0xFFFF_FFFF),
            Value::Counter32(u32::MAX)
        );
    }
}
