//! AgentX (RFC 2741) SNMP sub-agent for switch state.
//!
//! The agent reads operational state from a set of Redis-style key-value
//! databases, maps it into registered portions of the OID tree, answers
//! master-initiated GET/GETNEXT/GETBULK requests, and emits notifications
//! on semantically meaningful keyspace events.
//!
//! Architecture:
//!
//! - [`pdu`] - wire codec: framing, header, typed payloads.
//! - [`mib`] - the frozen prefix-indexed dispatch tree and updater contract.
//! - [`agent`] - supervisor, AgentX session state machine, request
//!   dispatcher, updater scheduler.
//! - [`trap`] - keyspace-event subscriber, pattern matching, trap handlers.
//! - [`store`] - the store abstraction the core consumes.
//! - [`transport`] - master endpoint discovery and the transport itself.

use std::future::Future;
use std::pin::Pin;

pub mod agent;
pub mod error;
pub mod mib;
pub mod mibs;
pub mod oid;
pub mod pdu;
pub mod store;
pub mod transport;
pub mod trap;
pub mod value;
pub mod varbind;

pub use error::{Error, Result};
pub use oid::Oid;
pub use value::Value;
pub use varbind::VarBind;

/// Boxed async return type for dyn-compatible trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
