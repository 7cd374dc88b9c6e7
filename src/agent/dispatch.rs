//! Request dispatcher.
//!
//! Pure translation from a decoded request PDU and the current MIB snapshot
//! to a Response PDU. A getter that panics is contained here: it becomes
//! genErr with the offending 1-based index and the response is still sent.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

use crate::mib::{GetOutcome, MibTree};
use crate::oid::Oid;
use crate::pdu::{resp_error, Payload, Pdu, PduType, SearchRange};
use crate::value::Value;
use crate::varbind::VarBind;

/// Hard ceiling on response VarBinds, bounding GetBulk responses.
pub const MAX_RESPONSE_VARBINDS: usize = 10_000;

struct ResponseBuilder {
    varbinds: Vec<VarBind>,
    error: u16,
    index: u16,
}

impl ResponseBuilder {
    fn new() -> Self {
        Self {
            varbinds: Vec::new(),
            error: resp_error::NO_AGENTX_ERROR,
            index: 0,
        }
    }

    fn full(&self) -> bool {
        self.varbinds.len() >= MAX_RESPONSE_VARBINDS
    }

    fn bind(&mut self, name: Oid, value: Value) {
        self.varbinds.push(VarBind::new(name, value));
    }

    fn fail(&mut self, position: usize, name: Oid) {
        self.bind(name, Value::Null);
        if self.error == resp_error::NO_AGENTX_ERROR {
            self.error = resp_error::GEN_ERR;
            self.index = position as u16;
        }
    }
}

fn guarded<T>(oid: &Oid, what: &str, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(oid = %oid, what, "leaf getter panicked; answering genErr");
            None
        }
    }
}

fn bind_get(tree: &MibTree, builder: &mut ResponseBuilder, position: usize, range: &SearchRange) {
    match guarded(&range.start, "get", || tree.get_value(&range.start)) {
        Some(GetOutcome::Value(value)) => builder.bind(range.start.clone(), value),
        Some(GetOutcome::NoSuchInstance) => {
            builder.bind(range.start.clone(), Value::NoSuchInstance)
        }
        Some(GetOutcome::NoSuchObject) => builder.bind(range.start.clone(), Value::NoSuchObject),
        None => builder.fail(position, range.start.clone()),
    }
}

/// One GetNext step bounded by the range's exclusive end OID. Returns the
/// OID the cursor should advance to for GetBulk repetitions.
fn bind_next(
    tree: &MibTree,
    builder: &mut ResponseBuilder,
    position: usize,
    start: &Oid,
    include: bool,
    end: &Oid,
) -> Option<Oid> {
    match guarded(start, "get_next", || tree.next_value(start, include)) {
        Some(Some((next_oid, value))) if end.is_empty() || next_oid < *end => {
            builder.bind(next_oid.clone(), value);
            Some(next_oid)
        }
        Some(_) => {
            builder.bind(start.clone(), Value::EndOfMibView);
            None
        }
        None => {
            builder.fail(position, start.clone());
            None
        }
    }
}

fn get_response(tree: &MibTree, ranges: &[SearchRange]) -> ResponseBuilder {
    let mut builder = ResponseBuilder::new();
    for (i, range) in ranges.iter().enumerate() {
        if builder.full() {
            break;
        }
        bind_get(tree, &mut builder, i + 1, range);
    }
    builder
}

fn get_next_response(tree: &MibTree, ranges: &[SearchRange]) -> ResponseBuilder {
    let mut builder = ResponseBuilder::new();
    for (i, range) in ranges.iter().enumerate() {
        if builder.full() {
            break;
        }
        bind_next(
            tree,
            &mut builder,
            i + 1,
            &range.start,
            range.include,
            &range.end,
        );
    }
    builder
}

fn get_bulk_response(
    tree: &MibTree,
    non_repeaters: u16,
    max_repetitions: u16,
    ranges: &[SearchRange],
) -> ResponseBuilder {
    let mut builder = ResponseBuilder::new();
    let split = (non_repeaters as usize).min(ranges.len());

    for (i, range) in ranges[..split].iter().enumerate() {
        if builder.full() {
            return builder;
        }
        bind_next(
            tree,
            &mut builder,
            i + 1,
            &range.start,
            range.include,
            &range.end,
        );
    }

    let repeaters = &ranges[split..];
    // Per-range cursor: current OID, include flag, and whether the view
    // already ended (later repetitions then repeat endOfMibView).
    let mut cursors: Vec<(Oid, bool, bool)> = repeaters
        .iter()
        .map(|r| (r.start.clone(), r.include, false))
        .collect();

    for _ in 0..max_repetitions {
        for (j, range) in repeaters.iter().enumerate() {
            if builder.full() {
                return builder;
            }
            let (cursor, include, ended) = cursors[j].clone();
            if ended {
                builder.bind(cursor, Value::EndOfMibView);
                continue;
            }
            let position = split + j + 1;
            match bind_next(tree, &mut builder, position, &cursor, include, &range.end) {
                Some(next_oid) => cursors[j] = (next_oid, false, false),
                None => cursors[j] = (cursor, false, true),
            }
        }
    }
    builder
}

/// Produce the Response for one request PDU, or `None` where the protocol
/// defines no response (CleanupSet, Response frames).
pub fn respond(tree: &MibTree, sys_up_time: u32, request: &Pdu) -> Option<Pdu> {
    let builder = match &request.payload {
        Payload::Get { ranges, .. } => get_response(tree, ranges),
        Payload::GetNext { ranges, .. } => get_next_response(tree, ranges),
        Payload::GetBulk {
            non_repeaters,
            max_repetitions,
            ranges,
            ..
        } => get_bulk_response(tree, *non_repeaters, *max_repetitions, ranges),
        Payload::TestSet { varbinds, .. } => {
            // Read-only agent: refuse the whole SET at its first varbind.
            let mut builder = ResponseBuilder::new();
            builder.error = resp_error::NOT_WRITABLE;
            builder.index = if varbinds.is_empty() { 0 } else { 1 };
            builder
        }
        Payload::CommitSet | Payload::UndoSet => {
            let mut builder = ResponseBuilder::new();
            builder.error = resp_error::GEN_ERR;
            builder.index = 0;
            builder
        }
        Payload::CleanupSet => return None,
        Payload::Ping { .. } => ResponseBuilder::new(),
        Payload::Response { .. } => return None,
        _ => {
            warn!(ty = ?request.header.ty, "unexpected request PDU; answering genErr");
            let mut builder = ResponseBuilder::new();
            builder.error = resp_error::GEN_ERR;
            builder.index = 0;
            builder
        }
    };
    Some(Pdu::response_to(
        &request.header,
        sys_up_time,
        builder.error,
        builder.index,
        builder.varbinds,
    ))
}

/// True for PDU types the dispatcher should see at all.
pub fn is_request(ty: PduType) -> bool {
    !matches!(ty, PduType::Response | PduType::Open | PduType::Close)
}
