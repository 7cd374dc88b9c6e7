//! The frozen MIB dispatch tree and its builder.
//!
//! Modules declare leaves relative to a per-module prefix; the builder
//! computes absolute OIDs and freezes everything into an immutable,
//! prefix-sorted tree at startup.

use std::sync::Arc;

use tracing::warn;

use crate::mib::entry::{MibEntry, SubtreeIndex};
use crate::mib::updater::MibUpdater;
use crate::oid::Oid;
use crate::value::Value;

/// Registration priority declared to the master; lower is preferred.
pub const AGENT_PRIORITY: u8 = 127;

/// One subtree registration announced during the session handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub subtree: Oid,
    pub priority: u8,
    pub range_subid: u8,
    pub upper_bound: Option<u32>,
}

/// A MIB module contributes leaves to the builder.
pub trait MibModule {
    fn register(&self, builder: &mut MibBuilder);
}

/// Result of an exact lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum GetOutcome {
    Value(Value),
    /// A leaf owns the OID but has no such instance.
    NoSuchInstance,
    /// No leaf matches the OID at all.
    NoSuchObject,
}

/// Collects leaf declarations before freezing.
#[derive(Default)]
pub struct MibBuilder {
    entries: Vec<(Oid, MibEntry)>,
    registrations: Vec<Registration>,
    updaters: Vec<Arc<dyn MibUpdater>>,
}

impl MibBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a module rooted at `prefix`; the prefix is also announced as a
    /// subtree registration.
    pub fn module(&mut self, prefix: Oid) -> ModuleBuilder<'_> {
        self.registrations.push(Registration {
            subtree: prefix.clone(),
            priority: AGENT_PRIORITY,
            range_subid: 0,
            upper_bound: None,
        });
        ModuleBuilder {
            builder: self,
            prefix,
        }
    }

    /// Track an updater for the scheduler; duplicates are collapsed.
    pub fn updater(&mut self, updater: Arc<dyn MibUpdater>) {
        if !self.updaters.iter().any(|u| Arc::ptr_eq(u, &updater)) {
            self.updaters.push(updater);
        }
    }

    /// Sort and freeze into an immutable tree.
    pub fn freeze(mut self) -> MibTree {
        self.entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        for pair in self.entries.windows(2) {
            if pair[0].0 == pair[1].0 {
                warn!(oid = %pair[0].0, "duplicate MIB entry prefix; first declaration wins on get");
            }
        }
        MibTree {
            entries: self.entries,
            registrations: self.registrations,
            updaters: self.updaters,
        }
    }
}

/// Declares leaves under one module prefix.
pub struct ModuleBuilder<'a> {
    builder: &'a mut MibBuilder,
    prefix: Oid,
}

impl ModuleBuilder<'_> {
    /// Attach a pre-built entry at `rel` below the module prefix.
    pub fn entry(&mut self, rel: &[u32], entry: MibEntry) -> &mut Self {
        self.builder
            .entries
            .push((self.prefix.extended(rel), entry));
        self
    }

    pub fn scalar(
        &mut self,
        rel: &[u32],
        getter: impl Fn() -> Option<Value> + Send + Sync + 'static,
    ) -> &mut Self {
        self.entry(rel, MibEntry::scalar(getter))
    }

    pub fn oid_leaf(
        &mut self,
        rel: &[u32],
        getter: impl Fn(&[u32]) -> Option<Value> + Send + Sync + 'static,
    ) -> &mut Self {
        self.entry(rel, MibEntry::oid_leaf(getter))
    }

    pub fn subtree(
        &mut self,
        rel: &[u32],
        index: Arc<dyn SubtreeIndex>,
        getter: impl Fn(&[u32]) -> Option<Value> + Send + Sync + 'static,
    ) -> &mut Self {
        self.entry(rel, MibEntry::subtree(index, getter))
    }

    pub fn updater(&mut self, updater: Arc<dyn MibUpdater>) -> &mut Self {
        self.builder.updater(updater);
        self
    }
}

/// The immutable dispatch tree.
pub struct MibTree {
    /// Sorted by absolute prefix.
    entries: Vec<(Oid, MibEntry)>,
    registrations: Vec<Registration>,
    updaters: Vec<Arc<dyn MibUpdater>>,
}

impl MibTree {
    /// Subtrees to Register with the master.
    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    /// De-duplicated updaters for the scheduler.
    pub fn updaters(&self) -> &[Arc<dyn MibUpdater>] {
        &self.updaters
    }

    /// Number of leaves, for startup logging.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Locate the longest-prefix leaf for an exact lookup, returning the
    /// trailing sub-ids.
    pub fn for_get<'a>(&self, oid: &'a Oid) -> Option<(&MibEntry, &'a [u32])> {
        let cut = self.entries.partition_point(|(p, _)| p <= oid);
        // Prefixes of `oid` sort before it, and among them longer ones sort
        // later, so the first match scanning backwards is the most specific.
        for (prefix, entry) in self.entries[..cut].iter().rev() {
            if let Some(sub) = oid.strip_prefix(prefix) {
                return Some((entry, sub));
            }
        }
        None
    }

    /// Exact lookup with the response exception distinction.
    pub fn get_value(&self, oid: &Oid) -> GetOutcome {
        match self.for_get(oid) {
            Some((entry, sub)) => match entry.get(sub) {
                Some(value) => GetOutcome::Value(value),
                None => GetOutcome::NoSuchInstance,
            },
            None => GetOutcome::NoSuchObject,
        }
    }

    fn locate_next(&self, oid: &Oid, include: bool) -> Option<(usize, Oid)> {
        let mut best: Option<(usize, Oid)> = None;
        for (i, (prefix, entry)) in self.entries.iter().enumerate() {
            let candidate = if let Some(sub) = oid.strip_prefix(prefix) {
                entry.next(sub, include)
            } else if prefix > oid {
                // The whole subtree lies after the target.
                entry.next(&[], true)
            } else {
                None
            };
            let Some(sub) = candidate else { continue };
            let next_oid = prefix.extended(sub.as_slice());
            let better = match &best {
                None => true,
                Some((best_idx, best_oid)) => {
                    next_oid < *best_oid
                        || (next_oid == *best_oid
                            && prefix.len() > self.entries[*best_idx].0.len())
                }
            };
            if better {
                best = Some((i, next_oid));
            }
        }
        best
    }

    /// The next OID `>= oid` (`>` if `include` is false) some leaf can
    /// answer, walking forward across leaves on end-of-view.
    pub fn for_get_next(&self, oid: &Oid, include: bool) -> Option<(&MibEntry, Oid)> {
        self.locate_next(oid, include)
            .map(|(idx, next)| (&self.entries[idx].1, next))
    }

    /// `for_get_next` plus value fetch, skipping instances whose getter
    /// comes back empty (a snapshot raced away underneath the index).
    pub fn next_value(&self, oid: &Oid, include: bool) -> Option<(Oid, Value)> {
        let mut cursor = oid.clone();
        let mut include = include;
        loop {
            let (idx, next_oid) = self.locate_next(&cursor, include)?;
            let (prefix, entry) = &self.entries[idx];
            let sub = next_oid.strip_prefix(prefix)?;
            if let Some(value) = entry.get(sub) {
                return Some((next_oid, value));
            }
            cursor = next_oid;
            include = false;
        }
    }
}

impl std::fmt::Debug for MibTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MibTree")
            .field("entries", &self.entries.len())
            .field("registrations", &self.registrations.len())
            .field("updaters", &self.updaters.len())
            .finish()
    }
}
