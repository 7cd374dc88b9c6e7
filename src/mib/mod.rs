//! MIB dispatch tree: entry kinds, the frozen prefix tree, and the updater
//! contract.

pub mod entry;
pub mod tree;
pub mod updater;

pub use entry::{next_in_sorted, MibEntry, SubtreeIndex};
pub use tree::{GetOutcome, MibBuilder, MibModule, MibTree, ModuleBuilder, Registration, AGENT_PRIORITY};
pub use updater::{MibUpdater, DEFAULT_REINIT_RATE};
