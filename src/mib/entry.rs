//! MIB entry kinds.
//!
//! An entry answers `get` for an exact instance and `next` for range walks.
//! Getters are synchronous closures over snapshots already published by an
//! updater; nothing here touches the store.

use std::fmt;
use std::sync::Arc;

use crate::oid::Oid;
use crate::value::Value;

/// Getter for a single-OID leaf.
pub type ScalarGetter = Box<dyn Fn() -> Option<Value> + Send + Sync>;

/// Getter receiving the trailing sub-ids after the entry's prefix.
pub type SubIdGetter = Box<dyn Fn(&[u32]) -> Option<Value> + Send + Sync>;

/// Walk cursor over a subtree's instance sub-ids.
///
/// Implementations read the updater's current snapshot; the returned sub-id
/// must be `>= sub_id` (`>` when `include` is false) and instances must come
/// out in lexicographic order.
pub trait SubtreeIndex: Send + Sync {
    fn next(&self, sub_id: &[u32], include: bool) -> Option<Oid>;
}

/// Binary-search cursor over an already-sorted sub-id list.
///
/// The building block for [`SubtreeIndex`] implementations that publish a
/// sorted `Vec<Oid>` per update cycle.
pub fn next_in_sorted(list: &[Oid], sub_id: &[u32], include: bool) -> Option<Oid> {
    let idx = list.partition_point(|x| x.as_slice() < sub_id);
    let hit = list.get(idx)?;
    if hit.as_slice() == sub_id && !include {
        list.get(idx + 1).cloned()
    } else {
        Some(hit.clone())
    }
}

/// A leaf of the MIB tree.
pub enum MibEntry {
    /// Exact-match leaf; answers only the empty trailing sub-id.
    Scalar(ScalarGetter),
    /// Answers any extension of its prefix; not walkable.
    OidLeaf(SubIdGetter),
    /// Walker-backed table column or subtree.
    Subtree {
        index: Arc<dyn SubtreeIndex>,
        getter: SubIdGetter,
    },
    /// A consulted first; B answers when A has no instance.
    Overlay(Box<MibEntry>, Box<MibEntry>),
}

impl MibEntry {
    pub fn scalar(getter: impl Fn() -> Option<Value> + Send + Sync + 'static) -> MibEntry {
        MibEntry::Scalar(Box::new(getter))
    }

    pub fn oid_leaf(getter: impl Fn(&[u32]) -> Option<Value> + Send + Sync + 'static) -> MibEntry {
        MibEntry::OidLeaf(Box::new(getter))
    }

    pub fn subtree(
        index: Arc<dyn SubtreeIndex>,
        getter: impl Fn(&[u32]) -> Option<Value> + Send + Sync + 'static,
    ) -> MibEntry {
        MibEntry::Subtree {
            index,
            getter: Box::new(getter),
        }
    }

    pub fn overlay(a: MibEntry, b: MibEntry) -> MibEntry {
        MibEntry::Overlay(Box::new(a), Box::new(b))
    }

    /// Value for an instance, `None` meaning no-such-instance.
    pub fn get(&self, sub_id: &[u32]) -> Option<Value> {
        match self {
            MibEntry::Scalar(getter) => {
                if sub_id.is_empty() {
                    getter()
                } else {
                    None
                }
            }
            MibEntry::OidLeaf(getter) => getter(sub_id),
            MibEntry::Subtree { getter, .. } => getter(sub_id),
            MibEntry::Overlay(a, b) => a.get(sub_id).or_else(|| b.get(sub_id)),
        }
    }

    /// Smallest instance sub-id `>= sub_id` (`>` when `include` is false),
    /// or `None` at end of view.
    pub fn next(&self, sub_id: &[u32], include: bool) -> Option<Oid> {
        match self {
            MibEntry::Scalar(getter) => {
                // The scalar's only instance is the empty sub-id, which is
                // the lexicographic minimum.
                if sub_id.is_empty() && include && getter().is_some() {
                    Some(Oid::empty())
                } else {
                    None
                }
            }
            MibEntry::OidLeaf(_) => None,
            MibEntry::Subtree { index, .. } => index.next(sub_id, include),
            MibEntry::Overlay(a, b) => {
                match (a.next(sub_id, include), b.next(sub_id, include)) {
                    (Some(x), Some(y)) => Some(x.min(y)),
                    (Some(x), None) => Some(x),
                    (None, Some(y)) => Some(y),
                    (None, None) => None,
                }
            }
        }
    }
}

impl fmt::Debug for MibEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MibEntry::Scalar(_) => write!(f, "Scalar"),
            MibEntry::OidLeaf(_) => write!(f, "OidLeaf"),
            MibEntry::Subtree { .. } => write!(f, "Subtree"),
            MibEntry::Overlay(a, b) => write!(f, "Overlay({:?}, {:?})", a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;

    struct FixedIndex(Vec<Oid>);

    impl SubtreeIndex for FixedIndex {
        fn next(&self, sub_id: &[u32], include: bool) -> Option<Oid> {
            next_in_sorted(&self.0, sub_id, include)
        }
    }

    fn subtree_over(rows: Vec<(Oid, i32)>) -> MibEntry {
        let index = Arc::new(FixedIndex(rows.iter().map(|(o, _)| o.clone()).collect()));
        let map: std::collections::HashMap<Vec<u32>, i32> = rows
            .into_iter()
            .map(|(o, v)| (o.as_slice().to_vec(), v))
            .collect();
        MibEntry::subtree(index, move |sub| map.get(sub).copied().map(Value::Integer))
    }

    #[test]
    fn test_scalar_get_and_next() {
        let entry = MibEntry::scalar(|| Some(Value::Integer(7)));
        assert_eq!(entry.get(&[]), Some(Value::Integer(7)));
        assert_eq!(entry.get(&[0]), None);
        assert_eq!(entry.next(&[], true), Some(Oid::empty()));
        assert_eq!(entry.next(&[], false), None);
        assert_eq!(entry.next(&[1], true), None);
    }

    #[test]
    fn test_scalar_without_value_is_skipped() {
        let entry = MibEntry::scalar(|| None);
        assert_eq!(entry.next(&[], true), None);
    }

    #[test]
    fn test_oid_leaf_answers_any_extension() {
        let entry = MibEntry::oid_leaf(|sub| Some(Value::Integer(sub.len() as i32)));
        assert_eq!(entry.get(&[1, 2, 3]), Some(Value::Integer(3)));
        assert_eq!(entry.next(&[], true), None);
    }

    #[test]
    fn test_subtree_walk() {
        let entry = subtree_over(vec![
            (oid!(1), 10),
            (oid!(3), 30),
            (oid!(3, 1), 31),
        ]);
        assert_eq!(entry.get(&[3]), Some(Value::Integer(30)));
        assert_eq!(entry.get(&[2]), None);
        assert_eq!(entry.next(&[], true), Some(oid!(1)));
        assert_eq!(entry.next(&[1], true), Some(oid!(1)));
        assert_eq!(entry.next(&[1], false), Some(oid!(3)));
        assert_eq!(entry.next(&[3], false), Some(oid!(3, 1)));
        assert_eq!(entry.next(&[3, 1], false), None);
    }

    #[test]
    fn test_overlay_prefers_first() {
        let a = subtree_over(vec![(oid!(1), 100), (oid!(3), 300)]);
        let b = subtree_over(vec![(oid!(1), -1), (oid!(2), 200)]);
        let entry = MibEntry::overlay(a, b);

        // A wins on collision; B fills A's gaps.
        assert_eq!(entry.get(&[1]), Some(Value::Integer(100)));
        assert_eq!(entry.get(&[2]), Some(Value::Integer(200)));
        assert_eq!(entry.get(&[3]), Some(Value::Integer(300)));
        assert_eq!(entry.get(&[4]), None);

        // The walk is the ordered merge.
        assert_eq!(entry.next(&[], true), Some(oid!(1)));
        assert_eq!(entry.next(&[1], false), Some(oid!(2)));
        assert_eq!(entry.next(&[2], false), Some(oid!(3)));
        assert_eq!(entry.next(&[3], false), None);
    }

    #[test]
    fn test_next_in_sorted_between_entries() {
        let list = vec![oid!(1, 1), oid!(2, 5), oid!(9)];
        assert_eq!(next_in_sorted(&list, &[1, 7], false), Some(oid!(2, 5)));
        assert_eq!(next_in_sorted(&list, &[9], true), Some(oid!(9)));
        assert_eq!(next_in_sorted(&list, &[9], false), None);
        assert_eq!(next_in_sorted(&list, &[10], true), None);
    }
}
