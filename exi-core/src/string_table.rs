//! Value partitions: string deduplication by compact identifiers.
//!
//! Both ends replay the same insertion schedule, so the tables never need
//! explicit synchronization; a miss inserts into the local partition of the
//! owning qualified name and into the global partition, and identifiers are
//! dense in insertion order.

use rustc_hash::FxHashMap;

use crate::names::QNameId;

/// Outcome of looking up a value on the encoding side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
    /// Present in the local partition of the owning qualified name.
    LocalHit(u32),
    /// Present only in the global partition.
    GlobalHit(u32),
    /// Not present; the literal must be written.
    Miss,
}

#[derive(Debug)]
pub(crate) struct StringTable {
    /// Global id to value.
    values: Vec<String>,
    global_index: FxHashMap<String, u32>,
    /// Local partitions; entries are global ids, the index is the local id.
    locals: FxHashMap<QNameId, Vec<u32>>,
    local_index: FxHashMap<(QNameId, u32), u32>,
    local_partitions: bool,
    capacity: Option<usize>,
    value_max_length: Option<usize>,
}

impl StringTable {
    pub(crate) fn new(
        local_partitions: bool,
        capacity: Option<usize>,
        value_max_length: Option<usize>,
    ) -> Self {
        Self {
            values: Vec::new(),
            global_index: FxHashMap::default(),
            locals: FxHashMap::default(),
            local_index: FxHashMap::default(),
            local_partitions,
            capacity,
            value_max_length,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
        self.global_index.clear();
        self.locals.clear();
        self.local_index.clear();
    }

    pub(crate) fn lookup(&self, qname: QNameId, value: &str) -> Lookup {
        let Some(&global_id) = self.global_index.get(value) else {
            return Lookup::Miss;
        };

        if self.local_partitions {
            if let Some(&local_id) = self.local_index.get(&(qname, global_id)) {
                return Lookup::LocalHit(local_id);
            }
        }

        Lookup::GlobalHit(global_id)
    }

    /// Insert after a miss. Values beyond `valueMaxLength` and values
    /// arriving once the global partition is at capacity are not inserted;
    /// they re-encode as misses, which keeps identifiers stable on both
    /// ends.
    pub(crate) fn insert(&mut self, qname: QNameId, value: &str) {
        if let Some(max) = self.value_max_length {
            if value.chars().count() > max {
                return;
            }
        }
        if let Some(cap) = self.capacity {
            if self.values.len() >= cap {
                return;
            }
        }

        let global_id = self.values.len() as u32;
        self.values.push(value.to_string());
        self.global_index.insert(value.to_string(), global_id);

        if self.local_partitions {
            let partition = self.locals.entry(qname).or_default();
            let local_id = partition.len() as u32;
            partition.push(global_id);
            self.local_index.insert((qname, global_id), local_id);
        }
    }

    pub(crate) fn global_size(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn local_size(&self, qname: QNameId) -> usize {
        self.locals.get(&qname).map_or(0, Vec::len)
    }

    pub(crate) fn global_value(&self, global_id: u32) -> Option<&str> {
        self.values.get(global_id as usize).map(String::as_str)
    }

    pub(crate) fn local_value(&self, qname: QNameId, local_id: u32) -> Option<&str> {
        let global_id = *self.locals.get(&qname)?.get(local_id as usize)?;
        self.global_value(global_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const Q1: QNameId = QNameId { uri: 3, local: 0 };
    const Q2: QNameId = QNameId { uri: 3, local: 1 };

    #[test]
    fn local_then_global_hits() {
        let mut table = StringTable::new(true, None, None);
        assert_eq!(table.lookup(Q1, "hi"), Lookup::Miss);
        table.insert(Q1, "hi");

        assert_eq!(table.lookup(Q1, "hi"), Lookup::LocalHit(0));
        assert_eq!(table.lookup(Q2, "hi"), Lookup::GlobalHit(0));

        table.insert(Q2, "hi");
        assert_eq!(table.lookup(Q2, "hi"), Lookup::LocalHit(0));
        assert_eq!(table.global_size(), 2);
    }

    #[test]
    fn disabled_local_partitions() {
        let mut table = StringTable::new(false, None, None);
        table.insert(Q1, "hi");
        assert_eq!(table.lookup(Q1, "hi"), Lookup::GlobalHit(0));
        assert_eq!(table.local_size(Q1), 0);
    }

    #[test]
    fn capacity_stops_insertions() {
        let mut table = StringTable::new(true, Some(1), None);
        table.insert(Q1, "a");
        table.insert(Q1, "b");
        assert_eq!(table.lookup(Q1, "a"), Lookup::LocalHit(0));
        assert_eq!(table.lookup(Q1, "b"), Lookup::Miss);
        assert_eq!(table.global_size(), 1);
    }

    #[test]
    fn zero_capacity_never_inserts() {
        let mut table = StringTable::new(true, Some(0), None);
        table.insert(Q1, "a");
        assert_eq!(table.lookup(Q1, "a"), Lookup::Miss);
    }

    #[test]
    fn value_max_length_boundary() {
        let mut table = StringTable::new(true, None, Some(2));
        table.insert(Q1, "ab");
        table.insert(Q1, "abc");
        assert_eq!(table.lookup(Q1, "ab"), Lookup::LocalHit(0));
        assert_eq!(table.lookup(Q1, "abc"), Lookup::Miss);
    }

    #[test]
    fn decoder_side_resolution() {
        let mut table = StringTable::new(true, None, None);
        table.insert(Q1, "x");
        table.insert(Q2, "y");
        assert_eq!(table.local_value(Q2, 0), Some("y"));
        assert_eq!(table.global_value(1), Some("y"));
        assert_eq!(table.local_value(Q1, 1), None);
    }
}
