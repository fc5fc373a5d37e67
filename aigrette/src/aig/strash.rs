//! The structural-hashing unique table.
//!
//! The table keys AND nodes by their canonical `(f0, f1)` fanin pair with
//! `f0 < f1`. Because the key is self-contained there is no need for
//! context-keyed hashing; a plain `FxHashMap` provides the chaining and
//! load-factor management.

use super::{Lit, Node, NodeData};
use crate::error::{Error, Result};
use crate::fx::FxHashMap;
use cranelift_entity::PrimaryMap;

#[derive(Clone, Default)]
pub(crate) struct StrashTable {
    map: FxHashMap<(Lit, Lit), Node>,
}

impl StrashTable {
    #[inline]
    pub fn lookup(&self, f0: Lit, f1: Lit) -> Option<Node> {
        debug_assert!(f0 < f1);
        self.map.get(&(f0, f1)).copied()
    }

    #[inline]
    pub fn insert(&mut self, f0: Lit, f1: Lit, n: Node) {
        debug_assert!(f0 < f1);
        let prev = self.map.insert((f0, f1), n);
        debug_assert!(prev.is_none(), "duplicate unique-table entry");
    }

    /// Rebuilds the table by one linear pass over the node arena. Raw
    /// appended duplicates keep only their first occurrence; later hashed
    /// construction then resolves to that representative.
    pub fn rebuild(&mut self, nodes: &PrimaryMap<Node, NodeData>) {
        self.map.clear();
        for (n, data) in nodes.iter() {
            if let NodeData::And { f0, f1 } = *data {
                self.map.entry((f0, f1)).or_insert(n);
            }
        }
    }

    /// Verifies that every table entry matches its node. The table may be a
    /// strict subset of the AND arena when nodes were appended raw.
    pub fn check(&self, nodes: &PrimaryMap<Node, NodeData>) -> Result<()> {
        for (&(f0, f1), &n) in &self.map {
            match nodes.get(n) {
                Some(&NodeData::And { f0: g0, f1: g1 }) if g0 == f0 && g1 == f1 => {}
                _ => {
                    return Err(Error::InvariantViolation(format!(
                        "unique-table entry ({f0}, {f1}) does not match {n}"
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::aig::Aig;

    #[test]
    fn table_mirrors_hashed_ands() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let c = aig.add_ci();
        aig.and(a, b);
        aig.and(b, c);
        aig.and(a, b);
        assert_eq!(aig.and_count(), 2);
        aig.check().unwrap();
    }
}
