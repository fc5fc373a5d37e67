//! Duplication into a fresh, normalized manager.
//!
//! A manager is *normalized* when the CIs occupy ids `1..=nCI`, the AND
//! nodes follow them, and the COs are the last `nCO` nodes. Managers built
//! CI-first and CO-last are normalized by construction; everything else is
//! brought into that shape here by rebuilding, which is also the only way
//! the arena is ever compacted.

use super::{Aig, Lit, Node, NodeData};
use cranelift_entity::{EntityRef, SecondaryMap};

impl Aig {
    /// Whether the arena is already in normalized order.
    pub fn is_normalized(&self) -> bool {
        let n_cis = self.cis.len();
        let n_cos = self.cos.len();
        let n_total = self.nodes.len();
        for (i, &n) in self.cis.iter().enumerate() {
            if n.index() != 1 + i {
                return false;
            }
        }
        for (i, &n) in self.cos.iter().enumerate() {
            if n.index() != n_total - n_cos + i {
                return false;
            }
        }
        // With CIs at the front and COs at the back, the ANDs fill the rest.
        1 + n_cis + self.n_ands + n_cos == n_total
    }

    /// Rebuilds into a fresh manager with normalized node order.
    ///
    /// The copy is structure-preserving: AND nodes are appended raw in
    /// topological order, so duplicates survive and node-for-node
    /// isomorphism holds. The unique table is rebuilt by a single linear
    /// pass at the end. Side-cars are not carried over; their indices would
    /// be stale.
    pub fn clone_normalized(&self) -> Aig {
        let mut dst = Aig::with_capacity(self.nodes.len());
        dst.name = self.name.clone();
        dst.n_constraints = self.n_constraints;
        let mut copy: SecondaryMap<Node, Lit> = SecondaryMap::with_capacity(self.nodes.len());
        copy[Node::CONST0] = Lit::CONST0;
        for &ci in &self.cis {
            copy[ci] = dst.add_ci();
        }
        for (n, data) in self.nodes.iter() {
            if let NodeData::And { f0, f1 } = *data {
                let g0 = copy[f0.node()].xor_complement(f0.is_complement());
                let g1 = copy[f1.node()].xor_complement(f1.is_complement());
                copy[n] = dst.append_and_raw(g0, g1);
            }
        }
        for &co in &self.cos {
            let d = self.co_driver(co);
            dst.add_co(copy[d.node()].xor_complement(d.is_complement()));
        }
        dst.set_register_count(self.n_regs);
        dst.strash.rebuild(&dst.nodes);
        dst
    }

    /// Rebuilds into a fresh manager through the hash-consed constructor,
    /// dropping structural duplicates and unreachable orphans' table
    /// entries. CO order and register pairing are preserved.
    pub fn clone_compacted(&self) -> Aig {
        let mut dst = Aig::with_capacity(self.nodes.len());
        dst.name = self.name.clone();
        dst.n_constraints = self.n_constraints;
        let mut copy: SecondaryMap<Node, Lit> = SecondaryMap::with_capacity(self.nodes.len());
        copy[Node::CONST0] = Lit::CONST0;
        for &ci in &self.cis {
            copy[ci] = dst.add_ci();
        }
        for (n, data) in self.nodes.iter() {
            if let NodeData::And { f0, f1 } = *data {
                let g0 = copy[f0.node()].xor_complement(f0.is_complement());
                let g1 = copy[f1.node()].xor_complement(f1.is_complement());
                copy[n] = dst.and(g0, g1);
            }
        }
        for &co in &self.cos {
            let d = self.co_driver(co);
            dst.add_co(copy[d.node()].xor_complement(d.is_complement()));
        }
        dst.set_register_count(self.n_regs);
        dst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ci_first_construction_is_normalized() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let x = aig.and(a, b);
        aig.add_co(x);
        assert!(aig.is_normalized());
    }

    #[test]
    fn normalization_reorders_interleaved_nodes() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let x = aig.and(a, b);
        aig.add_co(x);
        // A CI appended after a CO breaks the normalized order.
        let c = aig.add_ci();
        let y = aig.and(x, c);
        aig.add_co(y);
        assert!(!aig.is_normalized());

        let norm = aig.clone_normalized();
        assert!(norm.is_normalized());
        assert_eq!(norm.ci_count(), 3);
        assert_eq!(norm.co_count(), 2);
        assert_eq!(norm.and_count(), 2);
        norm.check().unwrap();
        // CIs come first, in their original order.
        for (i, n) in norm.cis().enumerate() {
            assert_eq!(n.index(), 1 + i);
        }
    }

    #[test]
    fn compaction_drops_duplicates() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let x = aig.append_and_raw(a, b);
        let y = aig.append_and_raw(a, b);
        aig.add_co(x);
        aig.add_co(y);
        assert_eq!(aig.and_count(), 2);
        let packed = aig.clone_compacted();
        assert_eq!(packed.and_count(), 1);
        assert_eq!(packed.co_driver_at(0), packed.co_driver_at(1));
    }
}
