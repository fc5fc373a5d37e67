//! Equivalence-class side-car.
//!
//! Candidate (and later proven) node equivalences are stored as a
//! representative table plus next-in-class links, the layout the AIGER `e`
//! extension section serializes. A class representative is always the
//! oldest member, so every merge points backwards in topological order.
//!
//! The `phase` bit records whether a member equals its representative
//! complemented. It is derived from simulation and is not serialized; the
//! codec carries only the representative and the proved bit.

use crate::aig::{Aig, Lit, Node, NodeData};
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::SecondaryMap;

/// Representative, chain link, phase and proved bit per node.
#[derive(Clone, Default)]
pub struct EquivClasses {
    repr: SecondaryMap<Node, PackedOption<Node>>,
    next: SecondaryMap<Node, PackedOption<Node>>,
    phase: SecondaryMap<Node, bool>,
    proved: SecondaryMap<Node, bool>,
    heads: Vec<Node>,
}

impl EquivClasses {
    /// Creates an empty class table.
    pub fn new() -> EquivClasses {
        EquivClasses::default()
    }

    /// Places `n` into the class of `r`, which must be older than `n`.
    pub fn set_repr(&mut self, n: Node, r: Node, phase: bool) {
        debug_assert!(r < n, "representative must precede the member");
        self.repr[n] = r.into();
        self.phase[n] = phase;
    }

    /// Removes `n` from its class.
    pub fn clear_repr(&mut self, n: Node) {
        self.repr[n] = PackedOption::default();
        self.phase[n] = false;
        self.proved[n] = false;
    }

    /// The representative of `n`, if `n` is a class member.
    #[inline]
    pub fn repr_of(&self, n: Node) -> Option<Node> {
        self.repr[n].expand()
    }

    /// Whether `n` equals the complement of its representative.
    #[inline]
    pub fn phase_of(&self, n: Node) -> bool {
        self.phase[n]
    }

    /// Marks the membership of `n` as SAT-proven.
    pub fn set_proved(&mut self, n: Node) {
        debug_assert!(self.repr[n].is_some());
        self.proved[n] = true;
    }

    /// Whether the membership of `n` is SAT-proven.
    #[inline]
    pub fn is_proved(&self, n: Node) -> bool {
        self.proved[n]
    }

    /// Rebuilds the next-in-class chains and the head list from the
    /// representative table. Members chain in ascending node order.
    pub fn derive_nexts(&mut self, aig: &Aig) {
        self.next = SecondaryMap::new();
        self.heads.clear();
        let mut tail: SecondaryMap<Node, PackedOption<Node>> = SecondaryMap::new();
        for n in aig.nodes() {
            if let Some(r) = self.repr[n].expand() {
                match tail[r].expand() {
                    None => {
                        self.heads.push(r);
                        self.next[r] = n.into();
                    }
                    Some(t) => self.next[t] = n.into(),
                }
                tail[r] = n.into();
            }
        }
        self.heads.sort_unstable();
        self.heads.dedup();
    }

    /// Class heads in ascending order. Valid after [`EquivClasses::derive_nexts`].
    pub fn heads(&self) -> &[Node] {
        &self.heads
    }

    /// Iterates the class of `head`, head first, in ascending node order.
    pub fn members(&self, head: Node) -> impl Iterator<Item = Node> + '_ {
        let mut cur = Some(head);
        std::iter::from_fn(move || {
            let n = cur?;
            cur = self.next[n].expand();
            Some(n)
        })
    }

    /// Number of member entries (nodes with a representative).
    pub fn member_count(&self, aig: &Aig) -> usize {
        aig.nodes().filter(|&n| self.repr[n].is_some()).count()
    }
}

impl Aig {
    /// Rebuilds the graph with every SAT-proven class member replaced by its
    /// representative. CO order and register pairing are preserved; the
    /// result is normalized and structurally hashed.
    pub fn reduce_equivs(&self) -> Aig {
        let mut dst = Aig::with_capacity(self.node_count());
        dst.name = self.name.clone();
        dst.n_constraints = self.n_constraints;
        let mut copy: SecondaryMap<Node, Lit> = SecondaryMap::with_capacity(self.node_count());
        copy[Node::CONST0] = Lit::CONST0;
        for ci in self.cis().collect::<Vec<_>>() {
            copy[ci] = dst.add_ci();
        }
        // A proven member maps straight to its representative's literal and
        // is never rebuilt; everything downstream then reads through it.
        let proven = |eq: Option<&EquivClasses>, n: Node| -> Option<(Node, bool)> {
            let eq = eq?;
            if eq.is_proved(n) {
                eq.repr_of(n).map(|r| (r, eq.phase_of(n)))
            } else {
                None
            }
        };
        for n in self.nodes().collect::<Vec<_>>() {
            if let NodeData::And { f0, f1 } = self.node(n) {
                if let Some((r, ph)) = proven(self.equivs.as_ref(), n) {
                    copy[n] = copy[r].xor_complement(ph);
                    continue;
                }
                let g0 = copy[f0.node()].xor_complement(f0.is_complement());
                let g1 = copy[f1.node()].xor_complement(f1.is_complement());
                copy[n] = dst.and(g0, g1);
            }
        }
        for co in self.cos().collect::<Vec<_>>() {
            let d = self.co_driver(co);
            dst.add_co(copy[d.node()].xor_complement(d.is_complement()));
        }
        dst.set_register_count(self.register_count());
        dst
    }
}
