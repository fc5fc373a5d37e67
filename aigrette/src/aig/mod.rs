//! The and-inverter graph store.
//!
//! An AIG is a DAG of two-input AND nodes over complemented edges. Nodes are
//! referenced by [`Node`], a plain `u32` index into the manager's node arena;
//! edges are [`Lit`]s, which pack a node index together with a single
//! complement bit. Nothing else is bit-stuffed into either type: all other
//! per-node attributes (levels, reference counts, simulation words, cut
//! lists, equivalence links) live in side tables keyed by `Node`.
//!
//! The arena is append-only. A fanin literal always refers to a node with a
//! strictly smaller index than its user, so the arena order *is* a
//! topological order and every forward pass over `0..node_count` visits
//! fanins before fanouts. Nodes are never freed individually; compaction
//! happens by rebuilding into a fresh manager (see [`Aig::clone_normalized`]).

use crate::equiv::EquivClasses;
use crate::error::{Error, Result};
use cranelift_entity::{entity_impl, PrimaryMap};
use std::fmt;

mod dup;
mod strash;

use strash::StrashTable;

/// An opaque reference to a node of an [`Aig`].
///
/// The order of node references is the topological order of the graph.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node(u32);
entity_impl!(Node, "n");

impl Node {
    /// The constant-zero node. Every manager has it at index 0.
    pub const CONST0: Node = Node(0);
}

/// An edge of the graph: a node reference plus a complement bit, packed as
/// `(node << 1) | complement`.
///
/// The constant-false and constant-true functions are the two literals of
/// the constant node, [`Lit::CONST0`] and [`Lit::CONST1`]. Negation flips
/// bit zero and is exposed through `!`. The default literal is the
/// constant-false one, which lets dense side tables start out all-constant.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lit(u32);

impl Lit {
    /// The constant-false literal.
    pub const CONST0: Lit = Lit(0);
    /// The constant-true literal.
    pub const CONST1: Lit = Lit(1);

    /// Creates the literal of `node` with the given complement bit.
    #[inline]
    pub fn new(node: Node, complement: bool) -> Lit {
        Lit((node.as_u32() << 1) | complement as u32)
    }

    /// Recovers a literal from its raw `(node << 1) | complement` encoding.
    #[inline]
    pub fn from_raw(raw: u32) -> Lit {
        Lit(raw)
    }

    /// The raw `(node << 1) | complement` encoding. This is also the on-disk
    /// AIGER encoding of the literal.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// The node this literal refers to.
    #[inline]
    pub fn node(self) -> Node {
        Node::from_u32(self.0 >> 1)
    }

    /// Whether the edge is complemented.
    #[inline]
    pub fn is_complement(self) -> bool {
        self.0 & 1 != 0
    }

    /// Whether this is one of the two constant literals.
    #[inline]
    pub fn is_const(self) -> bool {
        self.0 < 2
    }

    /// This literal with its complement bit forced to `c`.
    #[inline]
    pub fn with_complement(self, c: bool) -> Lit {
        Lit((self.0 & !1) | c as u32)
    }

    /// This literal xor-ed with an extra complement bit.
    #[inline]
    pub fn xor_complement(self, c: bool) -> Lit {
        Lit(self.0 ^ c as u32)
    }
}

impl std::ops::Not for Lit {
    type Output = Lit;
    #[inline]
    fn not(self) -> Lit {
        Lit(self.0 ^ 1)
    }
}

impl fmt::Display for Lit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_complement() {
            write!(f, "!{}", self.node())
        } else {
            write!(f, "{}", self.node())
        }
    }
}

impl fmt::Debug for Lit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// The payload of one node.
///
/// Combinational inputs cover both primary inputs and register outputs;
/// combinational outputs cover both primary outputs and register inputs.
/// Which is which is decided by the manager's register count, never by the
/// node itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeData {
    /// The constant-false node.
    Const0,
    /// A combinational input; `index` is its position in the CI list.
    Ci {
        /// Position in the ordered CI list.
        index: u32,
    },
    /// A combinational output driven by `driver`; `index` is its position in
    /// the CO list.
    Co {
        /// The fanin literal.
        driver: Lit,
        /// Position in the ordered CO list.
        index: u32,
    },
    /// A two-input AND with `f0 < f1`.
    And {
        /// First fanin, the smaller literal.
        f0: Lit,
        /// Second fanin, the larger literal.
        f1: Lit,
    },
}

/// An and-inverter graph manager.
///
/// Owns the node arena, the ordered CI/CO lists, the structural-hashing
/// unique table, and the optional side-cars carried by the AIGER codec.
#[derive(Clone)]
pub struct Aig {
    nodes: PrimaryMap<Node, NodeData>,
    cis: Vec<Node>,
    cos: Vec<Node>,
    n_regs: usize,
    n_ands: usize,
    strash: StrashTable,

    /// Model name, if any.
    pub name: Option<String>,
    /// Candidate and proven equivalence classes.
    pub equivs: Option<EquivClasses>,
    /// LUT mapping produced by the mapper or read from the `m` section.
    pub mapping: Option<crate::map::Mapping>,
    /// Per-flop class ids (`f` section).
    pub flop_classes: Option<Vec<u32>>,
    /// Per-object placement (`p` section).
    pub placement: Option<Vec<Placement>>,
    /// Per-object switching activity estimates (`s` section).
    pub switching: Option<Vec<u8>>,
    /// Number of trailing outputs that are constraints rather than
    /// properties.
    pub n_constraints: u32,
}

/// Placement data for one object. The codec packs this into four bytes; in
/// memory it is a plain struct.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Placement {
    /// The object may not be moved.
    pub fixed: bool,
    /// The coordinates are meaningless.
    pub undef: bool,
    /// X coordinate, 14 bits on disk.
    pub x: u16,
    /// Y coordinate.
    pub y: u16,
}

impl Aig {
    /// Creates an empty manager holding only the constant node.
    pub fn new() -> Aig {
        Aig::with_capacity(16)
    }

    /// Creates an empty manager with room for `n` nodes.
    pub fn with_capacity(n: usize) -> Aig {
        let mut nodes = PrimaryMap::with_capacity(n);
        let c = nodes.push(NodeData::Const0);
        debug_assert_eq!(c, Node::CONST0);
        Aig {
            nodes,
            cis: Vec::new(),
            cos: Vec::new(),
            n_regs: 0,
            n_ands: 0,
            strash: StrashTable::default(),
            name: None,
            equivs: None,
            mapping: None,
            flop_classes: None,
            placement: None,
            switching: None,
            n_constraints: 0,
        }
    }

    /// Total number of nodes, including the constant.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of combinational inputs.
    pub fn ci_count(&self) -> usize {
        self.cis.len()
    }

    /// Number of combinational outputs.
    pub fn co_count(&self) -> usize {
        self.cos.len()
    }

    /// Number of AND nodes.
    pub fn and_count(&self) -> usize {
        self.n_ands
    }

    /// Number of registers. The last `r` CIs are register outputs and the
    /// last `r` COs are register inputs, paired by offset.
    pub fn register_count(&self) -> usize {
        self.n_regs
    }

    /// Declares the last `r` CI/CO pairs to be registers.
    pub fn set_register_count(&mut self, r: usize) {
        assert!(
            r <= self.cis.len() && r <= self.cos.len(),
            "register count {} exceeds CI/CO counts {}/{}",
            r,
            self.cis.len(),
            self.cos.len()
        );
        self.n_regs = r;
    }

    /// Number of primary inputs (CIs that are not register outputs).
    pub fn pi_count(&self) -> usize {
        self.cis.len() - self.n_regs
    }

    /// Number of primary outputs (COs that are not register inputs).
    pub fn po_count(&self) -> usize {
        self.cos.len() - self.n_regs
    }

    /// The data of `n`.
    #[inline]
    pub fn node(&self, n: Node) -> NodeData {
        self.nodes[n]
    }

    /// Whether `n` is an AND node.
    #[inline]
    pub fn is_and(&self, n: Node) -> bool {
        matches!(self.nodes[n], NodeData::And { .. })
    }

    /// Whether `n` is a combinational input.
    #[inline]
    pub fn is_ci(&self, n: Node) -> bool {
        matches!(self.nodes[n], NodeData::Ci { .. })
    }

    /// Whether `n` is a combinational output.
    #[inline]
    pub fn is_co(&self, n: Node) -> bool {
        matches!(self.nodes[n], NodeData::Co { .. })
    }

    /// The two fanins of an AND node.
    ///
    /// Panics if `n` is not an AND.
    #[inline]
    pub fn and_fanins(&self, n: Node) -> (Lit, Lit) {
        match self.nodes[n] {
            NodeData::And { f0, f1 } => (f0, f1),
            _ => panic!("{} is not an AND node", n),
        }
    }

    /// The driver of a combinational output node.
    ///
    /// Panics if `n` is not a CO.
    #[inline]
    pub fn co_driver(&self, n: Node) -> Lit {
        match self.nodes[n] {
            NodeData::Co { driver, .. } => driver,
            _ => panic!("{} is not a CO node", n),
        }
    }

    /// The `i`-th combinational input node.
    pub fn ci_node(&self, i: usize) -> Node {
        self.cis[i]
    }

    /// The `i`-th combinational output node.
    pub fn co_node(&self, i: usize) -> Node {
        self.cos[i]
    }

    /// The driver literal of the `i`-th combinational output.
    pub fn co_driver_at(&self, i: usize) -> Lit {
        self.co_driver(self.cos[i])
    }

    /// Iterates over the CI nodes in insertion order. The position of a CI
    /// in this order is its PI (or register-output) number.
    pub fn cis(&self) -> impl Iterator<Item = Node> + '_ {
        self.cis.iter().copied()
    }

    /// Iterates over the CO nodes in insertion order.
    pub fn cos(&self) -> impl Iterator<Item = Node> + '_ {
        self.cos.iter().copied()
    }

    /// Iterates over the AND nodes in topological (arena) order.
    pub fn ands(&self) -> impl Iterator<Item = Node> + '_ {
        self.nodes
            .iter()
            .filter(|(_, d)| matches!(d, NodeData::And { .. }))
            .map(|(n, _)| n)
    }

    /// Iterates over all nodes in arena order, constant node included.
    pub fn nodes(&self) -> impl Iterator<Item = Node> + '_ {
        self.nodes.keys()
    }

    /// Appends a combinational input and returns its (uncomplemented)
    /// literal.
    pub fn add_ci(&mut self) -> Lit {
        let index = self.cis.len() as u32;
        let n = self.nodes.push(NodeData::Ci { index });
        self.cis.push(n);
        Lit::new(n, false)
    }

    /// Appends a combinational output driven by `driver` and returns its
    /// position in the CO list.
    pub fn add_co(&mut self, driver: Lit) -> usize {
        debug_assert!(self.contains_lit(driver), "CO driver from another manager");
        let index = self.cos.len() as u32;
        let n = self.nodes.push(NodeData::Co { driver, index });
        self.cos.push(n);
        index as usize
    }

    /// Whether `lit` refers to a node of this manager.
    #[inline]
    pub fn contains_lit(&self, lit: Lit) -> bool {
        (lit.node().as_u32() as usize) < self.nodes.len()
    }

    /// Hash-consed two-input AND.
    ///
    /// Applies the constant, idempotence and complement rewrites, routes
    /// each fanin through its proven equivalence representative when a class
    /// side-car is attached, canonicalizes `f0 < f1`, and then either finds
    /// the existing node in the unique table or appends a new one.
    ///
    /// Passing a literal whose node lies outside the manager is a
    /// programming error; it panics in debug builds.
    pub fn and(&mut self, f0: Lit, f1: Lit) -> Lit {
        debug_assert!(self.contains_lit(f0), "fanin from another manager");
        debug_assert!(self.contains_lit(f1), "fanin from another manager");
        let f0 = self.proven_repr_lit(f0);
        let f1 = self.proven_repr_lit(f1);
        if f0 == f1 {
            return f0;
        }
        if f0 == !f1 {
            return Lit::CONST0;
        }
        if f0 == Lit::CONST0 || f1 == Lit::CONST0 {
            return Lit::CONST0;
        }
        if f0 == Lit::CONST1 {
            return f1;
        }
        if f1 == Lit::CONST1 {
            return f0;
        }
        let (f0, f1) = if f0 < f1 { (f0, f1) } else { (f1, f0) };
        if let Some(n) = self.strash.lookup(f0, f1) {
            return Lit::new(n, false);
        }
        let n = self.nodes.push(NodeData::And { f0, f1 });
        self.n_ands += 1;
        self.strash.insert(f0, f1, n);
        Lit::new(n, false)
    }

    /// Appends an AND node without consulting or updating the unique table
    /// and without applying any rewrite. The duplication and codec paths use
    /// this; it is also the hook for building deliberately redundant graphs.
    ///
    /// The fanins are still canonicalized to `f0 < f1`; both must already be
    /// in the manager.
    pub fn append_and_raw(&mut self, f0: Lit, f1: Lit) -> Lit {
        debug_assert!(self.contains_lit(f0) && self.contains_lit(f1));
        debug_assert!(f0.node() != f1.node(), "raw AND over a single node");
        let (f0, f1) = if f0 < f1 { (f0, f1) } else { (f1, f0) };
        let n = self.nodes.push(NodeData::And { f0, f1 });
        self.n_ands += 1;
        Lit::new(n, false)
    }

    /// Two-input OR, built from [`Aig::and`].
    pub fn or(&mut self, f0: Lit, f1: Lit) -> Lit {
        !self.and(!f0, !f1)
    }

    /// Two-input XOR, built from three ANDs:
    /// `a ^ b = !(a & b) & !(!a & !b)`.
    pub fn xor(&mut self, a: Lit, b: Lit) -> Lit {
        let both = self.and(a, b);
        let neither = self.and(!a, !b);
        self.and(!both, !neither)
    }

    /// If-then-else over literals: `c ? t : e`, built from three ANDs.
    pub fn mux(&mut self, c: Lit, t: Lit, e: Lit) -> Lit {
        let pos = self.and(c, t);
        let neg = self.and(!c, e);
        !self.and(!pos, !neg)
    }

    /// Routes a literal through its equivalence representative if the class
    /// side-car has a proven entry for its node.
    fn proven_repr_lit(&self, f: Lit) -> Lit {
        if let Some(eq) = &self.equivs {
            let n = f.node();
            if eq.is_proved(n) {
                if let Some(r) = eq.repr_of(n) {
                    return Lit::new(r, eq.phase_of(n) ^ f.is_complement());
                }
            }
        }
        f
    }

    /// Computes the level of every node: CIs are level 0, an AND is one more
    /// than its deepest fanin, a CO copies its driver.
    pub fn levels(&self) -> cranelift_entity::SecondaryMap<Node, u32> {
        let mut levels: cranelift_entity::SecondaryMap<Node, u32> =
            cranelift_entity::SecondaryMap::with_capacity(self.nodes.len());
        for (n, data) in self.nodes.iter() {
            levels[n] = match *data {
                NodeData::Const0 | NodeData::Ci { .. } => 0,
                NodeData::And { f0, f1 } => 1 + levels[f0.node()].max(levels[f1.node()]),
                NodeData::Co { driver, .. } => levels[driver.node()],
            };
        }
        levels
    }

    /// Counts the fanouts of every node, CO uses included.
    pub fn fanout_counts(&self) -> cranelift_entity::SecondaryMap<Node, u32> {
        let mut refs = cranelift_entity::SecondaryMap::with_capacity(self.nodes.len());
        for (_, data) in self.nodes.iter() {
            match *data {
                NodeData::And { f0, f1 } => {
                    refs[f0.node()] += 1;
                    refs[f1.node()] += 1;
                }
                NodeData::Co { driver, .. } => refs[driver.node()] += 1,
                _ => {}
            }
        }
        refs
    }

    /// Verifies the structural invariants of the manager.
    ///
    /// This is the entry point that turns latent programming bugs into an
    /// [`Error::InvariantViolation`]; the mutating operations themselves only
    /// carry debug assertions.
    pub fn check(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::InvariantViolation(msg));
        if self.nodes.len() == 0 || self.nodes[Node::CONST0] != NodeData::Const0 {
            return fail("node 0 is not the constant".into());
        }
        let mut n_cis = 0usize;
        let mut n_cos = 0usize;
        let mut n_ands = 0usize;
        for (n, data) in self.nodes.iter() {
            match *data {
                NodeData::Const0 => {
                    if n != Node::CONST0 {
                        return fail(format!("{} is a second constant node", n));
                    }
                }
                NodeData::Ci { index } => {
                    if self.cis.get(index as usize) != Some(&n) {
                        return fail(format!("CI list entry {} does not match {}", index, n));
                    }
                    n_cis += 1;
                }
                NodeData::Co { driver, index } => {
                    if driver.node() >= n {
                        return fail(format!("{} drives CO {} out of order", driver.node(), n));
                    }
                    if self.cos.get(index as usize) != Some(&n) {
                        return fail(format!("CO list entry {} does not match {}", index, n));
                    }
                    n_cos += 1;
                }
                NodeData::And { f0, f1 } => {
                    if f0 >= f1 {
                        return fail(format!("{} has unordered fanins {} {}", n, f0, f1));
                    }
                    if f1.node() >= n {
                        return fail(format!("{} has fanin {} of higher id", n, f1.node()));
                    }
                    if f0.node() == Node::CONST0 {
                        return fail(format!("{} has a constant fanin", n));
                    }
                    n_ands += 1;
                }
            }
        }
        if n_cis != self.cis.len() || n_cos != self.cos.len() || n_ands != self.n_ands {
            return fail("node counts disagree with the CI/CO lists".into());
        }
        if self.n_regs > n_cis || self.n_regs > n_cos {
            return fail("register count exceeds CI or CO count".into());
        }
        self.strash.check(&self.nodes)?;
        Ok(())
    }

    /// Drops every side-car that a mutation would invalidate. Engines that
    /// populate side tables call this before attaching fresh results.
    pub fn clear_side_cars(&mut self) {
        self.equivs = None;
        self.mapping = None;
        self.flop_classes = None;
        self.placement = None;
        self.switching = None;
    }
}

impl Default for Aig {
    fn default() -> Aig {
        Aig::new()
    }
}

impl fmt::Debug for Aig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Aig {{ ci: {}, co: {}, and: {}, reg: {} }}",
            self.ci_count(),
            self.co_count(),
            self.and_count(),
            self.register_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn constants_and_rewrites() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        assert_eq!(aig.and(Lit::CONST0, a), Lit::CONST0);
        assert_eq!(aig.and(a, Lit::CONST1), a);
        assert_eq!(aig.and(a, a), a);
        assert_eq!(aig.and(a, !a), Lit::CONST0);
        assert_eq!(aig.and_count(), 0);
        let ab = aig.and(a, b);
        assert_eq!(aig.and_count(), 1);
        // The complement of an AND behaves like any other literal.
        assert_eq!(aig.and(ab, !ab), Lit::CONST0);
        assert_eq!(aig.and_count(), 1);
    }

    #[test]
    fn hashing_is_idempotent_and_commutative() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let x = aig.and(a, b);
        let y = aig.and(b, a);
        let z = aig.and(a, b);
        assert_eq!(x, y);
        assert_eq!(x, z);
        assert_eq!(aig.and_count(), 1);
        let (f0, f1) = aig.and_fanins(x.node());
        assert!(f0 < f1);
    }

    #[test]
    fn fanins_precede_users() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let c = aig.add_ci();
        let x = aig.and(a, b);
        let y = aig.and(x, c);
        aig.add_co(y);
        aig.check().unwrap();
        for n in aig.ands() {
            let (f0, f1) = aig.and_fanins(n);
            assert!(f0.node() < n && f1.node() < n);
        }
    }

    #[test]
    fn xor_and_mux_truth() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let c = aig.add_ci();
        let x = aig.xor(a, b);
        let m = aig.mux(c, a, b);
        aig.add_co(x);
        aig.add_co(m);
        // Exhaustive evaluation over the eight input patterns.
        for bits in 0u32..8 {
            let (va, vb, vc) = (bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
            let eval = evaluate(&aig, &[va, vb, vc]);
            assert_eq!(eval[0], va ^ vb);
            assert_eq!(eval[1], if vc { va } else { vb });
        }
    }

    #[test]
    fn registers_pair_up() {
        let mut aig = Aig::new();
        let i = aig.add_ci();
        let r = aig.add_ci();
        let next = aig.or(r, !i);
        aig.add_co(r); // property output
        aig.add_co(next); // register input
        aig.set_register_count(1);
        assert_eq!(aig.pi_count(), 1);
        assert_eq!(aig.po_count(), 1);
        assert_eq!(aig.ci_node(1), r.node());
        assert_eq!(aig.co_driver_at(1), next);
        aig.check().unwrap();
    }

    #[test]
    fn raw_append_bypasses_the_table() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let x = aig.append_and_raw(a, b);
        let y = aig.append_and_raw(b, a);
        assert_ne!(x, y);
        assert_eq!(aig.and_count(), 2);
        // Hashed construction still finds neither and creates a third.
        let z = aig.and(a, b);
        assert_ne!(z, x);
        assert_eq!(aig.and_count(), 3);
    }

    /// Evaluates every CO of `aig` under one input assignment.
    pub(crate) fn evaluate(aig: &Aig, inputs: &[bool]) -> Vec<bool> {
        let mut values = vec![false; aig.node_count()];
        for (i, n) in aig.cis().enumerate() {
            values[n.index()] = inputs[i];
        }
        let lit_val = |values: &[bool], l: Lit| values[l.node().index()] ^ l.is_complement();
        for n in aig.nodes() {
            if let NodeData::And { f0, f1 } = aig.node(n) {
                values[n.index()] = lit_val(&values, f0) && lit_val(&values, f1);
            }
        }
        aig.cos()
            .map(|n| lit_val(&values, aig.co_driver(n)))
            .collect()
    }
}
