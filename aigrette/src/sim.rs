//! Parallel-word simulation.
//!
//! Every node carries `W` 64-bit words of simulation values, so one pass
//! evaluates `64·W` input patterns at once. Patterns live per combinational
//! input; AND nodes are filled by per-word bitwise AND honoring fanin
//! complementation, and the single arena pass is enough because fanins
//! always precede their users.
//!
//! Three pattern sources are supported: all-random, random anchored on a
//! pivot assignment (bit 0 of the first word carries the pivot, so pattern
//! zero is always the pivot itself), and single appended patterns used to
//! replay counterexamples. Appended patterns double the word storage when
//! it fills up.

use crate::aig::{Aig, Lit, Node, NodeData};
use crate::equiv::EquivClasses;
use crate::fx::FxHashMap;
use cranelift_entity::EntityRef;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Word-parallel simulator with per-CI pattern storage.
pub struct Simulator {
    n_words: usize,
    pi_words: Vec<u64>,
    sims: Vec<u64>,
    n_pats: usize,
    rng: SmallRng,
}

impl Simulator {
    /// Creates a simulator with a deterministic random stream.
    pub fn new(seed: u64) -> Simulator {
        Simulator {
            n_words: 0,
            pi_words: Vec::new(),
            sims: Vec::new(),
            n_pats: 0,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Number of 64-bit words per node.
    pub fn word_count(&self) -> usize {
        self.n_words
    }

    /// Clears the pattern storage to `n_words` zeroed words per CI.
    pub fn reset_patterns(&mut self, aig: &Aig, n_words: usize) {
        self.n_words = n_words;
        self.n_pats = 0;
        self.pi_words.clear();
        self.pi_words.resize(aig.ci_count() * n_words, 0);
    }

    /// Fills the pattern storage with fresh random words.
    ///
    /// With a pivot assignment, bit 0 of the first word of every CI is
    /// pinned to the pivot. Without one, bits 0 and 1 of the first word are
    /// pinned to 0 and 1, so the all-zero and all-one input vectors are
    /// always among the patterns.
    pub fn randomize(&mut self, aig: &Aig, n_words: usize, pivot: Option<&[bool]>) {
        self.reset_patterns(aig, n_words);
        for i in 0..aig.ci_count() {
            let r: u64 = self.rng.gen();
            self.pi_words[i * n_words] = match pivot {
                Some(p) => (r & !1) | p[i] as u64,
                None => (r & !3) | 2,
            };
            for w in 1..n_words {
                self.pi_words[i * n_words + w] = self.rng.gen();
            }
        }
    }

    /// Overwrites the pattern words of one CI. The storage must have been
    /// sized by [`Simulator::reset_patterns`] or [`Simulator::randomize`].
    pub fn set_ci_words(&mut self, ci: usize, words: &[u64]) {
        assert_eq!(words.len(), self.n_words);
        self.pi_words[ci * self.n_words..(ci + 1) * self.n_words].copy_from_slice(words);
    }

    /// Appends one pattern, doubling the word storage when full.
    pub fn append_pattern(&mut self, aig: &Aig, pat: &[bool]) {
        assert_eq!(pat.len(), aig.ci_count());
        if self.n_pats == 64 * self.n_words {
            let old = self.n_words.max(1);
            let grown = 2 * old;
            let mut fresh = vec![0u64; aig.ci_count() * grown];
            for i in 0..aig.ci_count() {
                fresh[i * grown..i * grown + self.n_words]
                    .copy_from_slice(&self.pi_words[i * self.n_words..(i + 1) * self.n_words]);
            }
            self.pi_words = fresh;
            self.n_words = grown;
        }
        let (w, b) = (self.n_pats / 64, self.n_pats % 64);
        for (i, &bit) in pat.iter().enumerate() {
            if bit {
                self.pi_words[i * self.n_words + w] |= 1u64 << b;
            }
        }
        self.n_pats += 1;
    }

    /// Evaluates every node of `aig` over the current patterns.
    pub fn run(&mut self, aig: &Aig) {
        let nw = self.n_words;
        self.sims.clear();
        self.sims.resize(aig.node_count() * nw, 0);
        for n in aig.nodes() {
            let at = n.index() * nw;
            match aig.node(n) {
                NodeData::Const0 => {}
                NodeData::Ci { index } => {
                    let src = index as usize * nw;
                    for w in 0..nw {
                        self.sims[at + w] = self.pi_words[src + w];
                    }
                }
                NodeData::And { f0, f1 } => {
                    let (a, c0) = (f0.node().index() * nw, f0.is_complement());
                    let (b, c1) = (f1.node().index() * nw, f1.is_complement());
                    for w in 0..nw {
                        let x = self.sims[a + w] ^ if c0 { !0 } else { 0 };
                        let y = self.sims[b + w] ^ if c1 { !0 } else { 0 };
                        self.sims[at + w] = x & y;
                    }
                }
                NodeData::Co { driver, .. } => {
                    let (a, c0) = (driver.node().index() * nw, driver.is_complement());
                    for w in 0..nw {
                        self.sims[at + w] = self.sims[a + w] ^ if c0 { !0 } else { 0 };
                    }
                }
            }
        }
    }

    /// The simulation words of `n` from the last [`Simulator::run`].
    pub fn node_words(&self, n: Node) -> &[u64] {
        &self.sims[n.index() * self.n_words..(n.index() + 1) * self.n_words]
    }

    /// One simulation word of a literal, with the complement applied.
    pub fn lit_word(&self, lit: Lit, w: usize) -> u64 {
        let v = self.sims[lit.node().index() * self.n_words + w];
        if lit.is_complement() {
            !v
        } else {
            v
        }
    }

    /// Extracts one CI assignment on which every CO of `aig` evaluated to 1,
    /// if the last run produced such a pattern.
    pub fn sat_assignment(&self, aig: &Aig) -> Option<Vec<bool>> {
        let nw = self.n_words;
        let mut acc = vec![!0u64; nw];
        for co in aig.cos() {
            for w in 0..nw {
                acc[w] &= self.node_words(co)[w];
            }
        }
        let bit = acc
            .iter()
            .enumerate()
            .find(|(_, &w)| w != 0)
            .map(|(i, w)| 64 * i + w.trailing_zeros() as usize)?;
        let (w, b) = (bit / 64, bit % 64);
        Some(
            aig.cis()
                .map(|n| self.node_words(n)[w] >> b & 1 != 0)
                .collect(),
        )
    }

    /// Copies the leading `n_cis` pattern rows of another simulator, so a
    /// second graph over a prefix of the same inputs sees the same
    /// patterns.
    pub fn adopt_patterns(&mut self, other: &Simulator, n_cis: usize) {
        self.n_words = other.n_words;
        self.n_pats = other.n_pats;
        self.pi_words.clear();
        self.pi_words
            .extend_from_slice(&other.pi_words[..n_cis * other.n_words]);
    }

    /// The phase of a node: its value under pattern zero.
    fn phase(&self, n: Node) -> bool {
        self.sims[n.index() * self.n_words] & 1 != 0
    }

    /// Phase-canonical words of `n`, restricted to the patterns selected by
    /// `mask`. Pattern zero must always be selected, since it anchors the
    /// phase.
    fn canonical_words(&self, n: Node, mask: Option<&[u64]>) -> Vec<u64> {
        let ph = self.phase(n);
        self.node_words(n)
            .iter()
            .enumerate()
            .map(|(i, &w)| {
                let w = if ph { !w } else { w };
                match mask {
                    Some(m) => w & m[i],
                    None => w,
                }
            })
            .collect()
    }

    /// The conjunction of all CO words of `aig`: one bit per pattern that
    /// the graph accepts. Used as a care mask for class refinement.
    pub fn accept_mask(&self, aig: &Aig) -> Vec<u64> {
        let mut acc = vec![!0u64; self.n_words];
        for co in aig.cos() {
            for w in 0..self.n_words {
                acc[w] &= self.node_words(co)[w];
            }
        }
        acc
    }
}

/// Builds initial candidate classes by hashing phase-canonical simulation
/// words, optionally restricted to the patterns selected by a care mask.
/// The constant, CIs and ANDs participate; COs do not. The class
/// representative is the oldest member; singleton buckets produce no class.
pub fn classes_from_sim(aig: &Aig, sim: &Simulator, mask: Option<&[u64]>) -> EquivClasses {
    let mut buckets: FxHashMap<Vec<u64>, Vec<Node>> = FxHashMap::default();
    for n in aig.nodes() {
        if aig.is_co(n) {
            continue;
        }
        buckets
            .entry(sim.canonical_words(n, mask))
            .or_default()
            .push(n);
    }
    let mut eq = EquivClasses::new();
    for members in buckets.values() {
        if members.len() < 2 {
            continue;
        }
        let repr = *members.iter().min().unwrap();
        for &m in members {
            if m != repr {
                eq.set_repr(m, repr, sim.phase(m) ^ sim.phase(repr));
            }
        }
    }
    log::debug!(
        "initial classes: {} candidate members",
        eq.member_count(aig)
    );
    eq
}

/// Splits every class whose members' simulation words disagree with their
/// representative on the patterns selected by `mask`, using a two-pass
/// bucket partition. SAT-proven members are never detached. Returns the
/// number of members that moved or left.
pub fn refine_classes(
    aig: &Aig,
    sim: &Simulator,
    eq: &mut EquivClasses,
    mask: Option<&[u64]>,
) -> usize {
    // First pass: collect members per representative.
    let mut classes: FxHashMap<Node, Vec<Node>> = FxHashMap::default();
    for n in aig.nodes() {
        if let Some(r) = eq.repr_of(n) {
            if !eq.is_proved(n) {
                classes.entry(r).or_default().push(n);
            }
        }
    }
    // Second pass: regroup each class by canonical words.
    let mut moved = 0;
    for (repr, members) in classes {
        let repr_words = sim.canonical_words(repr, mask);
        let mut splinters: FxHashMap<Vec<u64>, Vec<Node>> = FxHashMap::default();
        for m in members {
            let w = sim.canonical_words(m, mask);
            if w == repr_words {
                // Stays with its representative; refresh the phase.
                eq.set_repr(m, repr, sim.phase(m) ^ sim.phase(repr));
            } else {
                splinters.entry(w).or_default().push(m);
            }
        }
        for group in splinters.values() {
            moved += group.len();
            let new_repr = *group.iter().min().unwrap();
            for &m in group {
                if m == new_repr {
                    eq.clear_repr(m);
                } else {
                    eq.set_repr(m, new_repr, sim.phase(m) ^ sim.phase(new_repr));
                }
            }
        }
    }
    if moved > 0 {
        log::trace!("refinement moved {} members", moved);
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_words_evaluate_bitwise() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let c = aig.add_ci();
        let ab = aig.and(a, b);
        let bc = aig.and(b, c);
        let g = aig.xor(ab, bc);
        aig.add_co(g);

        let wa = 0xAAAA_AAAA_AAAA_AAAAu64;
        let wb = 0xCCCC_CCCC_CCCC_CCCCu64;
        let wc = 0xF0F0_F0F0_F0F0_F0F0u64;
        let mut sim = Simulator::new(7);
        sim.reset_patterns(&aig, 1);
        sim.set_ci_words(0, &[wa]);
        sim.set_ci_words(1, &[wb]);
        sim.set_ci_words(2, &[wc]);
        sim.run(&aig);
        assert_eq!(sim.node_words(ab.node())[0], wa & wb);
        assert_eq!(sim.node_words(g.node())[0], (wa & wb) ^ (wb & wc));
        assert_eq!(sim.lit_word(g, 0), (wa & wb) ^ (wb & wc));
    }

    #[test]
    fn classes_form_and_refine() {
        // u = (a & b) & c and w = a & (b & c) land in one class; an
        // appended pattern distinguishing ab from bc splits nothing there
        // but a pattern distinguishing u from an unrelated node would.
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let c = aig.add_ci();
        let ab = aig.and(a, b);
        let u = aig.and(ab, c);
        let bc = aig.and(b, c);
        let w = aig.and(a, bc);
        aig.add_co(u);
        aig.add_co(w);

        let mut sim = Simulator::new(42);
        sim.randomize(&aig, 4, None);
        sim.run(&aig);
        let mut eq = classes_from_sim(&aig, &sim, None);
        assert_eq!(eq.repr_of(w.node()), Some(u.node()));
        assert!(!eq.phase_of(w.node()));

        // More random rounds never separate functionally equal nodes.
        for _ in 0..4 {
            sim.randomize(&aig, 4, None);
            sim.run(&aig);
            refine_classes(&aig, &sim, &mut eq, None);
        }
        assert_eq!(eq.repr_of(w.node()), Some(u.node()));
    }

    #[test]
    fn complement_pairs_share_a_class() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let x = aig.and(a, b);
        // A raw duplicate of a & b, invisible to the unique table.
        let y = aig.append_and_raw(a, b);
        aig.add_co(x);
        aig.add_co(!y);

        let mut sim = Simulator::new(3);
        sim.randomize(&aig, 2, None);
        sim.run(&aig);
        let eq = classes_from_sim(&aig, &sim, None);
        assert_eq!(eq.repr_of(y.node()), Some(x.node()));
        assert!(!eq.phase_of(y.node()));
    }

    #[test]
    fn appended_patterns_double_storage() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        aig.add_co(a);
        let mut sim = Simulator::new(1);
        sim.reset_patterns(&aig, 1);
        for i in 0..130 {
            sim.append_pattern(&aig, &[i % 3 == 0]);
        }
        assert!(sim.word_count() >= 3);
        sim.run(&aig);
        assert_eq!(sim.node_words(a.node())[0] & 1, 1);
    }

    #[test]
    fn sat_assignment_finds_a_one_bit() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let x = aig.and(a, !b);
        aig.add_co(x);
        let mut sim = Simulator::new(5);
        sim.randomize(&aig, 2, None);
        sim.run(&aig);
        let pat = sim.sat_assignment(&aig).expect("a & !b is satisfiable");
        assert!(pat[0] && !pat[1]);
    }
}
