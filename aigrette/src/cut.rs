//! K-feasible cut enumeration.
//!
//! A cut of node `n` is a set of at most `K` leaves whose conjunction (as
//! functions) determines the function of `n`. A cut of an AND `n = a & b`
//! is any merge of one cut of `a` with one cut of `b` whose union stays
//! within `K` leaves. Leaves are kept sorted, so the merge is a linear
//! two-pointer union, and every cut carries a 64-bit signature
//! (`OR` of `1 << (node & 63)`) as a cheap necessary condition before the
//! subset tests used for dominance filtering.
//!
//! Kept cuts are ordered by a policy comparator; the trivial cut `{n}` is
//! appended last so that every node has at least one cut.

use crate::aig::{Aig, Lit, Node, NodeData};
use cranelift_entity::SecondaryMap;
use smallvec::SmallVec;
use std::cmp::Ordering;

/// Hard upper bound on the number of leaves of a cut.
pub const LEAF_MAX: usize = 6;

/// One k-feasible cut: sorted leaf literals, signature, and the arrival and
/// area-flow estimates the mapper orders by.
#[derive(Clone, Debug, Default)]
pub struct Cut {
    /// Sorted, uncomplemented leaf literals.
    pub leaves: SmallVec<[Lit; LEAF_MAX]>,
    /// `OR` of `1 << (leaf_node & 63)` over the leaves.
    pub sign: u64,
    /// Arrival-time estimate: one more than the deepest leaf.
    pub arrival: i32,
    /// Area-flow estimate: sum of the leaf flows.
    pub flow: f32,
}

impl Cut {
    fn signature(leaves: &[Lit]) -> u64 {
        leaves
            .iter()
            .fold(0u64, |s, l| s | 1u64 << (l.node().as_u32() & 63))
    }

    /// The trivial cut `{n}`.
    pub fn trivial(n: Node, arrival: i32, flow: f32) -> Cut {
        let leaves: SmallVec<[Lit; LEAF_MAX]> = std::iter::once(Lit::new(n, false)).collect();
        let sign = Cut::signature(&leaves);
        Cut {
            leaves,
            sign,
            arrival,
            flow,
        }
    }

    /// Whether this is the trivial cut of `n`.
    pub fn is_trivial(&self, n: Node) -> bool {
        self.leaves.len() == 1 && self.leaves[0].node() == n
    }

    /// Whether every leaf of `self` is also a leaf of `other`.
    fn subset_of(&self, other: &Cut) -> bool {
        debug_assert!(self.leaves.len() <= other.leaves.len());
        let mut k = 0;
        for &l in &other.leaves {
            if k == self.leaves.len() {
                return true;
            }
            match self.leaves[k].cmp(&l) {
                Ordering::Less => return false,
                Ordering::Equal => k += 1,
                Ordering::Greater => {}
            }
        }
        k == self.leaves.len()
    }
}

/// Policy for ordering the kept cuts of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CutPolicy {
    /// Arrival time first, then leaf count, then area flow.
    Delay,
    /// Area flow first, then leaf count, then arrival time.
    Area,
    /// Ordered like [`CutPolicy::Area`]; the mapper's edge pass re-costs the
    /// chosen cuts by fanin edges instead of LUT count.
    Edge,
}

/// Cut enumeration parameters.
#[derive(Clone, Copy, Debug)]
pub struct CutParams {
    /// LUT size `K`, at most [`LEAF_MAX`].
    pub lut_size: usize,
    /// Maximum number of kept cuts per node.
    pub cut_limit: usize,
    /// Comparator policy.
    pub policy: CutPolicy,
}

impl Default for CutParams {
    fn default() -> CutParams {
        CutParams {
            lut_size: 6,
            cut_limit: 8,
            policy: CutPolicy::Delay,
        }
    }
}

/// Per-node cut sets plus the arrival/flow tables they were costed with.
pub struct CutSets {
    /// Kept cuts per node, best first, trivial cut last.
    pub cuts: SecondaryMap<Node, Vec<Cut>>,
    /// Arrival estimate per node (best cut's arrival).
    pub arrival: SecondaryMap<Node, i32>,
    /// Area-flow estimate per node.
    pub flow: SecondaryMap<Node, f32>,
}

impl CutSets {
    /// The current best (first) cut of `n`.
    pub fn best(&self, n: Node) -> &Cut {
        &self.cuts[n][0]
    }
}

fn compare(policy: CutPolicy, a: &Cut, b: &Cut) -> Ordering {
    let by = match policy {
        CutPolicy::Delay => (a.arrival.cmp(&b.arrival))
            .then(a.leaves.len().cmp(&b.leaves.len()))
            .then(a.flow.total_cmp(&b.flow)),
        CutPolicy::Area | CutPolicy::Edge => (a.flow.total_cmp(&b.flow))
            .then(a.leaves.len().cmp(&b.leaves.len()))
            .then(a.arrival.cmp(&b.arrival)),
    };
    by.then(a.sign.cmp(&b.sign)).then_with(|| {
        for (x, y) in a.leaves.iter().zip(b.leaves.iter()) {
            match x.cmp(y) {
                Ordering::Equal => {}
                other => return other,
            }
        }
        Ordering::Equal
    })
}

/// Two-pointer union of two sorted leaf sets; `None` when the union would
/// exceed `k` leaves. Duplicate leaves count once.
fn merge_leaves(a: &[Lit], b: &[Lit], k: usize) -> Option<SmallVec<[Lit; LEAF_MAX]>> {
    let mut out: SmallVec<[Lit; LEAF_MAX]> = SmallVec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if out.len() == k {
            return None;
        }
        match a[i].cmp(&b[j]) {
            Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    for &l in &a[i..] {
        if out.len() == k {
            return None;
        }
        out.push(l);
    }
    for &l in &b[j..] {
        if out.len() == k {
            return None;
        }
        out.push(l);
    }
    Some(out)
}

/// Inserts `cand` into the sorted store, applying dominance filtering in
/// both directions with the signature precheck, and dropping the worst
/// entry when the store would exceed `limit`.
fn add_to_store(store: &mut Vec<Cut>, cand: Cut, limit: usize, policy: CutPolicy) {
    if store.is_empty() {
        store.push(cand);
        return;
    }
    if store.len() == limit && compare(policy, store.last().unwrap(), &cand) != Ordering::Greater {
        return;
    }
    // Position after every kept cut that is better than the candidate.
    let pivot = store
        .iter()
        .take_while(|kept| compare(policy, kept, &cand) == Ordering::Less)
        .count();
    // A better-or-equal cut that is a subset of the candidate dominates it.
    for kept in &store[..pivot] {
        if kept.leaves.len() <= cand.leaves.len()
            && cand.sign & kept.sign == kept.sign
            && kept.subset_of(&cand)
        {
            return;
        }
    }
    store.insert(pivot, cand);
    // The candidate in turn dominates any worse superset.
    let cand_ref = store[pivot].clone();
    let mut k = pivot + 1;
    while k < store.len() {
        let kept = &store[k];
        if cand_ref.leaves.len() <= kept.leaves.len()
            && kept.sign & cand_ref.sign == cand_ref.sign
            && cand_ref.subset_of(kept)
        {
            store.remove(k);
        } else {
            k += 1;
        }
    }
    store.truncate(limit);
}

/// Enumerates cuts for every node using fanout counts as the reference
/// estimate.
pub fn compute_cuts(aig: &Aig, params: &CutParams) -> CutSets {
    let fanouts = aig.fanout_counts();
    let mut refs: SecondaryMap<Node, f32> = SecondaryMap::with_capacity(aig.node_count());
    for n in aig.nodes() {
        refs[n] = (fanouts[n] as f32).max(1.0);
    }
    compute_cuts_with_refs(aig, params, &refs)
}

/// Enumerates cuts with caller-provided reference estimates; the mapper
/// re-enters here with blended references between rounds.
pub(crate) fn compute_cuts_with_refs(
    aig: &Aig,
    params: &CutParams,
    refs: &SecondaryMap<Node, f32>,
) -> CutSets {
    assert!(params.lut_size >= 2 && params.lut_size <= LEAF_MAX);
    assert!(params.cut_limit >= 1);
    let mut sets = CutSets {
        cuts: SecondaryMap::with_capacity(aig.node_count()),
        arrival: SecondaryMap::with_capacity(aig.node_count()),
        flow: SecondaryMap::with_capacity(aig.node_count()),
    };
    let mut n_pairs = 0u64;
    let mut n_kept = 0u64;
    for n in aig.nodes() {
        match aig.node(n) {
            NodeData::Ci { .. } => {
                sets.cuts[n] = vec![Cut::trivial(n, 0, 0.0)];
                sets.arrival[n] = 0;
                sets.flow[n] = 0.0;
            }
            NodeData::And { f0, f1 } => {
                let mut store: Vec<Cut> = Vec::with_capacity(params.cut_limit + 1);
                let cuts0 = std::mem::take(&mut sets.cuts[f0.node()]);
                let cuts1 = std::mem::take(&mut sets.cuts[f1.node()]);
                n_pairs += (cuts0.len() * cuts1.len()) as u64;
                for c0 in &cuts0 {
                    for c1 in &cuts1 {
                        if (c0.sign | c1.sign).count_ones() as usize > params.lut_size {
                            continue;
                        }
                        let Some(leaves) = merge_leaves(&c0.leaves, &c1.leaves, params.lut_size)
                        else {
                            continue;
                        };
                        let sign = c0.sign | c1.sign;
                        let arrival = 1 + leaves
                            .iter()
                            .map(|l| sets.arrival[l.node()])
                            .max()
                            .unwrap_or(0);
                        let flow = leaves.iter().map(|l| sets.flow[l.node()]).sum();
                        let cand = Cut {
                            leaves,
                            sign,
                            arrival,
                            flow,
                        };
                        add_to_store(&mut store, cand, params.cut_limit, params.policy);
                    }
                }
                sets.cuts[f0.node()] = cuts0;
                sets.cuts[f1.node()] = cuts1;
                debug_assert!(!store.is_empty(), "the fanin-pair cut always merges");
                sets.arrival[n] = store[0].arrival;
                sets.flow[n] = (store[0].flow + 1.0) / refs[n];
                n_kept += store.len() as u64;
                store.push(Cut::trivial(n, sets.arrival[n], sets.flow[n]));
                sets.cuts[n] = store;
            }
            NodeData::Const0 | NodeData::Co { .. } => {}
        }
    }
    log::debug!(
        "cut enumeration: {} pairs considered, {} cuts kept",
        n_pairs,
        n_kept
    );
    sets
}

/// Evaluates the function of `root` over the given leaves as a 64-bit truth
/// table (leaf `i` is the `i`-th projection variable). Returns `None` when
/// the cone of `root` is not covered by the leaves.
pub fn cone_truth(aig: &Aig, root: Lit, leaves: &[Lit]) -> Option<u64> {
    const PROJ: [u64; LEAF_MAX] = [
        0xAAAA_AAAA_AAAA_AAAA,
        0xCCCC_CCCC_CCCC_CCCC,
        0xF0F0_F0F0_F0F0_F0F0,
        0xFF00_FF00_FF00_FF00,
        0xFFFF_0000_FFFF_0000,
        0xFFFF_FFFF_0000_0000,
    ];
    assert!(leaves.len() <= LEAF_MAX);
    fn eval(
        aig: &Aig,
        n: Node,
        leaves: &[Lit],
        memo: &mut crate::fx::FxHashMap<Node, u64>,
    ) -> Option<u64> {
        if let Some(&v) = memo.get(&n) {
            return Some(v);
        }
        if let Some(i) = leaves.iter().position(|l| l.node() == n) {
            let v = PROJ[i];
            memo.insert(n, v);
            return Some(v);
        }
        let v = match aig.node(n) {
            NodeData::Const0 => 0,
            NodeData::And { f0, f1 } => {
                let a = eval(aig, f0.node(), leaves, memo)? ^ if f0.is_complement() { !0 } else { 0 };
                let b = eval(aig, f1.node(), leaves, memo)? ^ if f1.is_complement() { !0 } else { 0 };
                a & b
            }
            NodeData::Ci { .. } | NodeData::Co { .. } => return None,
        };
        memo.insert(n, v);
        Some(v)
    }
    let mut memo = crate::fx::FxHashMap::default();
    let v = eval(aig, root.node(), leaves, &mut memo)?;
    Some(if root.is_complement() { !v } else { v })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Simulator;

    fn diamond() -> (Aig, Lit, Lit, Lit, Lit, Lit) {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let c = aig.add_ci();
        let ab = aig.and(a, b);
        let bc = aig.and(b, c);
        let g = aig.and(ab, bc);
        aig.add_co(g);
        (aig, a, b, c, ab, g)
    }

    #[test]
    fn every_node_has_the_trivial_cut_last() {
        let (aig, ..) = diamond();
        let sets = compute_cuts(&aig, &CutParams::default());
        for n in aig.ands() {
            let cuts = &sets.cuts[n];
            assert!(cuts.last().unwrap().is_trivial(n));
            assert!(!cuts[0].is_trivial(n) || cuts.len() == 1);
        }
    }

    #[test]
    fn dominated_cuts_are_filtered() {
        let (aig, a, b, c, _, g) = diamond();
        let sets = compute_cuts(&aig, &CutParams::default());
        // The merge of the fanin trivial cuts of g is {ab, bc}; the merge
        // of their leaf cuts is {a, b, c}. No kept cut may be a proper
        // subset of another kept cut.
        let cuts = &sets.cuts[g.node()];
        let abc: Vec<Lit> = vec![a, b, c];
        assert!(cuts.iter().any(|cut| cut.leaves.as_slice() == &abc[..]));
        for (i, x) in cuts.iter().enumerate() {
            for (k, y) in cuts.iter().enumerate() {
                if i != k && x.leaves.len() <= y.leaves.len() && !y.is_trivial(g.node()) {
                    assert!(!x.subset_of(y), "{:?} dominates {:?}", x, y);
                }
            }
        }
    }

    #[test]
    fn signatures_cover_leaves() {
        let (aig, ..) = diamond();
        let sets = compute_cuts(&aig, &CutParams::default());
        for n in aig.ands() {
            for cut in &sets.cuts[n] {
                assert_eq!(cut.sign, Cut::signature(&cut.leaves));
                assert!(cut.leaves.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }

    #[test]
    fn lut_size_bounds_leaf_count() {
        let mut aig = Aig::new();
        let inputs: Vec<Lit> = (0..8).map(|_| aig.add_ci()).collect();
        let mut acc = inputs[0];
        for &i in &inputs[1..] {
            acc = aig.and(acc, i);
        }
        aig.add_co(acc);
        for k in 2..=LEAF_MAX {
            let sets = compute_cuts(
                &aig,
                &CutParams {
                    lut_size: k,
                    ..CutParams::default()
                },
            );
            for n in aig.ands() {
                for cut in &sets.cuts[n] {
                    assert!(cut.leaves.len() <= k);
                }
            }
        }
    }

    #[test]
    fn cut_functions_match_simulation() {
        // For every cut, the function of the root over the cut leaves must
        // agree with plain simulation on every pattern.
        let (aig, ..) = diamond();
        let sets = compute_cuts(&aig, &CutParams::default());
        let mut sim = Simulator::new(11);
        sim.randomize(&aig, 2, None);
        sim.run(&aig);
        for n in aig.ands() {
            for cut in &sets.cuts[n] {
                let truth =
                    cone_truth(&aig, Lit::new(n, false), &cut.leaves).expect("cone within leaves");
                for w in 0..sim.word_count() {
                    let mut expect = 0u64;
                    for bit in 0..64 {
                        let mut idx = 0usize;
                        for (i, &l) in cut.leaves.iter().enumerate() {
                            if sim.lit_word(l, w) >> bit & 1 != 0 {
                                idx |= 1 << i;
                            }
                        }
                        if truth >> idx & 1 != 0 {
                            expect |= 1 << bit;
                        }
                    }
                    assert_eq!(expect, sim.node_words(n)[w]);
                }
            }
        }
    }

    #[test]
    fn area_policy_prefers_smaller_flow() {
        let (aig, ..) = diamond();
        let sets = compute_cuts(
            &aig,
            &CutParams {
                policy: CutPolicy::Area,
                ..CutParams::default()
            },
        );
        for n in aig.ands() {
            let cuts = &sets.cuts[n];
            for w in cuts.windows(2) {
                if w[1].is_trivial(n) {
                    continue;
                }
                assert!(w[0].flow.total_cmp(&w[1].flow) != Ordering::Greater);
            }
        }
    }
}
