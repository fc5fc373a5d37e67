//! Area/flow-optimal LUT covering over the enumerated cuts.
//!
//! Mapping runs as rounds of three passes: a forward *flow* pass that picks
//! the cut minimizing normalized area flow, then two reverse *exact* passes
//! that re-evaluate the chosen cuts against the maximum fanout-free cone
//! (first counting LUTs, then fanin edges), crediting logic that is already
//! shared. Reference estimates are blended between passes so that the flow
//! normalization tracks the emerging cover.
//!
//! The chosen cut of a node is promoted to the front of its cut list; the
//! final cover is read off the nodes that remain referenced.

use crate::aig::{Aig, Node, NodeData};
use crate::cut::{compute_cuts_with_refs, Cut, CutParams, CutPolicy, CutSets};
use cranelift_entity::SecondaryMap;
use smallvec::SmallVec;

/// Mapper parameters.
#[derive(Clone, Copy, Debug)]
pub struct MapParams {
    /// LUT size `K`.
    pub lut_size: usize,
    /// Cuts kept per node during enumeration.
    pub cut_limit: usize,
    /// Number of flow/area/edge rounds.
    pub rounds: usize,
    /// Comparator used while enumerating cuts.
    pub policy: CutPolicy,
}

impl Default for MapParams {
    fn default() -> MapParams {
        MapParams {
            lut_size: 6,
            cut_limit: 8,
            rounds: 1,
            policy: CutPolicy::Area,
        }
    }
}

/// One LUT of the cover: the leaf nodes and the root implementing the cone.
#[derive(Clone, Debug)]
pub struct Lut {
    /// Leaf nodes, sorted ascending.
    pub leaves: SmallVec<[Node; crate::cut::LEAF_MAX]>,
    /// The covered root node.
    pub root: Node,
}

/// A LUT cover, ordered by root node id.
#[derive(Clone, Debug, Default)]
pub struct Mapping {
    /// The LUTs, root ids ascending.
    pub luts: Vec<Lut>,
}

impl Mapping {
    /// The LUT rooted at `n`, if the cover uses `n`.
    pub fn lut_for(&self, n: Node) -> Option<&Lut> {
        self.luts
            .binary_search_by_key(&n, |l| l.root)
            .ok()
            .map(|i| &self.luts[i])
    }
}

/// Cover statistics after the final pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct MapStats {
    /// Number of LUTs.
    pub area: usize,
    /// Total fanin edges of the cover.
    pub edges: usize,
    /// Depth of the cover in LUT levels.
    pub delay: i32,
}

struct Mapper<'a> {
    aig: &'a Aig,
    sets: CutSets,
    refs: SecondaryMap<Node, f32>,
    nrefs: SecondaryMap<Node, u32>,
    area: usize,
    edges: usize,
    delay: i32,
}

const EDGE_LUT_COST: usize = 32;

impl<'a> Mapper<'a> {
    fn new(aig: &'a Aig, params: &MapParams) -> Mapper<'a> {
        let fanouts = aig.fanout_counts();
        let mut refs: SecondaryMap<Node, f32> = SecondaryMap::with_capacity(aig.node_count());
        for n in aig.nodes() {
            refs[n] = (fanouts[n] as f32).max(1.0);
        }
        let cut_params = CutParams {
            lut_size: params.lut_size,
            cut_limit: params.cut_limit,
            policy: params.policy,
        };
        let sets = compute_cuts_with_refs(aig, &cut_params, &refs);
        Mapper {
            aig,
            sets,
            refs,
            nrefs: SecondaryMap::new(),
            area: 0,
            edges: 0,
            delay: 0,
        }
    }

    fn best(&self, n: Node) -> &Cut {
        &self.sets.cuts[n][0]
    }

    /// Rebuilds the integer reference counts from the current best cuts and
    /// blends them into the float estimates.
    fn compute_refs(&mut self) {
        self.nrefs = SecondaryMap::new();
        self.area = 0;
        self.edges = 0;
        for n in self.aig.nodes().collect::<Vec<_>>().into_iter().rev() {
            match self.aig.node(n) {
                NodeData::Co { driver, .. } => self.nrefs[driver.node()] += 1,
                NodeData::And { .. } if self.nrefs[n] > 0 => {
                    let leaves: Vec<Node> =
                        self.best(n).leaves.iter().map(|l| l.node()).collect();
                    self.edges += leaves.len();
                    self.area += 1;
                    for l in leaves {
                        self.nrefs[l] += 1;
                    }
                }
                _ => {}
            }
            let fresh = self.nrefs[n] as f32;
            let blended = (0.9 * self.refs[n] + 0.2 * fresh).max(1.0);
            self.sets.flow[n] = self.sets.flow[n] * self.refs[n] / blended;
            self.refs[n] = blended;
        }
        self.compute_delay();
    }

    /// Recomputes arrivals of referenced nodes from their best cuts and the
    /// cover depth at the COs.
    fn compute_delay(&mut self) {
        for n in self.aig.nodes() {
            if self.aig.is_and(n) && self.nrefs[n] > 0 {
                let arr = 1 + self
                    .best(n)
                    .leaves
                    .iter()
                    .map(|l| self.sets.arrival[l.node()])
                    .max()
                    .unwrap_or(0);
                self.sets.arrival[n] = arr;
            }
        }
        self.delay = self
            .aig
            .cos()
            .map(|co| self.sets.arrival[self.aig.co_driver(co).node()])
            .max()
            .unwrap_or(0);
    }

    /// Promotes cut `idx` of `n` to the front of its list.
    fn promote(&mut self, n: Node, idx: usize) {
        if idx > 0 {
            let c = self.sets.cuts[n].remove(idx);
            self.sets.cuts[n].insert(0, c);
        }
    }

    /// Forward pass: pick the cut with the least normalized area flow.
    fn pass_flow(&mut self) {
        for n in self.aig.nodes().collect::<Vec<_>>() {
            if !self.aig.is_and(n) {
                continue;
            }
            let mut best_idx = 0;
            let mut best_flow = f32::INFINITY;
            let mut best_arr = i32::MAX;
            for (i, cut) in self.sets.cuts[n].iter().enumerate() {
                if cut.is_trivial(n) {
                    continue;
                }
                let flow: f32 = cut.leaves.iter().map(|l| self.sets.flow[l.node()]).sum();
                let arr = 1 + cut
                    .leaves
                    .iter()
                    .map(|l| self.sets.arrival[l.node()])
                    .max()
                    .unwrap_or(0);
                if flow < best_flow || (flow == best_flow && arr < best_arr) {
                    best_idx = i;
                    best_flow = flow;
                    best_arr = arr;
                }
            }
            self.promote(n, best_idx);
            self.sets.arrival[n] = best_arr;
            self.sets.flow[n] = (best_flow + 1.0) / self.refs[n];
        }
        self.compute_refs();
        log::debug!(
            "flow pass: area {} edges {} delay {}",
            self.area,
            self.edges,
            self.delay
        );
    }

    fn lut_cost(&self, n: Node, edge_mode: bool) -> usize {
        if edge_mode {
            EDGE_LUT_COST + self.best(n).leaves.len()
        } else {
            1
        }
    }

    /// Dereferences the MFFC of the best cut of `n`, returning its cost.
    fn deref_mffc(&mut self, n: Node, edge_mode: bool) -> usize {
        let mut cost = self.lut_cost(n, edge_mode);
        let leaves: Vec<Node> = self.best(n).leaves.iter().map(|l| l.node()).collect();
        for l in leaves {
            self.nrefs[l] -= 1;
            if self.nrefs[l] == 0 && !self.best(l).is_trivial(l) {
                cost += self.deref_mffc(l, edge_mode);
            }
        }
        cost
    }

    /// References the MFFC of the best cut of `n`, returning its cost.
    fn ref_mffc(&mut self, n: Node, edge_mode: bool) -> usize {
        let mut cost = self.lut_cost(n, edge_mode);
        let leaves: Vec<Node> = self.best(n).leaves.iter().map(|l| l.node()).collect();
        for l in leaves {
            let was = self.nrefs[l];
            self.nrefs[l] += 1;
            if was == 0 && !self.best(l).is_trivial(l) {
                cost += self.ref_mffc(l, edge_mode);
            }
        }
        cost
    }

    /// Exact cost of covering `n` with `cut`: references the cone, counts
    /// the newly referenced LUTs, and undoes the references.
    fn probe_cost(&mut self, n: Node, cut: &Cut, edge_mode: bool) -> usize {
        let mut touched: Vec<Node> = Vec::new();
        let mut cost = if edge_mode {
            EDGE_LUT_COST + cut.leaves.len()
        } else {
            1
        };
        let mut stack: Vec<Node> = cut.leaves.iter().map(|l| l.node()).collect();
        while let Some(l) = stack.pop() {
            let was = self.nrefs[l];
            self.nrefs[l] += 1;
            touched.push(l);
            if was == 0 && !self.best(l).is_trivial(l) {
                cost += self.lut_cost(l, edge_mode);
                stack.extend(self.best(l).leaves.iter().map(|x| x.node()));
            }
        }
        let _ = n;
        for l in touched {
            self.nrefs[l] -= 1;
        }
        cost
    }

    /// Reverse pass with exact-area (or exact-edge) costing.
    fn pass_exact(&mut self, edge_mode: bool) {
        self.area = 0;
        self.edges = 0;
        for n in self.aig.nodes().collect::<Vec<_>>().into_iter().rev() {
            if !self.aig.is_and(n) || self.nrefs[n] == 0 {
                continue;
            }
            self.deref_mffc(n, edge_mode);
            let n_cuts = self.sets.cuts[n].len();
            let mut best_idx = 0;
            let mut best_cost = usize::MAX;
            let mut best_arr = i32::MAX;
            for i in 0..n_cuts {
                let cut = self.sets.cuts[n][i].clone();
                if cut.is_trivial(n) {
                    continue;
                }
                let cost = self.probe_cost(n, &cut, edge_mode);
                let arr = 1 + cut
                    .leaves
                    .iter()
                    .map(|l| self.sets.arrival[l.node()])
                    .max()
                    .unwrap_or(0);
                if cost < best_cost || (cost == best_cost && arr < best_arr) {
                    best_idx = i;
                    best_cost = cost;
                    best_arr = arr;
                }
            }
            self.promote(n, best_idx);
            self.ref_mffc(n, edge_mode);
            self.area += 1;
            self.edges += self.best(n).leaves.len();
        }
        self.compute_delay();
        log::debug!(
            "{} pass: area {} edges {} delay {}",
            if edge_mode { "edge" } else { "area" },
            self.area,
            self.edges,
            self.delay
        );
    }

    fn derive(&self) -> (Mapping, MapStats) {
        let mut mapping = Mapping::default();
        for n in self.aig.nodes() {
            if self.aig.is_and(n) && self.nrefs[n] > 0 {
                let best = self.best(n);
                debug_assert!(!best.is_trivial(n));
                mapping.luts.push(Lut {
                    leaves: best.leaves.iter().map(|l| l.node()).collect(),
                    root: n,
                });
            }
        }
        let stats = MapStats {
            area: self.area,
            edges: self.edges,
            delay: self.delay,
        };
        (mapping, stats)
    }
}

/// Covers `aig` by `K`-input LUTs and returns the cover with its stats.
pub fn map_luts(aig: &Aig, params: &MapParams) -> (Mapping, MapStats) {
    let mut m = Mapper::new(aig, params);
    m.compute_refs();
    for round in 0..params.rounds.max(1) {
        log::debug!("mapping round {}", round);
        m.pass_flow();
        m.pass_exact(false);
        m.pass_exact(true);
    }
    m.derive()
}

/// Checks that a cover is a legal implementation of `aig`: every CO driver
/// is a CI, constant, or LUT root, and every LUT leaf is a CI or another
/// LUT root.
pub fn verify_cover(aig: &Aig, mapping: &Mapping) -> bool {
    let is_root = |n: Node| mapping.lut_for(n).is_some();
    for co in aig.cos() {
        let d = aig.co_driver(co).node();
        if aig.is_and(d) && !is_root(d) {
            return false;
        }
    }
    for lut in &mapping.luts {
        if !aig.is_and(lut.root) {
            return false;
        }
        for &l in &lut.leaves {
            if aig.is_and(l) && !is_root(l) {
                return false;
            }
            if aig.is_co(l) {
                return false;
            }
        }
    }
    true
}
