//! SAT sweeping under a care set.
//!
//! The sweeper merges every AND node into the oldest member of its
//! SAT-equivalence class, where equivalence only has to hold on input
//! patterns accepted by a second, combinational *care* AIG. The care cone
//! is rebuilt into a fraig manager whose structural hashing makes purely
//! structural merges free; candidate classes come from simulation anchored
//! on one care-satisfying pivot pattern, and each remaining candidate is
//! discharged by two assumption queries against the care-constrained CNF.
//!
//! Counterexamples are appended to the pattern set and refine the classes
//! before the node is retried; timeouts leave the node in its own class.
//! The solver is recycled every so many queries to keep learned-clause
//! growth bounded. Partial results stay valid: every proven merge survives
//! an exhausted deadline.

use crate::aig::{Aig, Lit, Node, NodeData};
use crate::error::{Error, Result};
use crate::sat::{Budget, Solver, Status, VarMap};
use crate::sim::{classes_from_sim, refine_classes, Simulator};
use cranelift_entity::SecondaryMap;
use std::time::Instant;

/// Sweeper parameters.
#[derive(Clone, Copy, Debug)]
pub struct SweepParams {
    /// 64-bit words per simulation round.
    pub sim_words: usize,
    /// Initial refinement rounds before any SAT query.
    pub sim_rounds: usize,
    /// Conflict budget per SAT query.
    pub conflict_limit: u64,
    /// Queries between solver recycles.
    pub recycle_calls: usize,
    /// Optional overall deadline; proven merges survive it.
    pub deadline: Option<Instant>,
    /// Seed for the pattern generator.
    pub seed: u64,
}

impl Default for SweepParams {
    fn default() -> SweepParams {
        SweepParams {
            sim_words: 8,
            sim_rounds: 16,
            conflict_limit: 1000,
            recycle_calls: 100,
            deadline: None,
            seed: 0x51ee_70a1,
        }
    }
}

/// Sweep statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct SweepStats {
    /// SAT equivalence queries issued.
    pub queries: usize,
    /// Merges proven by SAT or by structure.
    pub merged: usize,
    /// Queries answered by a counterexample.
    pub cexes: usize,
    /// Queries that ran out of budget.
    pub timeouts: usize,
    /// Solver recycles.
    pub recycles: usize,
    /// The care set admitted no pattern at all.
    pub vacuous: bool,
}

struct SolverCtx {
    solver: Solver,
    vmap: VarMap,
    calls: usize,
}

impl SolverCtx {
    fn fresh(fraig: &Aig, care_outs: &[Lit]) -> SolverCtx {
        let mut solver = Solver::new();
        let mut vmap = VarMap::new();
        for &out in care_outs {
            let l = vmap.sat_lit(&mut solver, fraig, out);
            solver.add_clause(&[l]);
        }
        SolverCtx {
            solver,
            vmap,
            calls: 0,
        }
    }
}

/// Sweeps `aig` under `care` and returns the reduced manager with stats.
///
/// `care` must be combinational and range over the primary inputs of
/// `aig`; register outputs of a sequential subject are treated as free
/// inputs. A care set with no satisfying pattern makes the problem vacuous
/// and the subject is returned unchanged.
pub fn sweep(aig: &Aig, care: &Aig, params: &SweepParams) -> Result<(Aig, SweepStats)> {
    if care.register_count() != 0 {
        return Err(Error::Unsupported(
            "care set must be combinational".into(),
        ));
    }
    if care.ci_count() != aig.pi_count() {
        return Err(Error::Unsupported(format!(
            "care set ranges over {} inputs, subject has {} primary inputs",
            care.ci_count(),
            aig.pi_count()
        )));
    }
    let mut stats = SweepStats::default();

    // One care-satisfying pivot assignment, by simulation first and by SAT
    // second.
    let pivot = match find_pivot(care, params) {
        Some(p) => p,
        None => {
            log::warn!("care set is unsatisfiable; sweeping is vacuous");
            stats.vacuous = true;
            return Ok((aig.clone(), stats));
        }
    };
    let mut pivot_full = pivot;
    pivot_full.resize(aig.ci_count(), false);

    // Candidate classes from pivot-anchored random simulation. Patterns
    // rejected by the care set are masked out of the class comparison, so
    // care-conditional equivalences survive as candidates.
    let mut sim = Simulator::new(params.seed);
    let mut care_sim = Simulator::new(params.seed ^ 1);
    sim.randomize(aig, params.sim_words, Some(&pivot_full));
    sim.run(aig);
    let mask = care_mask(care, &sim, &mut care_sim);
    let mut eq = classes_from_sim(aig, &sim, Some(&mask));
    for round in 1..params.sim_rounds {
        sim.randomize(aig, params.sim_words, Some(&pivot_full));
        sim.run(aig);
        let mask = care_mask(care, &sim, &mut care_sim);
        let moved = refine_classes(aig, &sim, &mut eq, Some(&mask));
        if moved == 0 && round > 4 {
            break;
        }
    }
    // Counterexamples are replayed on top of the pivot pattern.
    sim.reset_patterns(aig, params.sim_words.max(1));
    sim.append_pattern(aig, &pivot_full);
    sim.run(aig);

    // The fraig shares the subject's inputs and carries the care cone.
    let mut fraig = Aig::new();
    for _ in 0..aig.ci_count() {
        fraig.add_ci();
    }
    let care_outs = copy_cone(care, &mut fraig);
    let mut ctx = SolverCtx::fresh(&fraig, &care_outs);

    let budget = Budget {
        conflicts: Some(params.conflict_limit),
        deadline: params.deadline,
    };
    let mut copy: SecondaryMap<Node, Lit> = SecondaryMap::with_capacity(aig.node_count());
    copy[Node::CONST0] = Lit::CONST0;
    for (i, n) in aig.cis().enumerate() {
        copy[n] = Lit::new(fraig.ci_node(i), false);
    }

    'nodes: for n in aig.nodes().collect::<Vec<_>>() {
        let NodeData::And { f0, f1 } = aig.node(n) else {
            continue;
        };
        if let Some(deadline) = params.deadline {
            if Instant::now() > deadline {
                log::debug!("sweep deadline reached; keeping remaining nodes");
                break;
            }
        }
        let m0 = copy[f0.node()].xor_complement(f0.is_complement());
        let m1 = copy[f1.node()].xor_complement(f1.is_complement());
        let ln = fraig.and(m0, m1);
        copy[n] = ln;

        loop {
            let Some(r) = eq.repr_of(n) else {
                break;
            };
            let rl = copy[r].xor_complement(eq.phase_of(n));
            if ln == rl {
                eq.set_proved(n);
                copy[n] = rl;
                stats.merged += 1;
                break;
            }
            let sn = ctx.vmap.sat_lit(&mut ctx.solver, &fraig, ln);
            let sr = ctx.vmap.sat_lit(&mut ctx.solver, &fraig, rl);
            stats.queries += 1;
            ctx.calls += 1;
            let status = {
                let s1 = ctx.solver.solve_with(&[sn, !sr], &budget);
                if s1 == Status::Unsat {
                    ctx.solver.solve_with(&[!sn, sr], &budget)
                } else {
                    s1
                }
            };
            match status {
                Status::Unsat => {
                    eq.set_proved(n);
                    copy[n] = rl;
                    stats.merged += 1;
                    break;
                }
                Status::Sat => {
                    stats.cexes += 1;
                    let pat: Vec<bool> = (0..aig.ci_count())
                        .map(|i| {
                            ctx.vmap
                                .lookup(fraig.ci_node(i))
                                .map(|l| ctx.solver.model_value(l.var()) ^ l.is_neg())
                                .unwrap_or(false)
                        })
                        .collect();
                    sim.append_pattern(aig, &pat);
                    sim.run(aig);
                    let mask = care_mask(care, &sim, &mut care_sim);
                    refine_classes(aig, &sim, &mut eq, Some(&mask));
                    if eq.repr_of(n) == Some(r) && !eq.is_proved(n) {
                        // The counterexample failed to split the class,
                        // which means it violated the care set; keep the
                        // node rather than loop.
                        log::trace!("counterexample did not refine {}; keeping", n);
                        eq.clear_repr(n);
                        break;
                    }
                }
                Status::Timeout => {
                    stats.timeouts += 1;
                    eq.clear_repr(n);
                    continue 'nodes;
                }
            }
        }
        if ctx.calls >= params.recycle_calls {
            ctx = SolverCtx::fresh(&fraig, &care_outs);
            stats.recycles += 1;
        }
    }

    let mut subject = aig.clone();
    subject.clear_side_cars();
    subject.equivs = Some(eq);
    let reduced = subject.reduce_equivs();
    log::debug!(
        "sweep: {} queries, {} merged, {} cex, {} timeouts, {} -> {} ands",
        stats.queries,
        stats.merged,
        stats.cexes,
        stats.timeouts,
        aig.and_count(),
        reduced.and_count()
    );
    Ok((reduced, stats))
}

/// One bit per pattern of `sim` telling whether the care set accepts it.
fn care_mask(care: &Aig, sim: &Simulator, care_sim: &mut Simulator) -> Vec<u64> {
    if care.co_count() == 0 {
        return vec![!0u64; sim.word_count()];
    }
    care_sim.adopt_patterns(sim, care.ci_count());
    care_sim.run(care);
    care_sim.accept_mask(care)
}

/// Finds one input assignment accepted by every care output.
fn find_pivot(care: &Aig, params: &SweepParams) -> Option<Vec<bool>> {
    if care.co_count() == 0 {
        return Some(vec![false; care.ci_count()]);
    }
    let mut sim = Simulator::new(params.seed ^ 0x9e37_79b9_7f4a_7c15);
    for _ in 0..4 {
        sim.randomize(care, params.sim_words.max(1), None);
        sim.run(care);
        if let Some(p) = sim.sat_assignment(care) {
            return Some(p);
        }
    }
    // Simulation failed; ask the solver.
    let mut solver = Solver::new();
    let mut vmap = VarMap::new();
    let assumps: Vec<crate::sat::Lit> = (0..care.co_count())
        .map(|i| {
            let d = care.co_driver_at(i);
            vmap.sat_lit(&mut solver, care, d)
        })
        .collect();
    match solver.solve_with(&assumps, &Budget::with_conflicts(params.conflict_limit)) {
        Status::Sat => Some(
            (0..care.ci_count())
                .map(|i| {
                    vmap.lookup(care.ci_node(i))
                        .map(|l| solver.model_value(l.var()) ^ l.is_neg())
                        .unwrap_or(false)
                })
                .collect(),
        ),
        _ => None,
    }
}

/// Copies the cone of every CO of `src` into `dst` through the strash,
/// mapping CI `i` of `src` onto CI `i` of `dst`. Returns the CO driver
/// literals in `dst`.
fn copy_cone(src: &Aig, dst: &mut Aig) -> Vec<Lit> {
    let mut copy: SecondaryMap<Node, Lit> = SecondaryMap::with_capacity(src.node_count());
    copy[Node::CONST0] = Lit::CONST0;
    for (i, n) in src.cis().enumerate() {
        copy[n] = Lit::new(dst.ci_node(i), false);
    }
    for n in src.nodes().collect::<Vec<_>>() {
        if let NodeData::And { f0, f1 } = src.node(n) {
            let g0 = copy[f0.node()].xor_complement(f0.is_complement());
            let g1 = copy[f1.node()].xor_complement(f1.is_complement());
            copy[n] = dst.and(g0, g1);
        }
    }
    src.cos()
        .map(|co| {
            let d = src.co_driver(co);
            copy[d.node()].xor_complement(d.is_complement())
        })
        .collect()
}

/// A care set that is constant true over `n` inputs.
pub fn trivial_care(n: usize) -> Aig {
    let mut care = Aig::new();
    for _ in 0..n {
        care.add_ci();
    }
    care.add_co(Lit::CONST1);
    care
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_and_merges_under_trivial_care() {
        // Two copies of a & b built past the unique table.
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let n1 = aig.append_and_raw(a, b);
        let n2 = aig.append_and_raw(a, b);
        aig.add_co(n1);
        aig.add_co(n2);
        let care = trivial_care(2);
        let (swept, stats) = sweep(&aig, &care, &SweepParams::default()).unwrap();
        assert_eq!(swept.and_count(), 1);
        assert_eq!(swept.co_driver_at(0), swept.co_driver_at(1));
        assert!(stats.merged >= 1);
        assert!(!stats.vacuous);
    }

    #[test]
    fn associativity_is_proven_by_sat() {
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
        let care = trivial_care(3);
        let (swept, stats) = sweep(&aig, &care, &SweepParams::default()).unwrap();
        assert_eq!(swept.co_driver_at(0), swept.co_driver_at(1));
        assert!(swept.and_count() < aig.and_count());
        assert!(stats.merged >= 1);
    }

    #[test]
    fn care_set_can_mask_differences() {
        // f = a, g = a | b. They differ only when b = 1 and a = 0; under
        // the care set !b they must merge.
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let g = aig.or(a, b);
        aig.add_co(a);
        aig.add_co(g);

        let mut care = Aig::new();
        let ca = care.add_ci();
        let cb = care.add_ci();
        let _ = ca;
        care.add_co(!cb);

        let (swept, _) = sweep(&aig, &care, &SweepParams::default()).unwrap();
        assert_eq!(swept.co_driver_at(0), swept.co_driver_at(1));
    }

    #[test]
    fn unsat_care_is_vacuous() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let x = aig.and(a, b);
        aig.add_co(x);

        let mut care = Aig::new();
        let ca = care.add_ci();
        let _ = care.add_ci();
        let never = care.and(ca, !ca);
        care.add_co(never);

        let (swept, stats) = sweep(&aig, &care, &SweepParams::default()).unwrap();
        assert!(stats.vacuous);
        assert_eq!(swept.and_count(), aig.and_count());
    }

    #[test]
    fn inequivalent_nodes_stay_apart() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let x = aig.and(a, b);
        let y = aig.or(a, b);
        aig.add_co(x);
        aig.add_co(y);
        let care = trivial_care(2);
        let (swept, _) = sweep(&aig, &care, &SweepParams::default()).unwrap();
        assert_ne!(swept.co_driver_at(0), swept.co_driver_at(1));
    }
}
