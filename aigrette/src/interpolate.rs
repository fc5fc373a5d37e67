//! Craig interpolation over the solver's resolution trace, and the
//! interpolation-based unbounded model checker built on it.
//!
//! The proof engine replays the recorded refutation bottom-up. Every root
//! clause starts with a constant partial interpolant (`0` for the A
//! partition, `1` for B); each resolution step combines the two parents'
//! partial interpolants by OR when the pivot is A-local, by AND when it is
//! B-local, and by a MUX on the pivot when it is shared. Combinators go
//! through the structurally hashed [`Aig::and`], so the interpolant comes
//! back as a literal in the caller's manager and shares structure with
//! everything built there before.
//!
//! The model checker unrolls the transition relation with a shared
//! register boundary between the A and B clause partitions, interpolates
//! each UNSAT answer into an over-approximate image, and stops when a new
//! image is contained in the frontier (proved), when the first unrolling
//! of a depth is satisfiable (counterexample), or when budget, deadline or
//! the frame limit runs out.

use crate::aig::{Aig, Lit, Node, NodeData};
use crate::error::{Error, Result};
use crate::fx::FxHashMap;
use crate::sat::{self, Budget, Solver, Status, Var, VarMap};
use cranelift_entity::SecondaryMap;
use std::time::Instant;

/// Model-checker parameters.
#[derive(Clone, Copy, Debug)]
pub struct ProveParams {
    /// Maximum unrolling depth before giving up.
    pub frame_limit: usize,
    /// Conflict budget per SAT query.
    pub conflict_limit: Option<u64>,
    /// Overall deadline.
    pub deadline: Option<Instant>,
}

impl Default for ProveParams {
    fn default() -> ProveParams {
        ProveParams {
            frame_limit: 40,
            conflict_limit: None,
            deadline: None,
        }
    }
}

/// Outcome of an unbounded model-checking run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProveOutcome {
    /// The property output can never assert.
    Proved,
    /// The property asserts after `frame` transitions; `inputs` holds one
    /// primary-input assignment per frame `0..=frame`.
    Cex {
        /// Depth of the counterexample in transitions.
        frame: usize,
        /// Witness inputs, one vector per time frame.
        inputs: Vec<Vec<bool>>,
    },
    /// Budget, deadline or the frame limit ran out first.
    Timeout,
}

/// Replays the refutation recorded in `solver` into `mgr` and returns the
/// interpolant literal between the first `n_a_clauses` root clauses and the
/// rest.
///
/// `shared` maps each boundary variable to its literal in `mgr`; a shared
/// pivot without a mapping is a caller error. A missing refutation (no
/// empty clause in the trace) is reported as a logic error as well.
pub fn interpolant_from_trace(
    solver: &Solver,
    n_a_clauses: usize,
    shared: &FxHashMap<Var, Lit>,
    mgr: &mut Aig,
) -> Result<Lit> {
    let empty = solver
        .empty_clause()
        .ok_or_else(|| Error::LogicError("no refutation recorded in the trace".into()))?;

    // Variable locality from the root clauses.
    let n_vars = solver.var_count();
    let mut in_a = vec![false; n_vars];
    let mut in_b = vec![false; n_vars];
    for id in 0..solver.clause_count() as sat::ClauseId {
        if solver.is_learned(id) {
            continue;
        }
        let marks = if (id as usize) < n_a_clauses {
            &mut in_a
        } else {
            &mut in_b
        };
        for &l in solver.clause_lits(id) {
            marks[l.var() as usize] = true;
        }
    }

    let mut interp: Vec<Option<Lit>> = vec![None; solver.clause_count()];
    for id in 0..solver.clause_count() as sat::ClauseId {
        if !solver.is_learned(id) {
            interp[id as usize] = Some(if (id as usize) < n_a_clauses {
                Lit::CONST0
            } else {
                Lit::CONST1
            });
            continue;
        }
        let ants = solver.antecedents(id);
        if ants.is_empty() {
            return Err(Error::LogicError(format!(
                "learned clause {} has no antecedents",
                id
            )));
        }
        let mut cur = interp[ants[0] as usize]
            .ok_or_else(|| Error::LogicError("trace references a later clause".into()))?;
        for &r in &ants[1..] {
            let pivot = solver.clause_lits(r)[0];
            let pv = pivot.var() as usize;
            let ir = interp[r as usize]
                .ok_or_else(|| Error::LogicError("trace references a later clause".into()))?;
            cur = match (in_a[pv], in_b[pv]) {
                (true, false) => mgr.or(cur, ir),
                (false, true) => mgr.and(cur, ir),
                _ => {
                    let p = *shared.get(&(pv as Var)).ok_or_else(|| {
                        Error::LogicError(format!(
                            "shared pivot variable {} has no boundary mapping",
                            pv
                        ))
                    })?;
                    // The reason clause holds the pivot at position 0; its
                    // sign says which parent carries the positive pivot.
                    let (i_neg, i_pos) = if pivot.is_neg() { (ir, cur) } else { (cur, ir) };
                    mgr.mux(p, i_neg, i_pos)
                }
            };
        }
        interp[id as usize] = Some(cur);
    }
    interp[empty as usize]
        .ok_or_else(|| Error::LogicError("empty clause carries no interpolant".into()))
}

/// The root clauses reachable from the recorded empty clause: an
/// unsatisfiable core of the instance, in clause-id order.
pub fn unsat_core(solver: &Solver) -> Result<Vec<sat::ClauseId>> {
    let empty = solver
        .empty_clause()
        .ok_or_else(|| Error::LogicError("no refutation recorded in the trace".into()))?;
    let mut seen = vec![false; solver.clause_count()];
    let mut stack = vec![empty];
    let mut core = Vec::new();
    while let Some(id) = stack.pop() {
        if seen[id as usize] {
            continue;
        }
        seen[id as usize] = true;
        if solver.is_learned(id) {
            stack.extend_from_slice(solver.antecedents(id));
        } else {
            core.push(id);
        }
    }
    core.sort_unstable();
    Ok(core)
}

/// Copies the cone of `root` from `src` into `dst`, mapping CI `i` of
/// `src` to `ci_map[i]`.
fn copy_cone_lit(src: &Aig, root: Lit, dst: &mut Aig, ci_map: &[Lit]) -> Lit {
    let mut copy: SecondaryMap<Node, Lit> = SecondaryMap::with_capacity(src.node_count());
    copy[Node::CONST0] = Lit::CONST0;
    for (i, n) in src.cis().enumerate() {
        copy[n] = ci_map[i];
    }
    for n in src.nodes().collect::<Vec<_>>() {
        if let NodeData::And { f0, f1 } = src.node(n) {
            let g0 = copy[f0.node()].xor_complement(f0.is_complement());
            let g1 = copy[f1.node()].xor_complement(f1.is_complement());
            copy[n] = dst.and(g0, g1);
        }
    }
    copy[root.node()].xor_complement(root.is_complement())
}

/// Instantiates one time frame of the sequential `src` into `dst`:
/// primary inputs map to `pis`, register outputs to `regs`. Returns the
/// property literal and the next-state literals.
fn instantiate_frame(src: &Aig, dst: &mut Aig, pis: &[Lit], regs: &[Lit]) -> (Lit, Vec<Lit>) {
    let mut ci_map = Vec::with_capacity(src.ci_count());
    ci_map.extend_from_slice(pis);
    ci_map.extend_from_slice(regs);
    debug_assert_eq!(ci_map.len(), src.ci_count());
    let mut copy: SecondaryMap<Node, Lit> = SecondaryMap::with_capacity(src.node_count());
    copy[Node::CONST0] = Lit::CONST0;
    for (i, n) in src.cis().enumerate() {
        copy[n] = ci_map[i];
    }
    for n in src.nodes().collect::<Vec<_>>() {
        if let NodeData::And { f0, f1 } = src.node(n) {
            let g0 = copy[f0.node()].xor_complement(f0.is_complement());
            let g1 = copy[f1.node()].xor_complement(f1.is_complement());
            copy[n] = dst.and(g0, g1);
        }
    }
    let resolve = |copy: &SecondaryMap<Node, Lit>, l: Lit| {
        copy[l.node()].xor_complement(l.is_complement())
    };
    let prop = resolve(&copy, src.co_driver_at(0));
    let next = (0..src.register_count())
        .map(|j| resolve(&copy, src.co_driver_at(src.po_count() + j)))
        .collect();
    (prop, next)
}

enum StepResult {
    Sat(Vec<Vec<bool>>),
    Unsat(Lit),
    Timeout,
}

/// One interpolation step at depth `d`: solves
/// `inter(S0) ∧ T(S0→S1) ∧ T(S1→…→S(d-1)) ∧ prop(Sd)` with the clause
/// partition split at the S1 register boundary.
fn bmc_step(
    aig: &Aig,
    imgr: &mut Aig,
    inter: Lit,
    d: usize,
    budget: &Budget,
) -> Result<StepResult> {
    let r = aig.register_count();
    let pi = aig.pi_count();
    let mut solver = Solver::new();
    solver.set_trace(true);

    // A part: the current frontier applied to S0, plus one transition.
    let mut mgr_a = Aig::new();
    let s0: Vec<Lit> = (0..r).map(|_| mgr_a.add_ci()).collect();
    let pi0: Vec<Node> = (0..pi).map(|_| mgr_a.add_ci().node()).collect();
    let pi0_lits: Vec<Lit> = pi0.iter().map(|&n| Lit::new(n, false)).collect();
    let imgr_cis: Vec<Lit> = s0.clone();
    let inter_a = copy_cone_lit(imgr, inter, &mut mgr_a, &imgr_cis);
    let (_, next1) = instantiate_frame(aig, &mut mgr_a, &pi0_lits, &s0);

    let mut vmap_a = VarMap::new();
    let la = vmap_a.sat_lit(&mut solver, &mgr_a, inter_a);
    solver.add_clause(&[la]);
    let boundary: Vec<sat::Lit> = next1
        .iter()
        .map(|&l| vmap_a.sat_lit(&mut solver, &mgr_a, l))
        .collect();
    let n_a = solver.clause_count();

    // B part: the remaining d-1 transitions and the property frame, with
    // the S1 registers pinned onto the boundary variables.
    let mut mgr_b = Aig::new();
    let s1: Vec<Lit> = (0..r).map(|_| mgr_b.add_ci()).collect();
    let mut vmap_b = VarMap::new();
    for j in 0..r {
        vmap_b.pin(mgr_b.ci_node(j), boundary[j]);
    }
    let mut state = s1;
    let mut frame_pis: Vec<Vec<Node>> = Vec::new();
    for _ in 1..d {
        let pis: Vec<Node> = (0..pi).map(|_| mgr_b.add_ci().node()).collect();
        let pi_lits: Vec<Lit> = pis.iter().map(|&n| Lit::new(n, false)).collect();
        let (_, next) = instantiate_frame(aig, &mut mgr_b, &pi_lits, &state);
        frame_pis.push(pis);
        state = next;
    }
    let pis_last: Vec<Node> = (0..pi).map(|_| mgr_b.add_ci().node()).collect();
    let pi_last_lits: Vec<Lit> = pis_last.iter().map(|&n| Lit::new(n, false)).collect();
    let (prop, _) = instantiate_frame(aig, &mut mgr_b, &pi_last_lits, &state);
    frame_pis.push(pis_last);
    let lb = vmap_b.sat_lit(&mut solver, &mgr_b, prop);
    solver.add_clause(&[lb]);

    match solver.solve(budget) {
        Status::Sat => {
            let mut inputs = Vec::with_capacity(d + 1);
            inputs.push(read_inputs(&solver, &vmap_a, &pi0));
            for pis in &frame_pis {
                inputs.push(read_inputs(&solver, &vmap_b, pis));
            }
            Ok(StepResult::Sat(inputs))
        }
        Status::Timeout => Ok(StepResult::Timeout),
        Status::Unsat => {
            let mut shared: FxHashMap<Var, Lit> = FxHashMap::default();
            for (j, &bl) in boundary.iter().enumerate() {
                let ci = Lit::new(imgr.ci_node(j), false);
                shared.insert(bl.var(), ci.xor_complement(bl.is_neg()));
            }
            let new_inter = interpolant_from_trace(&solver, n_a, &shared, imgr)?;
            Ok(StepResult::Unsat(new_inter))
        }
    }
}

fn read_inputs(solver: &Solver, vmap: &VarMap, pis: &[Node]) -> Vec<bool> {
    pis.iter()
        .map(|&n| {
            vmap.lookup(n)
                .map(|l| solver.model_value(l.var()) ^ l.is_neg())
                .unwrap_or(false)
        })
        .collect()
}

/// Checks `a ⇒ b` over the shared manager by one fresh SAT call on
/// `a ∧ !b`. `Unsat` means the implication holds.
fn implies(mgr: &mut Aig, a: Lit, b: Lit, budget: &Budget) -> Status {
    let miter = mgr.and(a, !b);
    let mut solver = Solver::new();
    let mut vmap = VarMap::new();
    let l = vmap.sat_lit(&mut solver, mgr, miter);
    if !solver.add_clause(&[l]) {
        return Status::Unsat;
    }
    solver.solve(budget)
}

/// Proves or refutes the single property output of a sequential manager by
/// interpolation-based unbounded model checking.
///
/// The manager must have at least one register and exactly one primary
/// output, the *bad* signal: a counterexample is an input sequence driving
/// it to 1. All registers initialize to 0.
pub fn prove(aig: &Aig, params: &ProveParams) -> Result<ProveOutcome> {
    if aig.register_count() == 0 {
        return Err(Error::Unsupported(
            "interpolation needs a sequential manager".into(),
        ));
    }
    if aig.po_count() != 1 {
        return Err(Error::Unsupported(format!(
            "interpolation expects a single property output, found {}",
            aig.po_count()
        )));
    }
    if aig.n_constraints != 0 {
        return Err(Error::Unsupported(
            "constraint outputs are not supported here".into(),
        ));
    }
    let budget = Budget {
        conflicts: params.conflict_limit,
        deadline: params.deadline,
    };
    let r = aig.register_count();

    // Depth 0: the property in the initial state.
    {
        let mut mgr = Aig::new();
        let pis: Vec<Node> = (0..aig.pi_count()).map(|_| mgr.add_ci().node()).collect();
        let pi_lits: Vec<Lit> = pis.iter().map(|&n| Lit::new(n, false)).collect();
        let regs = vec![Lit::CONST0; r];
        let (prop, _) = instantiate_frame(aig, &mut mgr, &pi_lits, &regs);
        let mut solver = Solver::new();
        let mut vmap = VarMap::new();
        let l = vmap.sat_lit(&mut solver, &mgr, prop);
        solver.add_clause(&[l]);
        match solver.solve(&budget) {
            Status::Sat => {
                return Ok(ProveOutcome::Cex {
                    frame: 0,
                    inputs: vec![read_inputs(&solver, &vmap, &pis)],
                });
            }
            Status::Timeout => return Ok(ProveOutcome::Timeout),
            Status::Unsat => {}
        }
    }

    // The interpolant manager ranges over the registers; the initial-state
    // predicate is the conjunction of their negations.
    let mut imgr = Aig::new();
    let mut init = Lit::CONST1;
    for _ in 0..r {
        let s = imgr.add_ci();
        let acc = imgr.and(init, !s);
        init = acc;
    }

    let mut d = 1usize;
    loop {
        if d > params.frame_limit {
            log::debug!("frame limit {} reached", params.frame_limit);
            return Ok(ProveOutcome::Timeout);
        }
        if let Some(deadline) = params.deadline {
            if Instant::now() > deadline {
                return Ok(ProveOutcome::Timeout);
            }
        }
        let mut inter = init;
        let mut frontier = init;
        let mut steps = 0usize;
        loop {
            match bmc_step(aig, &mut imgr, inter, d, &budget)? {
                StepResult::Sat(inputs) => {
                    if steps == 0 {
                        log::debug!("counterexample at depth {}", d);
                        return Ok(ProveOutcome::Cex { frame: d, inputs });
                    }
                    // Spurious: the over-approximation reached a bad state.
                    // Deepen one frame and restart from the initial state,
                    // so that every depth gets its exact check.
                    d += 1;
                    break;
                }
                StepResult::Timeout => return Ok(ProveOutcome::Timeout),
                StepResult::Unsat(new_inter) => {
                    steps += 1;
                    if new_inter == Lit::CONST0 {
                        log::debug!("image is empty after {} steps", steps);
                        return Ok(ProveOutcome::Proved);
                    }
                    match implies(&mut imgr, new_inter, frontier, &budget) {
                        Status::Unsat => {
                            log::debug!("fixed point after {} images at depth {}", steps, d);
                            return Ok(ProveOutcome::Proved);
                        }
                        Status::Timeout => return Ok(ProveOutcome::Timeout),
                        Status::Sat => {
                            frontier = imgr.or(frontier, new_inter);
                            inter = new_inter;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sat::CdclEngine;

    #[test]
    fn textbook_interpolant() {
        // A = {a, !a | b}, B = {!b}. The interpolant is b.
        let mut solver = Solver::new();
        solver.set_trace(true);
        let a = solver.new_var();
        let b = solver.new_var();
        solver.add_clause(&[sat::Lit::pos(a)]);
        solver.add_clause(&[sat::Lit::neg(a), sat::Lit::pos(b)]);
        let n_a = solver.clause_count();
        solver.add_clause(&[sat::Lit::neg(b)]);
        assert_eq!(solver.solve(&Budget::unlimited()), Status::Unsat);

        let mut mgr = Aig::new();
        let cb = mgr.add_ci();
        let mut shared = FxHashMap::default();
        shared.insert(b, cb);
        let i = interpolant_from_trace(&solver, n_a, &shared, &mut mgr).unwrap();
        assert_eq!(i, cb);
    }

    #[test]
    fn interpolant_is_sound() {
        // A = (x | s) & (!x | s)  [forces s], B = (s -> t) & !t.
        // Shared variables: s (and t is B-local). I must satisfy A => I and
        // I & B unsat; any such I implies s.
        let mut solver = Solver::new();
        solver.set_trace(true);
        let x = solver.new_var();
        let s = solver.new_var();
        let t = solver.new_var();
        solver.add_clause(&[sat::Lit::pos(x), sat::Lit::pos(s)]);
        solver.add_clause(&[sat::Lit::neg(x), sat::Lit::pos(s)]);
        let n_a = solver.clause_count();
        solver.add_clause(&[sat::Lit::neg(s), sat::Lit::pos(t)]);
        solver.add_clause(&[sat::Lit::neg(t)]);
        assert_eq!(solver.solve(&Budget::unlimited()), Status::Unsat);

        let mut mgr = Aig::new();
        let cs = mgr.add_ci();
        let mut shared = FxHashMap::default();
        shared.insert(s, cs);
        let i = interpolant_from_trace(&solver, n_a, &shared, &mut mgr).unwrap();
        // I & !s must be unsatisfiable (I implies s).
        assert_eq!(
            implies(&mut mgr, i, cs, &Budget::unlimited()),
            Status::Unsat
        );
        // I itself must be satisfiable (A is satisfiable and A => I).
        let mut check = Solver::new();
        let mut vmap = VarMap::new();
        let l = vmap.sat_lit(&mut check, &mgr, i);
        check.add_clause(&[l]);
        assert_eq!(check.solve(&Budget::unlimited()), Status::Sat);
    }

    #[test]
    fn core_of_the_four_corners() {
        // Every one of the four binary clauses over two variables is needed
        // for unsatisfiability, so the core is the whole instance.
        let mut solver = Solver::new();
        solver.set_trace(true);
        let a = solver.new_var();
        let b = solver.new_var();
        for &(sa, sb) in &[(false, false), (false, true), (true, false), (true, true)] {
            solver.add_clause(&[sat::Lit::new(a, sa), sat::Lit::new(b, sb)]);
        }
        assert_eq!(solver.solve(&Budget::unlimited()), Status::Unsat);
        let core = unsat_core(&solver).unwrap();
        assert_eq!(core, vec![0, 1, 2, 3]);
    }

    /// One register `r0 = 0`, next state `r' = r | !input`, bad = `r`.
    fn eventually_one() -> Aig {
        let mut aig = Aig::new();
        let input = aig.add_ci();
        let r = aig.add_ci();
        let next = aig.or(r, !input);
        aig.add_co(r);
        aig.add_co(next);
        aig.set_register_count(1);
        aig
    }

    #[test]
    fn counterexample_at_depth_one() {
        let aig = eventually_one();
        let out = prove(&aig, &ProveParams::default()).unwrap();
        match out {
            ProveOutcome::Cex { frame, inputs } => {
                assert_eq!(frame, 1);
                assert_eq!(inputs.len(), 2);
                // The witness must keep the input low in frame 0.
                assert!(!inputs[0][0]);
            }
            other => panic!("expected a counterexample, got {:?}", other),
        }
    }

    #[test]
    fn dead_register_is_proved() {
        // r' = 0, bad = r: the bad state is unreachable.
        let mut aig = Aig::new();
        let _input = aig.add_ci();
        let r = aig.add_ci();
        aig.add_co(r);
        aig.add_co(Lit::CONST0);
        aig.set_register_count(1);
        let out = prove(&aig, &ProveParams::default()).unwrap();
        assert_eq!(out, ProveOutcome::Proved);
    }

    #[test]
    fn self_loop_is_proved() {
        // r' = r, bad = r: r stays 0 forever.
        let mut aig = Aig::new();
        let _input = aig.add_ci();
        let r = aig.add_ci();
        aig.add_co(r);
        aig.add_co(r);
        aig.set_register_count(1);
        let out = prove(&aig, &ProveParams::default()).unwrap();
        assert_eq!(out, ProveOutcome::Proved);
    }

    #[test]
    fn two_step_counter_is_refuted_at_depth_two() {
        // r2' = r1, r1' = 1, bad = r2: reachable after two steps.
        let mut aig = Aig::new();
        let _input = aig.add_ci();
        let r1 = aig.add_ci();
        let r2 = aig.add_ci();
        aig.add_co(r2); // bad
        aig.add_co(Lit::CONST1); // r1'
        aig.add_co(r1); // r2'
        aig.set_register_count(2);
        let out = prove(&aig, &ProveParams::default()).unwrap();
        match out {
            ProveOutcome::Cex { frame, .. } => assert_eq!(frame, 2),
            other => panic!("expected a depth-2 counterexample, got {:?}", other),
        }
    }

    #[test]
    fn combinational_managers_are_rejected() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        aig.add_co(a);
        assert!(matches!(
            prove(&aig, &ProveParams::default()),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn frame_limit_yields_timeout() {
        // A 3-step counter with a frame limit of 1 cannot conclude.
        let mut aig = Aig::new();
        let _input = aig.add_ci();
        let r1 = aig.add_ci();
        let r2 = aig.add_ci();
        let r3 = aig.add_ci();
        aig.add_co(r3);
        aig.add_co(Lit::CONST1);
        aig.add_co(r1);
        aig.add_co(r2);
        aig.set_register_count(3);
        let out = prove(
            &aig,
            &ProveParams {
                frame_limit: 1,
                ..ProveParams::default()
            },
        )
        .unwrap();
        assert_eq!(out, ProveOutcome::Timeout);
    }

    #[test]
    fn solver_trait_object_surface() {
        // The capability set is usable through the trait.
        fn exercise<S: CdclEngine>(s: &mut S) -> Status {
            let v = s.new_var();
            s.add_clause(&[sat::Lit::pos(v)]);
            s.solve_with(&[], &Budget::unlimited())
        }
        let mut s = Solver::new();
        assert_eq!(exercise(&mut s), Status::Sat);
    }
}
