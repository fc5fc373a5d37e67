//! The solver abstraction and the AIG-to-CNF adapter.
//!
//! The rest of the crate programs against the small [`CdclEngine`]
//! capability set plus, where a resolution trace is required, the concrete
//! [`Solver`]. The adapter owns a monotonic, lazy mapping from AIG nodes to
//! CNF variables: a variable is allocated the first time a node's cone is
//! loaded, is never renamed, and the mapping dies only with the adapter
//! (the sweeper recycles adapter and solver together).

mod solver;

pub use solver::{Budget, ClauseId, Lit, Solver, Status, Var};

use crate::aig::{Aig, NodeData, Node};
use cranelift_entity::SecondaryMap;

/// The capability set an engine needs from a SAT solver.
pub trait CdclEngine {
    /// Allocates a fresh variable.
    fn new_var(&mut self) -> Var;
    /// Adds a root clause; `false` means the clause set became trivially
    /// unsatisfiable.
    fn add_clause(&mut self, lits: &[Lit]) -> bool;
    /// Solves under assumptions with a budget.
    fn solve_with(&mut self, assumps: &[Lit], budget: &Budget) -> Status;
    /// Reads a variable of the last satisfying assignment.
    fn model_value(&self, v: Var) -> bool;
}

impl CdclEngine for Solver {
    fn new_var(&mut self) -> Var {
        Solver::new_var(self)
    }
    fn add_clause(&mut self, lits: &[Lit]) -> bool {
        Solver::add_clause(self, lits)
    }
    fn solve_with(&mut self, assumps: &[Lit], budget: &Budget) -> Status {
        Solver::solve_with(self, assumps, budget)
    }
    fn model_value(&self, v: Var) -> bool {
        Solver::model_value(self, v)
    }
}

/// Lazy node-to-variable mapping plus Tseitin cone loading.
#[derive(Default)]
pub struct VarMap {
    // Encoded solver literal + 1 per node; 0 means not yet loaded.
    lits: SecondaryMap<Node, u32>,
}

impl VarMap {
    /// Creates an empty mapping.
    pub fn new() -> VarMap {
        VarMap::default()
    }

    /// The solver literal of `n`, if its cone was loaded.
    pub fn lookup(&self, n: Node) -> Option<Lit> {
        match self.lits[n] {
            0 => None,
            enc => Some(Lit::new((enc - 1) >> 1, (enc - 1) & 1 != 0)),
        }
    }

    fn bind(&mut self, n: Node, l: Lit) {
        self.lits[n] = (l.var() << 1 | l.is_neg() as u32) + 1;
    }

    /// Pins a combinational input to an existing solver literal. Used to
    /// share frame-boundary variables between clause partitions; must
    /// happen before the node is loaded.
    pub fn pin(&mut self, n: Node, l: Lit) {
        debug_assert!(self.lits[n] == 0, "node already loaded");
        self.bind(n, l);
    }

    /// Forgets the whole mapping. Variables are never renamed otherwise;
    /// this is the only invalidation point, used together with a fresh
    /// solver when recycling.
    pub fn reset(&mut self) {
        self.lits = SecondaryMap::new();
    }

    /// Returns the solver literal of `lit`, loading the Tseitin clauses of
    /// its cone on demand.
    pub fn sat_lit<S: CdclEngine>(&mut self, solver: &mut S, aig: &Aig, lit: crate::aig::Lit) -> Lit {
        self.load(solver, aig, lit.node());
        let base = self.lookup(lit.node()).expect("cone just loaded");
        if lit.is_complement() {
            !base
        } else {
            base
        }
    }

    fn load<S: CdclEngine>(&mut self, solver: &mut S, aig: &Aig, root: Node) {
        if self.lits[root] != 0 {
            return;
        }
        // Post-order over the unloaded cone, iterative to keep deep graphs
        // off the call stack.
        let mut stack: Vec<(Node, bool)> = vec![(root, false)];
        while let Some((n, expanded)) = stack.pop() {
            if self.lits[n] != 0 {
                continue;
            }
            match aig.node(n) {
                NodeData::Const0 => {
                    let v = solver.new_var();
                    solver.add_clause(&[Lit::neg(v)]);
                    self.bind(n, Lit::pos(v));
                }
                NodeData::Ci { .. } => {
                    let v = solver.new_var();
                    self.bind(n, Lit::pos(v));
                }
                NodeData::Co { driver, .. } => {
                    if !expanded {
                        stack.push((n, true));
                        stack.push((driver.node(), false));
                    } else {
                        let d = self.lookup(driver.node()).expect("fanin loaded");
                        self.bind(n, if driver.is_complement() { !d } else { d });
                    }
                }
                NodeData::And { f0, f1 } => {
                    if !expanded {
                        stack.push((n, true));
                        stack.push((f0.node(), false));
                        stack.push((f1.node(), false));
                    } else {
                        let a = self.fanin_lit(f0);
                        let b = self.fanin_lit(f1);
                        let v = solver.new_var();
                        let nl = Lit::pos(v);
                        solver.add_clause(&[!nl, a]);
                        solver.add_clause(&[!nl, b]);
                        solver.add_clause(&[nl, !a, !b]);
                        self.bind(n, nl);
                    }
                }
            }
        }
    }

    fn fanin_lit(&self, f: crate::aig::Lit) -> Lit {
        let base = self.lookup(f.node()).expect("fanin loaded");
        if f.is_complement() {
            !base
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cone_loading_is_lazy_and_monotonic() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let c = aig.add_ci();
        let ab = aig.and(a, b);
        let abc = aig.and(ab, c);
        aig.add_co(abc);

        let mut solver = Solver::new();
        let mut map = VarMap::new();
        let l_ab = map.sat_lit(&mut solver, &aig, ab);
        let vars_after_ab = solver.var_count();
        assert!(map.lookup(c.node()).is_none());
        let _ = map.sat_lit(&mut solver, &aig, abc);
        assert!(solver.var_count() > vars_after_ab);
        // Re-requesting a loaded literal allocates nothing.
        let l_ab2 = map.sat_lit(&mut solver, &aig, ab);
        assert_eq!(l_ab, l_ab2);
    }

    #[test]
    fn tseitin_matches_the_and_function() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        let b = aig.add_ci();
        let ab = aig.and(a, !b);
        aig.add_co(ab);

        let mut solver = Solver::new();
        let mut map = VarMap::new();
        let l = map.sat_lit(&mut solver, &aig, ab);
        let la = map.sat_lit(&mut solver, &aig, a);
        let lb = map.sat_lit(&mut solver, &aig, b);

        // ab & b is unsatisfiable, ab & !b is satisfiable with a = 1.
        assert_eq!(
            solver.solve_with(&[l, lb], &Budget::unlimited()),
            Status::Unsat
        );
        assert_eq!(
            solver.solve_with(&[l, !lb], &Budget::unlimited()),
            Status::Sat
        );
        assert!(solver.model_value(la.var()));
    }

    #[test]
    fn constants_load_as_fixed_variables() {
        let mut aig = Aig::new();
        let a = aig.add_ci();
        aig.add_co(a);
        let mut solver = Solver::new();
        let mut map = VarMap::new();
        let zero = map.sat_lit(&mut solver, &aig, crate::aig::Lit::CONST0);
        let one = map.sat_lit(&mut solver, &aig, crate::aig::Lit::CONST1);
        assert_eq!(
            solver.solve_with(&[one], &Budget::unlimited()),
            Status::Sat
        );
        assert_eq!(
            solver.solve_with(&[zero], &Budget::unlimited()),
            Status::Unsat
        );
    }
}
