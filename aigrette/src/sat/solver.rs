//! A conflict-driven clause-learning solver with a replayable resolution
//! trace.
//!
//! The solver is deliberately self-contained: the proof engine consumes the
//! antecedents of every learned clause, which bindings to external solvers
//! do not expose in a portable way. Learning is first-UIP; literals
//! falsified at the root level are *kept* in learned clauses, so that each
//! learned clause is exactly the resolvent of its recorded antecedent chain
//! and the trace replays without bookkeeping.
//!
//! Trace layout: one flat antecedent vector plus a per-clause range, the
//! learned clause first resolving the recorded conflict clause with each
//! reason in trail-walk order. The pivot of every step is the variable of
//! the reason clause's first literal; the watch discipline keeps the
//! implied literal at position 0, which is asserted throughout.

use std::time::Instant;

/// A CNF variable index.
pub type Var = u32;

/// Identifier of a stored clause, root or learned.
pub type ClauseId = u32;

const NO_REASON: u32 = u32::MAX;

/// A CNF literal: `(var << 1) | negated`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lit(u32);

impl Lit {
    /// The positive literal of `v`.
    #[inline]
    pub fn pos(v: Var) -> Lit {
        Lit(v << 1)
    }

    /// The negative literal of `v`.
    #[inline]
    pub fn neg(v: Var) -> Lit {
        Lit(v << 1 | 1)
    }

    /// A literal of `v` with an explicit sign.
    #[inline]
    pub fn new(v: Var, negated: bool) -> Lit {
        Lit(v << 1 | negated as u32)
    }

    /// The variable.
    #[inline]
    pub fn var(self) -> Var {
        self.0 >> 1
    }

    /// Whether the literal is negated.
    #[inline]
    pub fn is_neg(self) -> bool {
        self.0 & 1 != 0
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::ops::Not for Lit {
    type Output = Lit;
    #[inline]
    fn not(self) -> Lit {
        Lit(self.0 ^ 1)
    }
}

impl std::fmt::Debug for Lit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}{}", if self.is_neg() { "-" } else { "" }, self.var())
    }
}

/// Outcome of a solver query. Timeouts are outcomes, not errors.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Status {
    /// A satisfying assignment was found; read it with `model_value`.
    Sat,
    /// The instance (under the given assumptions) is unsatisfiable.
    Unsat,
    /// The conflict budget or the deadline was exhausted first.
    Timeout,
}

/// Cooperative cancellation: a conflict budget and/or a deadline, polled
/// between conflicts.
#[derive(Copy, Clone, Debug, Default)]
pub struct Budget {
    /// Maximum number of conflicts for one query.
    pub conflicts: Option<u64>,
    /// Wall-clock deadline for one query.
    pub deadline: Option<Instant>,
}

impl Budget {
    /// No limits.
    pub fn unlimited() -> Budget {
        Budget::default()
    }

    /// A conflict budget without a deadline.
    pub fn with_conflicts(n: u64) -> Budget {
        Budget {
            conflicts: Some(n),
            deadline: None,
        }
    }
}

#[derive(Clone, Copy)]
struct Clause {
    start: u32,
    len: u32,
    learned: bool,
}

/// The CDCL solver.
pub struct Solver {
    n_vars: u32,
    clauses: Vec<Clause>,
    pool: Vec<Lit>,
    watches: Vec<Vec<ClauseId>>,

    assign: Vec<i8>,
    level: Vec<u32>,
    reason: Vec<u32>,
    trail: Vec<Lit>,
    trail_lim: Vec<u32>,
    qhead: usize,

    activity: Vec<f64>,
    var_inc: f64,
    saved_phase: Vec<bool>,
    seen: Vec<bool>,
    model: Vec<bool>,

    trace_enabled: bool,
    ants: Vec<ClauseId>,
    ant_ranges: Vec<(u32, u32)>,
    empty_clause: Option<ClauseId>,

    ok: bool,
    n_conflicts: u64,
}

impl Default for Solver {
    fn default() -> Solver {
        Solver::new()
    }
}

impl Solver {
    /// Creates an empty solver.
    pub fn new() -> Solver {
        Solver {
            n_vars: 0,
            clauses: Vec::new(),
            pool: Vec::new(),
            watches: Vec::new(),
            assign: Vec::new(),
            level: Vec::new(),
            reason: Vec::new(),
            trail: Vec::new(),
            trail_lim: Vec::new(),
            qhead: 0,
            activity: Vec::new(),
            var_inc: 1.0,
            saved_phase: Vec::new(),
            seen: Vec::new(),
            model: Vec::new(),
            trace_enabled: false,
            ants: Vec::new(),
            ant_ranges: Vec::new(),
            empty_clause: None,
            ok: true,
        n_conflicts: 0,
        }
    }

    /// Enables antecedent recording. Must be set before clauses are added.
    pub fn set_trace(&mut self, on: bool) {
        debug_assert!(self.clauses.is_empty());
        self.trace_enabled = on;
    }

    /// Allocates a fresh variable.
    pub fn new_var(&mut self) -> Var {
        let v = self.n_vars;
        self.n_vars += 1;
        self.assign.push(0);
        self.level.push(0);
        self.reason.push(NO_REASON);
        self.activity.push(0.0);
        self.saved_phase.push(false);
        self.seen.push(false);
        self.model.push(false);
        self.watches.push(Vec::new());
        self.watches.push(Vec::new());
        v
    }

    /// Number of allocated variables.
    pub fn var_count(&self) -> usize {
        self.n_vars as usize
    }

    /// Number of stored clauses, root and learned.
    pub fn clause_count(&self) -> usize {
        self.clauses.len()
    }

    /// The literals of a stored clause.
    pub fn clause_lits(&self, id: ClauseId) -> &[Lit] {
        let c = self.clauses[id as usize];
        &self.pool[c.start as usize..(c.start + c.len) as usize]
    }

    /// Whether `id` is a learned clause.
    pub fn is_learned(&self, id: ClauseId) -> bool {
        self.clauses[id as usize].learned
    }

    /// The antecedent chain of a learned clause: the recorded conflict
    /// clause followed by the reasons, in resolution order.
    pub fn antecedents(&self, id: ClauseId) -> &[ClauseId] {
        let (a, b) = self.ant_ranges[id as usize];
        &self.ants[a as usize..b as usize]
    }

    /// The derived empty clause, once an assumption-free refutation exists.
    pub fn empty_clause(&self) -> Option<ClauseId> {
        self.empty_clause
    }

    /// The value of `v` in the last satisfying assignment.
    pub fn model_value(&self, v: Var) -> bool {
        self.model[v as usize]
    }

    #[inline]
    fn value(&self, l: Lit) -> i8 {
        let a = self.assign[l.var() as usize];
        if l.is_neg() {
            -a
        } else {
            a
        }
    }

    #[inline]
    fn decision_level(&self) -> u32 {
        self.trail_lim.len() as u32
    }

    /// Adds a root clause. Returns `false` if the clause set is already
    /// unsatisfiable at the root level.
    ///
    /// Duplicate literals are removed and tautologies are dropped, but
    /// literals falsified at the root are kept so the stored clause is the
    /// caller's clause; proof replay depends on that.
    pub fn add_clause(&mut self, lits: &[Lit]) -> bool {
        debug_assert_eq!(self.decision_level(), 0);
        if !self.ok {
            return false;
        }
        let mut ls: Vec<Lit> = lits.to_vec();
        ls.sort_unstable();
        ls.dedup();
        if ls.windows(2).any(|w| w[0] == !w[1]) {
            return true; // tautology, never useful as an antecedent
        }
        for &l in &ls {
            debug_assert!(l.var() < self.n_vars, "literal over unallocated var");
        }
        // Move two non-false literals to the watch positions.
        let mut n_free = 0;
        for i in 0..ls.len() {
            if self.value(ls[i]) >= 0 && n_free < 2 {
                ls.swap(n_free, i);
                n_free += 1;
            }
        }
        let id = self.store(&ls, false);
        match n_free {
            0 => {
                // Conflicting at root: the refutation is this clause
                // resolved against the reasons of its literals.
                if self.trace_enabled {
                    self.record_final(id);
                }
                self.ok = false;
                false
            }
            1 => {
                if self.value(ls[0]) == 0 {
                    self.enqueue(ls[0], id);
                    if let Some(confl) = self.propagate() {
                        if self.trace_enabled {
                            self.record_final(confl);
                        }
                        self.ok = false;
                        return false;
                    }
                }
                true
            }
            _ => {
                self.watch(id);
                true
            }
        }
    }

    fn store(&mut self, lits: &[Lit], learned: bool) -> ClauseId {
        let id = self.clauses.len() as ClauseId;
        self.clauses.push(Clause {
            start: self.pool.len() as u32,
            len: lits.len() as u32,
            learned,
        });
        self.pool.extend_from_slice(lits);
        self.ant_ranges.push((0, 0));
        id
    }

    fn watch(&mut self, id: ClauseId) {
        let c = self.clauses[id as usize];
        debug_assert!(c.len >= 2);
        let l0 = self.pool[c.start as usize];
        let l1 = self.pool[c.start as usize + 1];
        self.watches[l0.index()].push(id);
        self.watches[l1.index()].push(id);
    }

    fn enqueue(&mut self, l: Lit, reason: u32) {
        debug_assert_eq!(self.value(l), 0);
        let v = l.var() as usize;
        self.assign[v] = if l.is_neg() { -1 } else { 1 };
        self.level[v] = self.decision_level();
        self.reason[v] = reason;
        self.trail.push(l);
    }

    fn cancel_until(&mut self, target: u32) {
        while self.decision_level() > target {
            let lim = *self.trail_lim.last().unwrap() as usize;
            for &l in &self.trail[lim..] {
                let v = l.var() as usize;
                self.saved_phase[v] = !l.is_neg();
                self.assign[v] = 0;
                self.reason[v] = NO_REASON;
            }
            self.trail.truncate(lim);
            self.trail_lim.pop();
        }
        self.qhead = self.qhead.min(self.trail.len());
    }

    fn propagate(&mut self) -> Option<ClauseId> {
        while self.qhead < self.trail.len() {
            let p = self.trail[self.qhead];
            self.qhead += 1;
            let false_lit = !p;
            let mut ws = std::mem::take(&mut self.watches[false_lit.index()]);
            let mut i = 0;
            while i < ws.len() {
                let cid = ws[i];
                let c = self.clauses[cid as usize];
                let s = c.start as usize;
                // Keep the false literal at position 1.
                if self.pool[s] == false_lit {
                    self.pool.swap(s, s + 1);
                }
                debug_assert_eq!(self.pool[s + 1], false_lit);
                let first = self.pool[s];
                if self.value(first) > 0 {
                    i += 1;
                    continue;
                }
                // Look for a replacement watch.
                let mut found = false;
                for k in 2..c.len as usize {
                    if self.value(self.pool[s + k]) >= 0 {
                        self.pool.swap(s + 1, s + k);
                        let w = self.pool[s + 1];
                        self.watches[w.index()].push(cid);
                        ws.swap_remove(i);
                        found = true;
                        break;
                    }
                }
                if found {
                    continue;
                }
                if self.value(first) < 0 {
                    // Conflict: restore the remaining watches first.
                    self.watches[false_lit.index()] = ws;
                    self.qhead = self.trail.len();
                    return Some(cid);
                }
                self.enqueue(first, cid);
                i += 1;
            }
            self.watches[false_lit.index()] = ws;
        }
        None
    }

    fn bump(&mut self, v: Var) {
        self.activity[v as usize] += self.var_inc;
        if self.activity[v as usize] > 1e100 {
            for a in &mut self.activity {
                *a *= 1e-100;
            }
            self.var_inc *= 1e-100;
        }
    }

    /// First-UIP conflict analysis. Returns the learned clause (asserting
    /// literal first), the backjump level, and the antecedent chain.
    fn analyze(&mut self, confl: ClauseId) -> (Vec<Lit>, u32, Vec<ClauseId>) {
        let current = self.decision_level();
        let mut learnt: Vec<Lit> = vec![Lit::pos(0)]; // placeholder for the UIP
        let mut ants: Vec<ClauseId> = vec![confl];
        let mut pathc = 0u32;
        let mut idx = self.trail.len();
        let mut cid = confl;
        let mut skip_first = false;
        loop {
            let c = self.clauses[cid as usize];
            let s = c.start as usize;
            for k in (if skip_first { 1 } else { 0 })..c.len as usize {
                let l = self.pool[s + k];
                let v = l.var();
                if !self.seen[v as usize] {
                    self.seen[v as usize] = true;
                    self.bump(v);
                    if self.level[v as usize] == current {
                        pathc += 1;
                    } else {
                        learnt.push(l);
                    }
                }
            }
            // Next marked literal on the trail.
            loop {
                idx -= 1;
                if self.seen[self.trail[idx].var() as usize] {
                    break;
                }
            }
            let p = self.trail[idx];
            self.seen[p.var() as usize] = false;
            pathc -= 1;
            if pathc == 0 {
                learnt[0] = !p;
                break;
            }
            cid = self.reason[p.var() as usize];
            debug_assert_ne!(cid, NO_REASON, "UIP walk crossed a decision");
            debug_assert_eq!(self.clause_lits(cid)[0], p);
            ants.push(cid);
            skip_first = true;
        }
        for &l in &learnt[1..] {
            self.seen[l.var() as usize] = false;
        }
        // Backjump to the second-highest level in the clause and put a
        // literal of that level at the second watch position.
        let mut bt = 0;
        let mut at = 1;
        for (i, &l) in learnt.iter().enumerate().skip(1) {
            if self.level[l.var() as usize] > bt {
                bt = self.level[l.var() as usize];
                at = i;
            }
        }
        if learnt.len() > 1 {
            learnt.swap(1, at);
        }
        self.var_inc /= 0.95;
        (learnt, bt, ants)
    }

    /// Records the refutation chain that reduces `confl` to the empty
    /// clause at level 0, and stores the empty clause.
    fn record_final(&mut self, confl: ClauseId) {
        debug_assert!(self.trace_enabled);
        debug_assert_eq!(self.decision_level(), 0);
        let mut ants: Vec<ClauseId> = vec![confl];
        for l in self.clause_lits(confl).to_vec() {
            self.seen[l.var() as usize] = true;
        }
        for i in (0..self.trail.len()).rev() {
            let v = self.trail[i].var();
            if !self.seen[v as usize] {
                continue;
            }
            self.seen[v as usize] = false;
            let r = self.reason[v as usize];
            if r == NO_REASON {
                continue;
            }
            debug_assert_eq!(self.clause_lits(r)[0], self.trail[i]);
            let c = self.clauses[r as usize];
            for k in 1..c.len as usize {
                let l = self.pool[c.start as usize + k];
                self.seen[l.var() as usize] = true;
            }
            ants.push(r);
        }
        // Clear any marks left by literals without reasons.
        for i in 0..self.trail.len() {
            self.seen[self.trail[i].var() as usize] = false;
        }
        let id = self.store(&[], true);
        let a = self.ants.len() as u32;
        self.ants.extend_from_slice(&ants);
        self.ant_ranges[id as usize] = (a, self.ants.len() as u32);
        self.empty_clause = Some(id);
    }

    /// Solves under the given assumptions and budget.
    ///
    /// With an empty assumption set and tracing enabled, an `Unsat` answer
    /// leaves a complete refutation in the trace, ending with the empty
    /// clause. Under assumptions no refutation is recorded.
    pub fn solve_with(&mut self, assumps: &[Lit], budget: &Budget) -> Status {
        if !self.ok {
            return Status::Unsat;
        }
        let mut conflicts_here = 0u64;
        let mut restart_limit = 100u64;
        let mut restart_count = 0u64;
        if let Some(confl) = self.propagate() {
            if self.trace_enabled && self.decision_level() == 0 {
                self.record_final(confl);
            }
            self.ok = false;
            return Status::Unsat;
        }
        loop {
            if let Some(confl) = self.propagate() {
                self.n_conflicts += 1;
                conflicts_here += 1;
                restart_count += 1;
                if self.decision_level() == 0 {
                    if self.trace_enabled {
                        self.record_final(confl);
                    }
                    self.ok = false;
                    return Status::Unsat;
                }
                if self.decision_level() <= assumps.len() as u32 {
                    // Conflict among the assumptions themselves.
                    self.cancel_until(0);
                    return Status::Unsat;
                }
                if let Some(limit) = budget.conflicts {
                    if conflicts_here > limit {
                        self.cancel_until(0);
                        return Status::Timeout;
                    }
                }
                if let Some(deadline) = budget.deadline {
                    if Instant::now() > deadline {
                        self.cancel_until(0);
                        return Status::Timeout;
                    }
                }
                let (learnt, bt, ants) = self.analyze(confl);
                self.cancel_until(bt.max(0));
                let id = self.store(&learnt, true);
                if self.trace_enabled {
                    let a = self.ants.len() as u32;
                    self.ants.extend_from_slice(&ants);
                    self.ant_ranges[id as usize] = (a, self.ants.len() as u32);
                }
                if learnt.len() >= 2 {
                    self.watch(id);
                }
                // The learned clause asserts its first literal at the
                // backjump level.
                debug_assert_eq!(self.value(learnt[0]), 0);
                self.enqueue(learnt[0], id);
                if restart_count >= restart_limit {
                    restart_count = 0;
                    restart_limit = restart_limit.saturating_mul(2);
                    self.cancel_until(0);
                }
            } else if (self.decision_level() as usize) < assumps.len() {
                let a = assumps[self.decision_level() as usize];
                match self.value(a) {
                    1 => self.trail_lim.push(self.trail.len() as u32),
                    -1 => {
                        self.cancel_until(0);
                        return Status::Unsat;
                    }
                    _ => {
                        self.trail_lim.push(self.trail.len() as u32);
                        self.enqueue(a, NO_REASON);
                    }
                }
            } else if let Some(v) = self.pick_branch() {
                self.trail_lim.push(self.trail.len() as u32);
                let l = Lit::new(v, !self.saved_phase[v as usize]);
                self.enqueue(l, NO_REASON);
            } else {
                for v in 0..self.n_vars as usize {
                    self.model[v] = self.assign[v] > 0;
                }
                self.cancel_until(0);
                return Status::Sat;
            }
        }
    }

    /// Convenience entry point without assumptions.
    pub fn solve(&mut self, budget: &Budget) -> Status {
        self.solve_with(&[], budget)
    }

    fn pick_branch(&self) -> Option<Var> {
        let mut best: Option<Var> = None;
        let mut best_act = -1.0f64;
        for v in 0..self.n_vars as usize {
            if self.assign[v] == 0 && self.activity[v] > best_act {
                best_act = self.activity[v];
                best = Some(v as Var);
            }
        }
        best
    }

    /// Total conflicts over the lifetime of the solver.
    pub fn conflict_count(&self) -> u64 {
        self.n_conflicts
    }
}
