//! Graph colouring by iterated register coalescing.
//!
//! The classic worklist algorithm: *simplify* nodes of insignificant
//! degree, *coalesce* move-related pairs under the Briggs conservative
//! test, *freeze* a move-related node when both stall, mark *potential
//! spills* when everything stalls, then *select* colours while unwinding
//! the stack. A potential spill that finds no free colour becomes an
//! actual spill, which the caller rewrites before re-running the whole
//! allocation.
//!
//! The integer and float classes are coloured independently. There are no
//! precoloured nodes; instead, a register live across a call draws from
//! the callee-saved palette only, which is also why coalescing must merge
//! the call-crossing flag of the pair.

use crate::ir::rtl::{Function, Reg};
use crate::isa::arm64::{self, Mreg};
use crate::isa::RegClass;
use crate::regalloc::graph::Graph;
use std::collections::HashSet;

/// The result of one colouring attempt over both classes.
pub struct Coloring {
    assignment: Vec<Option<Mreg>>,
    /// Registers that could not be coloured and must be spilled.
    pub spills: Vec<Reg>,
}

impl Coloring {
    /// The machine register assigned to `r`.
    ///
    /// Only meaningful when [`spills`](Self::spills) is empty.
    pub fn mreg(&self, r: Reg) -> Mreg {
        self.assignment[r.as_u32() as usize]
            .unwrap_or_else(|| panic!("coloring: {} has no register", r))
    }

    /// All machine registers used by the assignment.
    pub fn used_mregs(&self) -> Vec<Mreg> {
        self.assignment.iter().filter_map(|&m| m).collect()
    }
}

/// Colour every pseudo-register of `func`.
pub fn color(func: &Function, graph: &Graph, unspillable: &HashSet<Reg>) -> Coloring {
    let nregs = func.reg_types.len();
    let mut result = Coloring {
        assignment: vec![None; nregs],
        spills: Vec::new(),
    };
    for &class in &RegClass::ALL {
        let mut irc = Irc::new(func, graph, class, unspillable);
        irc.run();
        irc.commit(&mut result);
    }
    result
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum NodeState {
    /// Not a node of this class.
    Other,
    SimplifyWl,
    FreezeWl,
    SpillWl,
    OnStack,
    Coalesced,
    Colored,
    Spilled,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum MoveState {
    /// Not a move of this class.
    Other,
    Worklist,
    Active,
    Coalesced,
    Constrained,
    Frozen,
}

struct Irc<'a> {
    func: &'a Function,
    graph: &'a Graph,
    class: RegClass,
    k: usize,
    unspillable: &'a HashSet<Reg>,

    // Mutable copies: coalescing edits the graph and merges move lists.
    adj: Vec<Vec<Reg>>,
    edges: HashSet<(u32, u32)>,
    degree: Vec<usize>,
    live_across_call: Vec<bool>,
    move_list: Vec<Vec<usize>>,

    state: Vec<NodeState>,
    move_state: Vec<MoveState>,
    alias: Vec<u32>,

    simplify_wl: Vec<Reg>,
    freeze_wl: Vec<Reg>,
    spill_wl: Vec<Reg>,
    moves_wl: Vec<usize>,
    select_stack: Vec<Reg>,
    coalesced_nodes: Vec<Reg>,

    colors: Vec<Option<Mreg>>,
    spilled: Vec<Reg>,
}

impl<'a> Irc<'a> {
    fn new(
        func: &'a Function,
        graph: &'a Graph,
        class: RegClass,
        unspillable: &'a HashSet<Reg>,
    ) -> Self {
        let nregs = func.reg_types.len();
        let k = arm64::allocatable(class).len();

        let in_class = |r: Reg| Mreg::class_for(func.reg_type(r)) == class;

        let mut irc = Irc {
            func,
            graph,
            class,
            k,
            unspillable,
            adj: graph.adj.clone(),
            edges: HashSet::new(),
            degree: graph.adj.iter().map(|l| l.len()).collect(),
            live_across_call: graph.live_across_call.clone(),
            move_list: graph.move_list.clone(),
            state: vec![NodeState::Other; nregs],
            move_state: vec![MoveState::Other; graph.moves.len()],
            alias: (0..nregs as u32).collect(),
            simplify_wl: Vec::new(),
            freeze_wl: Vec::new(),
            spill_wl: Vec::new(),
            moves_wl: Vec::new(),
            select_stack: Vec::new(),
            coalesced_nodes: Vec::new(),
            colors: vec![None; nregs],
            spilled: Vec::new(),
        };

        for (a, list) in graph.adj.iter().enumerate() {
            for b in list {
                let key = edge_key(Reg::from_u32(a as u32), *b);
                irc.edges.insert(key);
            }
        }

        for (i, m) in graph.moves.iter().enumerate() {
            if in_class(m.dst) {
                irc.move_state[i] = MoveState::Worklist;
                irc.moves_wl.push(i);
            }
        }

        for r in func.reg_types.keys() {
            if !in_class(r) {
                continue;
            }
            let i = r.as_u32() as usize;
            if irc.degree[i] >= k {
                irc.state[i] = NodeState::SpillWl;
                irc.spill_wl.push(r);
            } else if irc.is_move_related(r) {
                irc.state[i] = NodeState::FreezeWl;
                irc.freeze_wl.push(r);
            } else {
                irc.state[i] = NodeState::SimplifyWl;
                irc.simplify_wl.push(r);
            }
        }
        irc
    }

    fn idx(r: Reg) -> usize {
        r.as_u32() as usize
    }

    fn get_alias(&self, mut r: Reg) -> Reg {
        while self.state[Self::idx(r)] == NodeState::Coalesced {
            r = Reg::from_u32(self.alias[Self::idx(r)]);
        }
        r
    }

    /// Moves still relevant to `r`.
    fn node_moves(&self, r: Reg) -> Vec<usize> {
        self.move_list[Self::idx(r)]
            .iter()
            .copied()
            .filter(|&m| {
                matches!(
                    self.move_state[m],
                    MoveState::Worklist | MoveState::Active
                )
            })
            .collect()
    }

    fn is_move_related(&self, r: Reg) -> bool {
        !self.node_moves(r).is_empty()
    }

    /// Neighbours still in the graph.
    fn adjacent(&self, r: Reg) -> Vec<Reg> {
        self.adj[Self::idx(r)]
            .iter()
            .copied()
            .filter(|&n| {
                !matches!(
                    self.state[Self::idx(n)],
                    NodeState::OnStack | NodeState::Coalesced
                )
            })
            .collect()
    }

    fn run(&mut self) {
        loop {
            if let Some(r) = self.pop_wl(WlKind::Simplify) {
                self.simplify(r);
            } else if let Some(m) = self.pop_move() {
                self.coalesce(m);
            } else if let Some(r) = self.pop_wl(WlKind::Freeze) {
                self.freeze(r);
            } else if !self.spill_wl.is_empty() {
                self.select_spill();
            } else {
                break;
            }
        }
        self.assign_colors();
    }

    fn pop_wl(&mut self, kind: WlKind) -> Option<Reg> {
        let (list, expect) = match kind {
            WlKind::Simplify => (&mut self.simplify_wl, NodeState::SimplifyWl),
            WlKind::Freeze => (&mut self.freeze_wl, NodeState::FreezeWl),
        };
        while let Some(r) = list.pop() {
            if self.state[Self::idx(r)] == expect {
                return Some(r);
            }
        }
        None
    }

    fn pop_move(&mut self) -> Option<usize> {
        while let Some(m) = self.moves_wl.pop() {
            if self.move_state[m] == MoveState::Worklist {
                return Some(m);
            }
        }
        None
    }

    fn simplify(&mut self, r: Reg) {
        self.state[Self::idx(r)] = NodeState::OnStack;
        self.select_stack.push(r);
        for n in self.adjacent(r) {
            self.decrement_degree(n);
        }
    }

    fn decrement_degree(&mut self, r: Reg) {
        let i = Self::idx(r);
        let d = self.degree[i];
        self.degree[i] = d.saturating_sub(1);
        if d == self.k {
            let mut enable = self.adjacent(r);
            enable.push(r);
            self.enable_moves(&enable);
            if self.state[i] == NodeState::SpillWl {
                if self.is_move_related(r) {
                    self.state[i] = NodeState::FreezeWl;
                    self.freeze_wl.push(r);
                } else {
                    self.state[i] = NodeState::SimplifyWl;
                    self.simplify_wl.push(r);
                }
            }
        }
    }

    fn enable_moves(&mut self, nodes: &[Reg]) {
        for &n in nodes {
            for m in self.node_moves(n) {
                if self.move_state[m] == MoveState::Active {
                    self.move_state[m] = MoveState::Worklist;
                    self.moves_wl.push(m);
                }
            }
        }
    }

    fn coalesce(&mut self, m: usize) {
        let mv = self.graph.moves[m];
        let x = self.get_alias(mv.dst);
        let y = self.get_alias(mv.src);
        let (u, v) = (x, y);

        if u == v {
            self.move_state[m] = MoveState::Coalesced;
            self.add_work_list(u);
        } else if self.edges.contains(&edge_key(u, v)) {
            self.move_state[m] = MoveState::Constrained;
            self.add_work_list(u);
            self.add_work_list(v);
        } else if self.briggs_ok(u, v) {
            self.move_state[m] = MoveState::Coalesced;
            self.combine(u, v);
            self.add_work_list(u);
        } else {
            self.move_state[m] = MoveState::Active;
        }
    }

    /// Briggs: the combined node is safe when its neighbours of
    /// significant degree are fewer than K.
    fn briggs_ok(&self, u: Reg, v: Reg) -> bool {
        let mut nodes = self.adjacent(u);
        for n in self.adjacent(v) {
            if !nodes.contains(&n) {
                nodes.push(n);
            }
        }
        let significant = nodes
            .iter()
            .filter(|&&n| self.degree[Self::idx(n)] >= self.k)
            .count();
        significant < self.k
    }

    fn add_work_list(&mut self, u: Reg) {
        let i = Self::idx(u);
        if self.state[i] == NodeState::FreezeWl
            && !self.is_move_related(u)
            && self.degree[i] < self.k
        {
            self.state[i] = NodeState::SimplifyWl;
            self.simplify_wl.push(u);
        }
    }

    fn combine(&mut self, u: Reg, v: Reg) {
        let vi = Self::idx(v);
        self.state[vi] = NodeState::Coalesced;
        self.alias[vi] = u.as_u32();
        self.coalesced_nodes.push(v);
        // The merged range crosses a call if either part did.
        if self.live_across_call[vi] {
            self.live_across_call[Self::idx(u)] = true;
        }
        // The merged node inherits v's remaining moves.
        let vmoves = self.move_list[vi].clone();
        self.move_list[Self::idx(u)].extend(vmoves);
        self.enable_moves(&[v]);

        for t in self.adjacent(v) {
            self.add_edge(t, u);
            self.decrement_degree(t);
        }
        let ui = Self::idx(u);
        if self.degree[ui] >= self.k && self.state[ui] == NodeState::FreezeWl {
            self.state[ui] = NodeState::SpillWl;
            self.spill_wl.push(u);
        }
    }

    fn add_edge(&mut self, a: Reg, b: Reg) {
        if a == b {
            return;
        }
        if self.edges.insert(edge_key(a, b)) {
            self.adj[Self::idx(a)].push(b);
            self.adj[Self::idx(b)].push(a);
            self.degree[Self::idx(a)] += 1;
            self.degree[Self::idx(b)] += 1;
        }
    }

    fn freeze(&mut self, u: Reg) {
        self.state[Self::idx(u)] = NodeState::SimplifyWl;
        self.simplify_wl.push(u);
        self.freeze_moves(u);
    }

    fn freeze_moves(&mut self, u: Reg) {
        let ua = self.get_alias(u);
        for m in self.node_moves(u) {
            let mv = self.graph.moves[m];
            self.move_state[m] = MoveState::Frozen;
            let other = if self.get_alias(mv.dst) == ua {
                self.get_alias(mv.src)
            } else {
                self.get_alias(mv.dst)
            };
            let oi = Self::idx(other);
            if self.state[oi] == NodeState::FreezeWl
                && !self.is_move_related(other)
                && self.degree[oi] < self.k
            {
                self.state[oi] = NodeState::SimplifyWl;
                self.simplify_wl.push(other);
            }
        }
    }

    /// Pick the cheapest node to (potentially) spill: high degree, few
    /// occurrences. The short ranges created by an earlier spill rewrite
    /// are avoided unless nothing else remains.
    fn select_spill(&mut self) {
        self.spill_wl.retain({
            let state = &self.state;
            move |&r| state[Self::idx(r)] == NodeState::SpillWl
        });
        if self.spill_wl.is_empty() {
            return;
        }
        let metric = |r: Reg| {
            let d = self.degree[Self::idx(r)] as f64;
            let occ = self.graph.occurrences[Self::idx(r)] as f64;
            d / (occ + 1.0)
        };
        let mut best: Option<(usize, f64)> = None;
        for (i, &r) in self.spill_wl.iter().enumerate() {
            if self.unspillable.contains(&r) {
                continue;
            }
            let m = metric(r);
            if best.map(|(_, bm)| m > bm).unwrap_or(true) {
                best = Some((i, m));
            }
        }
        let pick = match best {
            Some((i, _)) => i,
            None => {
                log::warn!("coloring: forced to consider an unspillable range");
                0
            }
        };
        let r = self.spill_wl.swap_remove(pick);
        self.state[Self::idx(r)] = NodeState::SimplifyWl;
        self.simplify_wl.push(r);
        self.freeze_moves(r);
    }

    fn palette(&self, r: Reg) -> &'static [Mreg] {
        if self.live_across_call[Self::idx(r)] {
            arm64::allocatable_callee_saved(self.class)
        } else {
            arm64::allocatable(self.class)
        }
    }

    fn assign_colors(&mut self) {
        while let Some(r) = self.select_stack.pop() {
            let i = Self::idx(r);
            // The coalesce-updated adjacency, so neighbours inherited
            // from merged nodes are excluded too.
            let neighbours = self.adj[i].clone();
            let mut taken: Vec<Mreg> = Vec::new();
            for w in neighbours {
                let wa = self.get_alias(w);
                if self.state[Self::idx(wa)] == NodeState::Colored {
                    if let Some(c) = self.colors[Self::idx(wa)] {
                        taken.push(c);
                    }
                }
            }
            let choice = self
                .palette(r)
                .iter()
                .find(|c| !taken.contains(c))
                .copied();
            match choice {
                Some(c) => {
                    self.state[i] = NodeState::Colored;
                    self.colors[i] = Some(c);
                }
                None => {
                    self.state[i] = NodeState::Spilled;
                    self.spilled.push(r);
                }
            }
        }
        for &v in &self.coalesced_nodes.clone() {
            let a = self.get_alias(v);
            let vi = Self::idx(v);
            match self.state[Self::idx(a)] {
                NodeState::Colored => {
                    self.state[vi] = NodeState::Colored;
                    self.colors[vi] = self.colors[Self::idx(a)];
                }
                NodeState::Spilled => {
                    self.state[vi] = NodeState::Spilled;
                    self.spilled.push(v);
                }
                other => panic!("coloring: alias of {} in state {:?}", v, other),
            }
        }
    }

    fn commit(self, out: &mut Coloring) {
        for (i, c) in self.colors.into_iter().enumerate() {
            if let Some(c) = c {
                out.assignment[i] = Some(c);
            }
        }
        // A coalesced node aliased to a spilled one was pushed twice at
        // most; dedup keeps the spill list tidy.
        for r in self.spilled {
            if !out.spills.contains(&r) {
                out.spills.push(r);
            }
        }
    }
}

enum WlKind {
    Simplify,
    Freeze,
}

fn edge_key(a: Reg, b: Reg) -> (u32, u32) {
    let (x, y) = (a.as_u32(), b.as_u32());
    if x < y {
        (x, y)
    } else {
        (y, x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::op::Operation;
    use crate::ir::rtl::{Inst, Node};
    use crate::ir::types::{Signature, Type};
    use crate::regalloc::{graph, liveness};
    use charcoal_entity::PrimaryMap;
    use smallvec::smallvec;

    fn new_func() -> Function {
        Function {
            sig: Signature::void(),
            params: vec![],
            stacksize: 0,
            code: PrimaryMap::new(),
            entry: Node::from_u32(0),
            reg_types: PrimaryMap::new(),
            spill_slots: PrimaryMap::new(),
        }
    }

    fn allocate(func: &Function) -> Coloring {
        let live = liveness::compute(func);
        let g = graph::build(func, &live);
        color(func, &g, &HashSet::new())
    }

    #[test]
    fn interfering_registers_get_distinct_colors() {
        // a and b are simultaneously live.
        let mut f = new_func();
        let a = f.new_reg(Type::I32);
        let b = f.new_reg(Type::I32);
        let c = f.new_reg(Type::I32);
        let ret = f.add_instr(Inst::Ireturn(Some(c)));
        let add = f.add_instr(Inst::Iop {
            op: Operation::Oadd,
            args: smallvec![a, b],
            dest: c,
            succ: ret,
        });
        let defb = f.add_instr(Inst::Iop {
            op: Operation::Ointconst(2),
            args: smallvec![],
            dest: b,
            succ: add,
        });
        let defa = f.add_instr(Inst::Iop {
            op: Operation::Ointconst(1),
            args: smallvec![],
            dest: a,
            succ: defb,
        });
        f.entry = defa;

        let coloring = allocate(&f);
        assert!(coloring.spills.is_empty());
        assert_ne!(coloring.mreg(a), coloring.mreg(b));
    }

    #[test]
    fn move_related_registers_coalesce() {
        // b = move a; return b  — a and b should share a register.
        let mut f = new_func();
        let a = f.new_reg(Type::I64);
        let b = f.new_reg(Type::I64);
        let ret = f.add_instr(Inst::Ireturn(Some(b)));
        let mv = f.add_instr(Inst::Iop {
            op: Operation::Omove,
            args: smallvec![a],
            dest: b,
            succ: ret,
        });
        let defa = f.add_instr(Inst::Iop {
            op: Operation::Olongconst(9),
            args: smallvec![],
            dest: a,
            succ: mv,
        });
        f.entry = defa;

        let coloring = allocate(&f);
        assert!(coloring.spills.is_empty());
        assert_eq!(coloring.mreg(a), coloring.mreg(b));
    }

    #[test]
    fn classes_are_separate() {
        let mut f = new_func();
        let i = f.new_reg(Type::I32);
        let x = f.new_reg(Type::F64);
        let ret = f.add_instr(Inst::Ireturn(None));
        let defx = f.add_instr(Inst::Iop {
            op: Operation::Ofloatconst(1.0),
            args: smallvec![],
            dest: x,
            succ: ret,
        });
        let defi = f.add_instr(Inst::Iop {
            op: Operation::Ointconst(1),
            args: smallvec![],
            dest: i,
            succ: defx,
        });
        f.entry = defi;

        let coloring = allocate(&f);
        assert_eq!(coloring.mreg(i).class(), RegClass::Int);
        assert_eq!(coloring.mreg(x).class(), RegClass::Float);
    }

    #[test]
    fn call_crossing_value_gets_callee_saved_register() {
        let mut f = new_func();
        let a = f.new_reg(Type::I32);
        let d = f.new_reg(Type::I32);
        let s = f.new_reg(Type::I32);
        let ret = f.add_instr(Inst::Ireturn(Some(s)));
        let add = f.add_instr(Inst::Iop {
            op: Operation::Oadd,
            args: smallvec![a, d],
            dest: s,
            succ: ret,
        });
        let call = f.add_instr(Inst::Icall {
            sig: Signature {
                params: vec![],
                ret: Some(Type::I32),
                variadic: false,
            },
            callee: crate::ir::rtl::Callee::Symbol(crate::symbols::symbol("g")),
            args: vec![],
            dest: Some(d),
            succ: add,
        });
        let defa = f.add_instr(Inst::Iop {
            op: Operation::Ointconst(3),
            args: smallvec![],
            dest: a,
            succ: call,
        });
        f.entry = defa;

        let coloring = allocate(&f);
        assert!(coloring.spills.is_empty());
        assert!(
            coloring.mreg(a).is_callee_saved(),
            "call-crossing value in {}",
            coloring.mreg(a)
        );
    }

    #[test]
    fn high_pressure_spills() {
        // Build far more simultaneously-live registers than the integer
        // class holds; colouring must report spills rather than reuse.
        let mut f = new_func();
        let count = 40;
        let regs: Vec<Reg> = (0..count).map(|_| f.new_reg(Type::I32)).collect();
        // sum = r0 + r1; sum += r2; ... then return sum, with all regs
        // defined up front so they are all live across the middle.
        let sum = f.new_reg(Type::I32);
        let ret = f.add_instr(Inst::Ireturn(Some(sum)));
        let mut succ = ret;
        for &r in regs.iter().rev() {
            succ = f.add_instr(Inst::Iop {
                op: Operation::Oadd,
                args: smallvec![sum, r],
                dest: sum,
                succ,
            });
        }
        for (i, &r) in regs.iter().enumerate().rev() {
            succ = f.add_instr(Inst::Iop {
                op: Operation::Ointconst(i as i32),
                args: smallvec![],
                dest: r,
                succ,
            });
        }
        f.entry = succ;

        let live = liveness::compute(&f);
        let g = graph::build(&f, &live);
        let coloring = color(&f, &g, &HashSet::new());
        assert!(
            !coloring.spills.is_empty(),
            "40 simultaneously live registers cannot fit 24 colours"
        );
    }
}
