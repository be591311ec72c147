//! The interference graph.
//!
//! An undirected graph over pseudo-registers. A register defined at a node
//! interferes with every register live out of that node — except, for a
//! move `d := s`, with `s` itself: leaving that edge out is what makes
//! coalescing `d` and `s` possible. A parallel list of move edges records
//! the coalescing candidates.
//!
//! Only same-class registers interfere; the integer and float classes are
//! coloured against disjoint register files, so cross-class edges would
//! never influence a colour choice.
//!
//! Registers live across a call (or builtin, which clobbers the same
//! registers) are flagged here; the colourer restricts them to
//! callee-saved colours.

use crate::ir::rtl::{Function, Inst, Reg};
use crate::regalloc::liveness::Liveness;
use std::collections::HashSet;

/// A move edge between two coalescable registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveEdge {
    /// Destination of the move.
    pub dst: Reg,
    /// Source of the move.
    pub src: Reg,
}

/// The interference graph of one function.
pub struct Graph {
    /// Adjacency lists, indexed by register.
    pub adj: Vec<Vec<Reg>>,
    /// Edge membership, normalised to (low, high) index pairs.
    edges: HashSet<(u32, u32)>,
    /// Move/preference edges.
    pub moves: Vec<MoveEdge>,
    /// Indices into `moves` per register.
    pub move_list: Vec<Vec<usize>>,
    /// Static use+def counts per register, for spill cost.
    pub occurrences: Vec<u32>,
    /// Whether the register is live across some call.
    pub live_across_call: Vec<bool>,
}

impl Graph {
    /// Are `a` and `b` connected by an interference edge?
    pub fn interferes(&self, a: Reg, b: Reg) -> bool {
        let key = edge_key(a, b);
        self.edges.contains(&key)
    }

    /// The degree of `r`.
    pub fn degree(&self, r: Reg) -> usize {
        self.adj[r.as_u32() as usize].len()
    }

    fn add_edge(&mut self, a: Reg, b: Reg) {
        if a == b {
            return;
        }
        if self.edges.insert(edge_key(a, b)) {
            self.adj[a.as_u32() as usize].push(b);
            self.adj[b.as_u32() as usize].push(a);
        }
    }
}

fn edge_key(a: Reg, b: Reg) -> (u32, u32) {
    let (x, y) = (a.as_u32(), b.as_u32());
    if x < y {
        (x, y)
    } else {
        (y, x)
    }
}

/// Build the interference graph for `func` from its liveness.
pub fn build(func: &Function, live: &Liveness) -> Graph {
    let nregs = func.reg_types.len();
    let mut graph = Graph {
        adj: vec![Vec::new(); nregs],
        edges: HashSet::new(),
        moves: Vec::new(),
        move_list: vec![Vec::new(); nregs],
        occurrences: vec![0; nregs],
        live_across_call: vec![false; nregs],
    };

    let same_class = |a: Reg, b: Reg| func.reg_type(a).is_int() == func.reg_type(b).is_int();

    for (node, inst) in func.code.iter() {
        for u in inst.uses() {
            graph.occurrences[u.as_u32() as usize] += 1;
        }
        if let Some(d) = inst.def() {
            graph.occurrences[d.as_u32() as usize] += 1;

            match inst.as_move() {
                Some((dst, src)) => {
                    for r in live.out(node).iter() {
                        if r != dst && r != src && same_class(dst, r) {
                            graph.add_edge(dst, r);
                        }
                    }
                    if same_class(dst, src) && dst != src {
                        let idx = graph.moves.len();
                        graph.moves.push(MoveEdge { dst, src });
                        graph.move_list[dst.as_u32() as usize].push(idx);
                        graph.move_list[src.as_u32() as usize].push(idx);
                    }
                }
                None => {
                    for r in live.out(node).iter() {
                        if r != d && same_class(d, r) {
                            graph.add_edge(d, r);
                        }
                    }
                }
            }
        }

        // Values live past a call cannot stay in caller-saved registers.
        match inst {
            Inst::Icall { dest, .. } | Inst::Ibuiltin { dest, .. } => {
                for r in live.out(node).iter() {
                    if Some(r) != *dest {
                        graph.live_across_call[r.as_u32() as usize] = true;
                    }
                }
            }
            _ => {}
        }
    }

    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::op::Operation;
    use crate::ir::rtl::Node;
    use crate::ir::types::{Signature, Type};
    use crate::regalloc::liveness;
    use crate::symbols::symbol;
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

    #[test]
    fn def_interferes_with_live_out() {
        // a = 1; b = 2; return a+b  — a is live when b is defined.
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

        let live = liveness::compute(&f);
        let g = build(&f, &live);
        assert!(g.interferes(a, b));
        // c is defined when neither a nor b is live afterwards.
        assert!(!g.interferes(a, c));
        assert!(!g.interferes(b, c));
    }

    #[test]
    fn move_does_not_interfere_with_its_source() {
        // b = move a; use of both afterwards would interfere, but a plain
        // copy with a dead afterwards must not create (a, b).
        let mut f = new_func();
        let a = f.new_reg(Type::I32);
        let b = f.new_reg(Type::I32);
        let ret = f.add_instr(Inst::Ireturn(Some(b)));
        let mv = f.add_instr(Inst::Iop {
            op: Operation::Omove,
            args: smallvec![a],
            dest: b,
            succ: ret,
        });
        let defa = f.add_instr(Inst::Iop {
            op: Operation::Ointconst(7),
            args: smallvec![],
            dest: a,
            succ: mv,
        });
        f.entry = defa;

        let live = liveness::compute(&f);
        let g = build(&f, &live);
        assert!(!g.interferes(a, b));
        // And the preference edge exists.
        assert_eq!(g.moves.len(), 1);
        assert_eq!(g.moves[0], MoveEdge { dst: b, src: a });
    }

    #[test]
    fn live_across_call_is_flagged() {
        let mut f = new_func();
        let a = f.new_reg(Type::I32);
        let d = f.new_reg(Type::I32);
        let sum = f.new_reg(Type::I32);
        let ret = f.add_instr(Inst::Ireturn(Some(sum)));
        let add = f.add_instr(Inst::Iop {
            op: Operation::Oadd,
            args: smallvec![a, d],
            dest: sum,
            succ: ret,
        });
        let call = f.add_instr(Inst::Icall {
            sig: Signature {
                params: vec![],
                ret: Some(Type::I32),
                variadic: false,
            },
            callee: crate::ir::rtl::Callee::Symbol(symbol("g")),
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

        let live = liveness::compute(&f);
        let g = build(&f, &live);
        assert!(g.live_across_call[a.as_u32() as usize]);
        // The call result itself is not "across" the call.
        assert!(!g.live_across_call[d.as_u32() as usize]);
    }
}
