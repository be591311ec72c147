//! Register allocation: RTL to LTL.
//!
//! Four coupled pieces, run in a loop until no spills remain:
//!
//! 1. [`liveness`] — backward dataflow computing live-out sets per node;
//! 2. [`graph`] — the interference graph with move/preference edges and
//!    the live-across-call marking;
//! 3. [`coloring`] — iterated register coalescing over each register
//!    class;
//! 4. the spill rewrite below, which gives each spilled pseudo-register a
//!    `Local` slot and threads `Igetstack`/`Isetstack` around its uses and
//!    defs through fresh, unspillable registers.
//!
//! When colouring succeeds, the transform replaces pseudo-registers with
//! their machine registers and materialises the AAPCS64 argument, result
//! and parameter traffic as explicit moves, sequentialising each parallel
//! move set with the windmill algorithm (cycles break through `x16`/`d31`;
//! `x17` carries indirect call addresses).

pub mod coloring;
pub mod graph;
pub mod liveness;
pub mod set;

use crate::ir::ltl;
use crate::ir::op::Operation;
use crate::ir::rtl::{self, Node, Reg};
use crate::ir::types::{Signature, Slot, SlotKind, Type};
use crate::isa::arm64::{self, ArgLoc, Mreg};
use crate::isa::RegClass;
use crate::symbols::Symbol;
use charcoal_entity::PrimaryMap;
use smallvec::SmallVec;
use std::collections::HashSet;

use self::coloring::Coloring;

/// Run the allocator over a whole program.
pub fn run(prog: rtl::Program) -> ltl::Program {
    run_with_dumps(prog, &mut Vec::new())
}

/// Like [`run`], also appending a printed RTL round per spill iteration
/// (round 0 is the input) for the `--drtl` dump.
pub fn run_with_dumps(prog: rtl::Program, rounds: &mut Vec<String>) -> ltl::Program {
    ltl::Program {
        globals: prog.globals,
        externals: prog.externals,
        functions: prog
            .functions
            .into_iter()
            .map(|(name, f)| {
                log::debug!("regalloc: {}", name);
                (name, allocate_function(name, f, rounds))
            })
            .collect(),
    }
}

/// Allocate one function.
pub fn allocate_function(
    name: Symbol,
    mut func: rtl::Function,
    rounds: &mut Vec<String>,
) -> ltl::Function {
    let mut unspillable: HashSet<Reg> = HashSet::new();
    loop {
        rounds.push(format!("\"{}\"{}", name, func));
        let live = liveness::compute(&func);
        let graph = graph::build(&func, &live);
        let coloring = coloring::color(&func, &graph, &unspillable);
        if coloring.spills.is_empty() {
            return transform(func, &coloring);
        }
        log::debug!(
            "regalloc: {}: spilling {} registers, rerunning",
            name,
            coloring.spills.len()
        );
        rewrite_spills(&mut func, &coloring.spills, &mut unspillable);
    }
}

// ---------------------------------------------------------------------------
// Spill rewriting.

/// Give every spilled register a slot, and route each of its uses and
/// defs through a fresh register with a reload before or a save after.
fn rewrite_spills(func: &mut rtl::Function, spills: &[Reg], unspillable: &mut HashSet<Reg>) {
    use rtl::Inst;

    let mut slot_of = std::collections::HashMap::new();
    for &r in spills {
        let slot = func.spill_slots.push(func.reg_type(r));
        slot_of.insert(r, slot);
    }

    let nodes: Vec<Node> = func.code.keys().collect();
    for n in nodes {
        let mut inst = func.code[n].clone();

        // Replace spilled uses with fresh reloaded registers.
        let mut reloads: SmallVec<[(rtl::SpillSlot, Reg); 2]> = SmallVec::new();
        {
            let mut replace = |r: &mut Reg, func: &mut rtl::Function| {
                if let Some(&slot) = slot_of.get(r) {
                    let fresh = func.new_reg(func.reg_type(*r));
                    unspillable.insert(fresh);
                    reloads.push((slot, fresh));
                    *r = fresh;
                }
            };
            match &mut inst {
                Inst::Iop { args, .. } | Inst::Icond { args, .. } => {
                    for a in args.iter_mut() {
                        replace(a, func);
                    }
                }
                Inst::Iload { args, .. } => {
                    for a in args.iter_mut() {
                        replace(a, func);
                    }
                }
                Inst::Istore { args, src, .. } => {
                    for a in args.iter_mut() {
                        replace(a, func);
                    }
                    replace(src, func);
                }
                Inst::Icall { callee, args, .. } | Inst::Itailcall { callee, args, .. } => {
                    for a in args.iter_mut() {
                        replace(a, func);
                    }
                    if let rtl::Callee::Reg(r) = callee {
                        replace(r, func);
                    }
                }
                Inst::Ibuiltin { args, .. } => {
                    for a in args.iter_mut() {
                        replace(a, func);
                    }
                }
                Inst::Ijumptable { arg, .. } => replace(arg, func),
                Inst::Ireturn(Some(r)) => replace(r, func),
                Inst::Isetstack { src, .. } => replace(src, func),
                Inst::Inop { .. } | Inst::Ireturn(None) | Inst::Igetstack { .. } => {}
            }
        }

        // Replace a spilled def with a fresh register saved afterwards.
        let mut save: Option<(Reg, rtl::SpillSlot)> = None;
        {
            let mut replace_def = |d: &mut Reg, func: &mut rtl::Function| {
                if let Some(&slot) = slot_of.get(d) {
                    let fresh = func.new_reg(func.reg_type(*d));
                    unspillable.insert(fresh);
                    save = Some((fresh, slot));
                    *d = fresh;
                }
            };
            match &mut inst {
                Inst::Iop { dest, .. }
                | Inst::Iload { dest, .. }
                | Inst::Igetstack { dest, .. } => replace_def(dest, func),
                Inst::Icall {
                    dest: Some(dest), ..
                }
                | Inst::Ibuiltin {
                    dest: Some(dest), ..
                } => replace_def(dest, func),
                _ => {}
            }
        }

        // The save, if any, goes on a fresh node after the instruction.
        if let Some((fresh, slot)) = save {
            let orig_succ = single_succ(&inst);
            let save_node = func.code.push(Inst::Isetstack {
                src: fresh,
                slot,
                succ: orig_succ,
            });
            set_single_succ(&mut inst, save_node);
        }

        if reloads.is_empty() {
            func.code[n] = inst;
            continue;
        }

        // Node n holds the first reload so predecessors need no fixup;
        // the remaining reloads and the instruction chain behind it.
        let mut chain = func.code.push(inst);
        let count = reloads.len();
        for &(slot, fresh) in reloads.iter().rev().take(count - 1) {
            chain = func.code.push(Inst::Igetstack {
                slot,
                dest: fresh,
                succ: chain,
            });
        }
        let (slot, fresh) = reloads[0];
        func.code[n] = Inst::Igetstack {
            slot,
            dest: fresh,
            succ: chain,
        };
    }
}

fn single_succ(inst: &rtl::Inst) -> Node {
    let succs = inst.successors();
    debug_assert_eq!(succs.len(), 1, "defining instruction with branch");
    succs[0]
}

fn set_single_succ(inst: &mut rtl::Inst, new: Node) {
    use rtl::Inst;
    match inst {
        Inst::Inop { succ }
        | Inst::Iop { succ, .. }
        | Inst::Iload { succ, .. }
        | Inst::Istore { succ, .. }
        | Inst::Icall { succ, .. }
        | Inst::Ibuiltin { succ, .. }
        | Inst::Igetstack { succ, .. }
        | Inst::Isetstack { succ, .. } => *succ = new,
        _ => panic!("set_single_succ on branching instruction"),
    }
}

// ---------------------------------------------------------------------------
// Transform to LTL.

/// One pending parallel move.
type Move = (ltl::Loc, ltl::Loc);

/// Sequentialise a set of parallel moves (all reads conceptually before
/// all writes). Register cycles break through the per-class scratch.
fn sequentialize_moves(mut pending: Vec<Move>, out: &mut Vec<ltl::Inst>) {
    pending.retain(|(src, dst)| src != dst);
    while !pending.is_empty() {
        // A move is safe when nothing still reads its destination.
        let safe = pending.iter().position(|&(_, dst)| {
            !pending.iter().any(|&(src, _)| src == dst)
        });
        match safe {
            Some(i) => {
                let (src, dst) = pending.swap_remove(i);
                emit_move(src, dst, out);
            }
            None => {
                // Every pending destination is also read: a cycle of
                // register moves. Park one source in the scratch.
                let (src, dst) = pending[0];
                let scratch = match src {
                    ltl::Loc::R(r) if r.class() == RegClass::Float => {
                        ltl::Loc::R(arm64::FLOAT_SCRATCH)
                    }
                    _ => ltl::Loc::R(arm64::INT_SCRATCH[0]),
                };
                emit_move(src, scratch, out);
                for (s, _) in pending.iter_mut() {
                    if *s == src {
                        *s = scratch;
                    }
                }
                let _ = dst;
            }
        }
    }
}

fn emit_move(src: ltl::Loc, dst: ltl::Loc, out: &mut Vec<ltl::Inst>) {
    match (src, dst) {
        (ltl::Loc::R(s), ltl::Loc::R(d)) => out.push(ltl::Inst::Lop {
            op: Operation::Omove,
            args: SmallVec::from_slice(&[s]),
            dest: d,
        }),
        (ltl::Loc::S(slot), ltl::Loc::R(d)) => {
            out.push(ltl::Inst::Lgetstack { slot, dest: d })
        }
        (ltl::Loc::R(s), ltl::Loc::S(slot)) => {
            out.push(ltl::Inst::Lsetstack { src: s, slot })
        }
        (ltl::Loc::S(_), ltl::Loc::S(_)) => {
            panic!("regalloc: memory-to-memory move")
        }
    }
}

/// The argument moves for a call with signature `sig` whose argument
/// values live in `srcs`.
fn argument_moves(sig: &Signature, srcs: &[Mreg]) -> Vec<Move> {
    let (locs, _) = arm64::loc_arguments(sig);
    debug_assert_eq!(locs.len(), srcs.len());
    locs.iter()
        .zip(srcs.iter())
        .map(|(loc, &src)| {
            let dst = match loc {
                ArgLoc::Reg(r) => ltl::Loc::R(*r),
                ArgLoc::Stack(ofs) => {
                    let ty = if src.class() == RegClass::Float {
                        Type::F64
                    } else {
                        Type::I64
                    };
                    ltl::Loc::S(Slot::new(SlotKind::Outgoing, *ofs, ty))
                }
            };
            (ltl::Loc::R(src), dst)
        })
        .collect()
}

fn transform(func: rtl::Function, coloring: &Coloring) -> ltl::Function {
    let mreg = |r: Reg| coloring.mreg(r);

    // Spill slots become Local slots, laid out in order.
    let mut slot_ofs = Vec::with_capacity(func.spill_slots.len());
    let mut locals_size: i64 = 0;
    for ty in func.spill_slots.values() {
        let align = ty.bytes();
        locals_size = (locals_size + align - 1) & !(align - 1);
        slot_ofs.push(locals_size);
        locals_size += ty.bytes();
    }
    locals_size = (locals_size + 7) & !7;

    let local_slot = |slot: rtl::SpillSlot, func: &rtl::Function| {
        Slot::new(
            SlotKind::Local,
            slot_ofs[slot.as_u32() as usize],
            func.spill_slots[slot],
        )
    };

    let mut outgoing_size: i64 = 0;
    let mut has_calls = false;
    let mut code: PrimaryMap<Node, ltl::BBlock> = PrimaryMap::new();

    for (_, inst) in func.code.iter() {
        use rtl::Inst;
        let mut body: Vec<ltl::Inst> = Vec::new();
        match inst {
            Inst::Inop { succ } => body.push(ltl::Inst::Lbranch(*succ)),
            Inst::Iop { op, args, dest, succ } => {
                let d = mreg(*dest);
                if op.is_move() {
                    let s = mreg(args[0]);
                    if s != d {
                        body.push(ltl::Inst::Lop {
                            op: Operation::Omove,
                            args: SmallVec::from_slice(&[s]),
                            dest: d,
                        });
                    }
                } else {
                    body.push(ltl::Inst::Lop {
                        op: *op,
                        args: args.iter().map(|&r| mreg(r)).collect(),
                        dest: d,
                    });
                }
                body.push(ltl::Inst::Lbranch(*succ));
            }
            Inst::Iload {
                chunk,
                mode,
                args,
                dest,
                succ,
            } => {
                body.push(ltl::Inst::Lload {
                    chunk: *chunk,
                    mode: *mode,
                    args: args.iter().map(|&r| mreg(r)).collect(),
                    dest: mreg(*dest),
                });
                body.push(ltl::Inst::Lbranch(*succ));
            }
            Inst::Istore {
                chunk,
                mode,
                args,
                src,
                succ,
            } => {
                body.push(ltl::Inst::Lstore {
                    chunk: *chunk,
                    mode: *mode,
                    args: args.iter().map(|&r| mreg(r)).collect(),
                    src: mreg(*src),
                });
                body.push(ltl::Inst::Lbranch(*succ));
            }
            Inst::Igetstack { slot, dest, succ } => {
                body.push(ltl::Inst::Lgetstack {
                    slot: local_slot(*slot, &func),
                    dest: mreg(*dest),
                });
                body.push(ltl::Inst::Lbranch(*succ));
            }
            Inst::Isetstack { src, slot, succ } => {
                body.push(ltl::Inst::Lsetstack {
                    src: mreg(*src),
                    slot: local_slot(*slot, &func),
                });
                body.push(ltl::Inst::Lbranch(*succ));
            }
            Inst::Icall {
                sig,
                callee,
                args,
                dest,
                succ,
            } => {
                has_calls = true;
                let (_, stack_bytes) = arm64::loc_arguments(sig);
                outgoing_size = outgoing_size.max(stack_bytes);
                let srcs: Vec<Mreg> = args.iter().map(|&r| mreg(r)).collect();
                let mut moves = argument_moves(sig, &srcs);
                let callee = match callee {
                    rtl::Callee::Symbol(s) => ltl::Callee::Symbol(*s),
                    rtl::Callee::Reg(r) => {
                        // The address must survive the argument moves.
                        moves.push((
                            ltl::Loc::R(mreg(*r)),
                            ltl::Loc::R(arm64::INT_SCRATCH[1]),
                        ));
                        ltl::Callee::Reg(arm64::INT_SCRATCH[1])
                    }
                };
                sequentialize_moves(moves, &mut body);
                body.push(ltl::Inst::Lcall {
                    sig: sig.clone(),
                    callee,
                });
                if let Some(d) = dest {
                    let res = arm64::loc_result(sig)
                        .expect("call result with void signature");
                    let d = mreg(*d);
                    if d != res {
                        body.push(ltl::Inst::Lop {
                            op: Operation::Omove,
                            args: SmallVec::from_slice(&[res]),
                            dest: d,
                        });
                    }
                }
                body.push(ltl::Inst::Lbranch(*succ));
            }
            Inst::Itailcall { sig, callee, args } => {
                has_calls = true;
                let srcs: Vec<Mreg> = args.iter().map(|&r| mreg(r)).collect();
                let mut moves = argument_moves(sig, &srcs);
                let callee = match callee {
                    rtl::Callee::Symbol(s) => ltl::Callee::Symbol(*s),
                    rtl::Callee::Reg(r) => {
                        moves.push((
                            ltl::Loc::R(mreg(*r)),
                            ltl::Loc::R(arm64::INT_SCRATCH[1]),
                        ));
                        ltl::Callee::Reg(arm64::INT_SCRATCH[1])
                    }
                };
                sequentialize_moves(moves, &mut body);
                body.push(ltl::Inst::Ltailcall {
                    sig: sig.clone(),
                    callee,
                });
            }
            Inst::Ibuiltin {
                builtin,
                args,
                dest,
                succ,
            } => {
                has_calls = true;
                // Builtin arguments use the integer argument registers.
                let moves: Vec<Move> = args
                    .iter()
                    .enumerate()
                    .map(|(i, &r)| {
                        (
                            ltl::Loc::R(mreg(r)),
                            ltl::Loc::R(arm64::INT_PARAM_REGS[i]),
                        )
                    })
                    .collect();
                sequentialize_moves(moves, &mut body);
                body.push(ltl::Inst::Lbuiltin { builtin: *builtin });
                debug_assert!(dest.is_none(), "builtin with a result");
                body.push(ltl::Inst::Lbranch(*succ));
            }
            Inst::Icond {
                cond,
                args,
                ifso,
                ifnot,
            } => {
                body.push(ltl::Inst::Lcond {
                    cond: *cond,
                    args: args.iter().map(|&r| mreg(r)).collect(),
                    ifso: *ifso,
                    ifnot: *ifnot,
                });
            }
            Inst::Ijumptable { arg, targets } => {
                body.push(ltl::Inst::Ljumptable {
                    arg: mreg(*arg),
                    targets: targets.clone(),
                });
            }
            Inst::Ireturn(opt) => {
                if let Some(r) = opt {
                    let res = arm64::loc_result(&func.sig)
                        .expect("value return from void function");
                    let s = mreg(*r);
                    if s != res {
                        body.push(ltl::Inst::Lop {
                            op: Operation::Omove,
                            args: SmallVec::from_slice(&[s]),
                            dest: res,
                        });
                    }
                }
                body.push(ltl::Inst::Lreturn);
            }
        }
        code.push(ltl::BBlock { body });
    }

    // Parameter moves prepend to the entry block.
    let (param_locs, _) = arm64::loc_arguments(&func.sig);
    let entry_moves: Vec<Move> = param_locs
        .iter()
        .zip(func.params.iter())
        .map(|(loc, &p)| {
            let src = match loc {
                ArgLoc::Reg(r) => ltl::Loc::R(*r),
                ArgLoc::Stack(ofs) => ltl::Loc::S(Slot::new(
                    SlotKind::Incoming,
                    *ofs,
                    func.reg_type(p),
                )),
            };
            (src, ltl::Loc::R(mreg(p)))
        })
        .collect();
    let mut prologue = Vec::new();
    sequentialize_moves(entry_moves, &mut prologue);
    if !prologue.is_empty() {
        let old = std::mem::replace(&mut code[func.entry].body, Vec::new());
        prologue.extend(old);
        code[func.entry].body = prologue;
    }

    // Callee-saved registers actually used, in index order.
    let mut used: Vec<Mreg> = coloring
        .used_mregs()
        .into_iter()
        .filter(|r| r.is_callee_saved())
        .collect();
    used.sort_by_key(|r| r.index());
    used.dedup();

    ltl::Function {
        sig: func.sig,
        entry: func.entry,
        code,
        stackdata: func.stacksize,
        locals_size,
        outgoing_size,
        used_callee_saved: used,
        has_calls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ltl::Loc;

    #[test]
    fn parallel_moves_without_cycle() {
        // x1 <- x0, x2 <- x1 must move x2 first.
        let moves = vec![
            (Loc::R(Mreg::X0), Loc::R(Mreg::X1)),
            (Loc::R(Mreg::X1), Loc::R(Mreg::X2)),
        ];
        let mut out = Vec::new();
        sequentialize_moves(moves, &mut out);
        assert_eq!(out.len(), 2);
        match &out[0] {
            ltl::Inst::Lop { args, dest, .. } => {
                assert_eq!(args[0], Mreg::X1);
                assert_eq!(*dest, Mreg::X2);
            }
            other => panic!("unexpected first move: {:?}", other),
        }
    }

    #[test]
    fn parallel_moves_cycle_uses_scratch() {
        // Swap x0 and x1: needs the scratch register.
        let moves = vec![
            (Loc::R(Mreg::X0), Loc::R(Mreg::X1)),
            (Loc::R(Mreg::X1), Loc::R(Mreg::X0)),
        ];
        let mut out = Vec::new();
        sequentialize_moves(moves, &mut out);
        assert_eq!(out.len(), 3);
        let uses_scratch = out.iter().any(|i| match i {
            ltl::Inst::Lop { args, dest, .. } => {
                args[0] == arm64::INT_SCRATCH[0] || *dest == arm64::INT_SCRATCH[0]
            }
            _ => false,
        });
        assert!(uses_scratch);
    }

    #[test]
    fn stack_argument_becomes_setstack() {
        let sig = Signature {
            params: vec![Type::I32; 9],
            ret: None,
            variadic: false,
        };
        let srcs = vec![Mreg::X9; 9];
        let moves = argument_moves(&sig, &srcs);
        let mut out = Vec::new();
        sequentialize_moves(moves, &mut out);
        assert!(out
            .iter()
            .any(|i| matches!(i, ltl::Inst::Lsetstack { slot, .. }
                if slot.kind == SlotKind::Outgoing && slot.ofs == 0)));
    }
}
