//! Frame construction: LTL to Mach.
//!
//! Lays out the activation record and lowers the linearised blocks to the
//! flat Mach instruction list. The frame grows downward:
//!
//! ```text
//! caller SP ──┐
//!             │ incoming overflow args      (read via Mgetparam)
//! FP ──────── │ saved FP, LR (16 bytes)
//!             │ saved callee-saved registers
//!             │ local spill slots
//!             │ stack data (address-taken locals)
//!             │ outgoing overflow args
//! SP ──────── │ 16-byte aligned
//! ```
//!
//! Stack-slot references become SP-relative loads and stores at concrete
//! offsets; `Ainstack`/`Oaddrstack` offsets are rebased past the outgoing
//! area. Callee-saved registers are stored right at entry and reloaded
//! before every return — and before every tail call, so the restores are
//! visibly ordered before the jump. The SP adjustment itself is left to
//! the emitter, driven by the recorded frame size.
//!
//! A leaf function that needs no frame bytes at all gets `stacksize == 0`
//! and skips the FP/LR save entirely.

use crate::ir::ltl;
use crate::ir::mach::{Function, Inst, Label, Program};
use crate::ir::op::{Addressing, Operation};
use crate::ir::rtl::Node;
use crate::ir::types::{Slot, SlotKind, Type};
use crate::isa::arm64::Mreg;
use crate::isa::RegClass;
use crate::linearize;
use std::collections::HashSet;

/// Run linearisation and stacking over a whole program.
pub fn run(prog: ltl::Program) -> Program {
    Program {
        globals: prog.globals,
        externals: prog.externals,
        functions: prog
            .functions
            .into_iter()
            .map(|(name, f)| {
                log::debug!("stacking: {}", name);
                (name, transl_function(f))
            })
            .collect(),
    }
}

/// Concrete frame measurements for one function.
struct Frame {
    /// Start of the stack-data region (end of outgoing).
    data_base: i64,
    /// Start of the spill-slot region.
    locals_base: i64,
    /// Start of the callee-save region.
    saves_base: i64,
    /// Total frame size; zero for a frameless leaf.
    size: i64,
}

fn align16(n: i64) -> i64 {
    (n + 15) & !15
}

fn layout(func: &ltl::Function) -> Frame {
    let out = func.outgoing_size;
    let data_base = out;
    let locals_base = data_base + func.stackdata;
    let saves_base = locals_base + func.locals_size;
    let saves = func.used_callee_saved.len() as i64 * 8;

    let below_pair = saves_base + saves;
    let size = if !func.has_calls && below_pair == 0 {
        0
    } else {
        align16(below_pair + 16)
    };
    Frame {
        data_base,
        locals_base,
        saves_base,
        size,
    }
}

fn slot_offset(frame: &Frame, slot: &Slot) -> i64 {
    match slot.kind {
        SlotKind::Local => frame.locals_base + slot.ofs,
        SlotKind::Outgoing => slot.ofs,
        SlotKind::Incoming => unreachable!("incoming slots go through Mgetparam"),
    }
}

/// Rebase an addressing mode's stack offset into the concrete frame.
fn transl_addressing(frame: &Frame, mode: Addressing) -> Addressing {
    match mode {
        Addressing::Ainstack(ofs) => Addressing::Ainstack(frame.data_base + ofs),
        other => other,
    }
}

fn transl_op(frame: &Frame, op: Operation) -> Operation {
    match op {
        Operation::Oaddrstack(ofs) => Operation::Oaddrstack(frame.data_base + ofs),
        other => other,
    }
}

fn save_type(r: Mreg) -> Type {
    match r.class() {
        RegClass::Int => Type::I64,
        RegClass::Float => Type::F64,
    }
}

fn transl_function(func: ltl::Function) -> Function {
    let frame = layout(&func);
    let order = linearize::order(&func);

    let label_of = |n: Node| Label::from_u32(n.as_u32());

    // Callee-save stores, emitted once at entry.
    let mut body: Vec<Inst> = Vec::new();
    for (i, &r) in func.used_callee_saved.iter().enumerate() {
        body.push(Inst::Msetstack {
            src: r,
            ofs: frame.saves_base + i as i64 * 8,
            ty: save_type(r),
        });
    }
    let restores: Vec<Inst> = func
        .used_callee_saved
        .iter()
        .enumerate()
        .rev()
        .map(|(i, &r)| Inst::Mgetstack {
            ofs: frame.saves_base + i as i64 * 8,
            ty: save_type(r),
            dest: r,
        })
        .collect();

    for (pos, &node) in order.iter().enumerate() {
        let next = order.get(pos + 1).copied();
        body.push(Inst::Mlabel(label_of(node)));

        for inst in &func.code[node].body {
            match inst {
                ltl::Inst::Lop { op, args, dest } => body.push(Inst::Mop {
                    op: transl_op(&frame, *op),
                    args: args.clone(),
                    dest: *dest,
                }),
                ltl::Inst::Lload {
                    chunk,
                    mode,
                    args,
                    dest,
                } => body.push(Inst::Mload {
                    chunk: *chunk,
                    mode: transl_addressing(&frame, *mode),
                    args: args.clone(),
                    dest: *dest,
                }),
                ltl::Inst::Lstore {
                    chunk,
                    mode,
                    args,
                    src,
                } => body.push(Inst::Mstore {
                    chunk: *chunk,
                    mode: transl_addressing(&frame, *mode),
                    args: args.clone(),
                    src: *src,
                }),
                ltl::Inst::Lgetstack { slot, dest } => {
                    if slot.kind == SlotKind::Incoming {
                        body.push(Inst::Mgetparam {
                            ofs: slot.ofs,
                            ty: slot.ty,
                            dest: *dest,
                        });
                    } else {
                        body.push(Inst::Mgetstack {
                            ofs: slot_offset(&frame, slot),
                            ty: slot.ty,
                            dest: *dest,
                        });
                    }
                }
                ltl::Inst::Lsetstack { src, slot } => body.push(Inst::Msetstack {
                    src: *src,
                    ofs: slot_offset(&frame, slot),
                    ty: slot.ty,
                }),
                ltl::Inst::Lcall { sig, callee } => body.push(Inst::Mcall {
                    sig: sig.clone(),
                    callee: *callee,
                }),
                ltl::Inst::Lbuiltin { builtin } => {
                    body.push(Inst::Mbuiltin { builtin: *builtin })
                }
                ltl::Inst::Lbranch(t) => {
                    if next != Some(*t) {
                        body.push(Inst::Mgoto(label_of(*t)));
                    }
                }
                ltl::Inst::Lcond {
                    cond,
                    args,
                    ifso,
                    ifnot,
                } => {
                    if next == Some(*ifnot) {
                        body.push(Inst::Mcond {
                            cond: *cond,
                            args: args.clone(),
                            target: label_of(*ifso),
                        });
                    } else if next == Some(*ifso) {
                        // Fall through to the taken leg by negating.
                        body.push(Inst::Mcond {
                            cond: cond.negate(),
                            args: args.clone(),
                            target: label_of(*ifnot),
                        });
                    } else {
                        body.push(Inst::Mcond {
                            cond: *cond,
                            args: args.clone(),
                            target: label_of(*ifso),
                        });
                        body.push(Inst::Mgoto(label_of(*ifnot)));
                    }
                }
                ltl::Inst::Ljumptable { arg, targets } => body.push(Inst::Mjumptable {
                    arg: *arg,
                    targets: targets.iter().map(|&t| label_of(t)).collect(),
                }),
                ltl::Inst::Lreturn => {
                    body.extend(restores.iter().cloned());
                    body.push(Inst::Mreturn);
                }
                ltl::Inst::Ltailcall { sig, callee } => {
                    // Restores must precede the tail jump; the argument
                    // moves are already in place and touch no
                    // callee-saved register.
                    body.extend(restores.iter().cloned());
                    body.push(Inst::Mtailcall {
                        sig: sig.clone(),
                        callee: *callee,
                    });
                }
            }
        }
    }

    strip_unused_labels(&mut body);

    Function {
        sig: func.sig,
        body,
        stacksize: frame.size,
        saved_regs: func.used_callee_saved,
        is_leaf: !func.has_calls,
    }
}

/// Keep only labels some jump references.
fn strip_unused_labels(body: &mut Vec<Inst>) {
    let mut referenced: HashSet<Label> = HashSet::new();
    for inst in body.iter() {
        match inst {
            Inst::Mgoto(l) => {
                referenced.insert(*l);
            }
            Inst::Mcond { target, .. } => {
                referenced.insert(*target);
            }
            Inst::Mjumptable { targets, .. } => {
                referenced.extend(targets.iter().copied());
            }
            _ => {}
        }
    }
    body.retain(|inst| match inst {
        Inst::Mlabel(l) => referenced.contains(l),
        _ => true,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ltl::{BBlock, Callee};
    use crate::ir::types::Signature;
    use charcoal_entity::PrimaryMap;
    use smallvec::smallvec;

    fn base_func(blocks: Vec<BBlock>) -> ltl::Function {
        ltl::Function {
            sig: Signature::void(),
            entry: Node::from_u32(0),
            code: blocks.into_iter().collect::<PrimaryMap<Node, BBlock>>(),
            stackdata: 0,
            locals_size: 0,
            outgoing_size: 0,
            used_callee_saved: vec![],
            has_calls: false,
        }
    }

    #[test]
    fn frameless_leaf() {
        let func = base_func(vec![BBlock {
            body: vec![ltl::Inst::Lreturn],
        }]);
        let mach = transl_function(func);
        assert_eq!(mach.stacksize, 0);
        assert!(mach.is_leaf);
        assert_eq!(mach.body, vec![Inst::Mreturn]);
    }

    #[test]
    fn frame_size_is_16_byte_aligned() {
        let mut func = base_func(vec![BBlock {
            body: vec![
                ltl::Inst::Lcall {
                    sig: Signature::void(),
                    callee: Callee::Symbol(crate::symbols::symbol("g")),
                },
                ltl::Inst::Lreturn,
            ],
        }]);
        func.has_calls = true;
        func.stackdata = 12;
        func.locals_size = 8;
        let mach = transl_function(func);
        assert!(mach.stacksize >= 16);
        assert_eq!(mach.stacksize % 16, 0);
    }

    #[test]
    fn callee_saves_bracket_the_body() {
        let mut func = base_func(vec![BBlock {
            body: vec![
                ltl::Inst::Lcall {
                    sig: Signature::void(),
                    callee: Callee::Symbol(crate::symbols::symbol("g")),
                },
                ltl::Inst::Lreturn,
            ],
        }]);
        func.has_calls = true;
        func.used_callee_saved = vec![Mreg::X19, Mreg::X20];
        let mach = transl_function(func);
        // First two instructions store x19 and x20.
        assert!(matches!(
            mach.body[0],
            Inst::Msetstack {
                src: Mreg::X19,
                ..
            }
        ));
        assert!(matches!(
            mach.body[1],
            Inst::Msetstack {
                src: Mreg::X20,
                ..
            }
        ));
        // The restores appear in reverse order right before the return.
        let ret_at = mach
            .body
            .iter()
            .position(|i| matches!(i, Inst::Mreturn))
            .unwrap();
        assert!(matches!(
            mach.body[ret_at - 1],
            Inst::Mgetstack {
                dest: Mreg::X19,
                ..
            }
        ));
        assert!(matches!(
            mach.body[ret_at - 2],
            Inst::Mgetstack {
                dest: Mreg::X20,
                ..
            }
        ));
    }

    #[test]
    fn tail_call_restores_before_jump() {
        let mut func = base_func(vec![BBlock {
            body: vec![ltl::Inst::Ltailcall {
                sig: Signature::void(),
                callee: Callee::Symbol(crate::symbols::symbol("g")),
            }],
        }]);
        func.has_calls = true;
        func.used_callee_saved = vec![Mreg::X19];
        let mach = transl_function(func);
        let tail_at = mach
            .body
            .iter()
            .position(|i| matches!(i, Inst::Mtailcall { .. }))
            .unwrap();
        assert!(
            matches!(mach.body[tail_at - 1], Inst::Mgetstack { dest: Mreg::X19, .. }),
            "callee-saved restore must precede the tail call"
        );
    }

    #[test]
    fn ainstack_is_rebased_past_outgoing() {
        let mut func = base_func(vec![BBlock {
            body: vec![
                ltl::Inst::Lload {
                    chunk: crate::ir::types::Chunk::Int32,
                    mode: Addressing::Ainstack(4),
                    args: smallvec![],
                    dest: Mreg::X0,
                },
                ltl::Inst::Lreturn,
            ],
        }]);
        func.has_calls = true;
        func.outgoing_size = 16;
        func.stackdata = 8;
        let mach = transl_function(func);
        assert!(mach
            .body
            .iter()
            .any(|i| matches!(i, Inst::Mload { mode: Addressing::Ainstack(20), .. })));
    }

    #[test]
    fn fallthrough_needs_no_goto() {
        // 0 -> 1 in order: no Mgoto, and no labels survive (nothing
        // branches).
        let func = base_func(vec![
            BBlock {
                body: vec![ltl::Inst::Lbranch(Node::from_u32(1))],
            },
            BBlock {
                body: vec![ltl::Inst::Lreturn],
            },
        ]);
        let mach = transl_function(func);
        assert_eq!(mach.body, vec![Inst::Mreturn]);
    }
}
