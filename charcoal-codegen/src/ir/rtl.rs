//! The RTL intermediate representation.
//!
//! A function is a control-flow graph: a table of numbered nodes, each
//! holding exactly one three-address instruction and the node(s) control
//! flows to next. Operands are unlimited pseudo-registers. The graph is an
//! arena keyed by [`Node`] ids, so loop back-edges cost nothing and no
//! cyclic ownership arises.
//!
//! Well-formedness invariants:
//! * every successor mentioned by an instruction is present in the code
//!   table;
//! * every pseudo-register is either a parameter or has defining
//!   instructions, and its type is recorded in `reg_types`;
//! * the entry node is present, and every path from it reaches `Ireturn`
//!   or `Itailcall`.

use crate::ir::op::{Addressing, Condition, Operation};
use crate::ir::types::{Builtin, Chunk, Signature, Type};
use crate::ir::DataItem;
use crate::symbols::Symbol;
use charcoal_entity::{entity_impl, PrimaryMap};
use core::fmt;
use smallvec::SmallVec;

/// A node of the control-flow graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node(u32);
entity_impl!(Node, "n");

/// An unlimited pseudo-register.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(u32);
entity_impl!(Reg, "r");

/// A spill slot introduced by the register allocator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpillSlot(u32);
entity_impl!(SpillSlot, "spill");

/// Short operand lists. Three is the largest operation arity (`madd`).
pub type RegList = SmallVec<[Reg; 4]>;

/// The callee of a call or tail call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Callee {
    /// Direct call to a known symbol.
    Symbol(Symbol),
    /// Indirect call through a register holding the function address.
    Reg(Reg),
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Callee::Symbol(s) => write!(f, "\"{}\"", s),
            Callee::Reg(r) => write!(f, "{}", r),
        }
    }
}

/// One RTL instruction, including its successor node(s).
#[derive(Clone, Debug, PartialEq)]
pub enum Inst {
    /// No operation; transfer to `succ`.
    Inop {
        /// Next node.
        succ: Node,
    },
    /// `dest = op(args)`.
    Iop {
        /// The operation.
        op: Operation,
        /// Argument registers.
        args: RegList,
        /// Result register.
        dest: Reg,
        /// Next node.
        succ: Node,
    },
    /// `dest = chunk[mode(args)]`.
    Iload {
        /// Access width and signedness.
        chunk: Chunk,
        /// Addressing mode.
        mode: Addressing,
        /// Address registers.
        args: RegList,
        /// Result register.
        dest: Reg,
        /// Next node.
        succ: Node,
    },
    /// `chunk[mode(args)] = src`.
    Istore {
        /// Access width and signedness.
        chunk: Chunk,
        /// Addressing mode.
        mode: Addressing,
        /// Address registers.
        args: RegList,
        /// Stored register.
        src: Reg,
        /// Next node.
        succ: Node,
    },
    /// Call; `dest` receives the result when the signature has one.
    Icall {
        /// Callee signature.
        sig: Signature,
        /// Callee.
        callee: Callee,
        /// Argument registers.
        args: Vec<Reg>,
        /// Result register.
        dest: Option<Reg>,
        /// Next node.
        succ: Node,
    },
    /// Tail call: the activation record is dead and the callee returns
    /// directly to our caller.
    Itailcall {
        /// Callee signature.
        sig: Signature,
        /// Callee.
        callee: Callee,
        /// Argument registers.
        args: Vec<Reg>,
    },
    /// Builtin invocation.
    Ibuiltin {
        /// Which builtin.
        builtin: Builtin,
        /// Argument registers.
        args: Vec<Reg>,
        /// Result register, if the builtin produces a value.
        dest: Option<Reg>,
        /// Next node.
        succ: Node,
    },
    /// Two-way branch on a machine condition.
    Icond {
        /// The condition.
        cond: Condition,
        /// Condition arguments.
        args: RegList,
        /// Taken when the condition holds.
        ifso: Node,
        /// Taken otherwise.
        ifnot: Node,
    },
    /// Indexed jump: `targets[arg]`, undefined out of range (the producer
    /// emits the bounds check).
    Ijumptable {
        /// Index register.
        arg: Reg,
        /// One node per table entry.
        targets: Vec<Node>,
    },
    /// Return, optionally with a value.
    Ireturn(Option<Reg>),
    /// Reload a spilled value: `dest = slot`.
    Igetstack {
        /// The spill slot.
        slot: SpillSlot,
        /// Result register.
        dest: Reg,
        /// Next node.
        succ: Node,
    },
    /// Save a value to its spill slot: `slot = src`.
    Isetstack {
        /// Stored register.
        src: Reg,
        /// The spill slot.
        slot: SpillSlot,
        /// Next node.
        succ: Node,
    },
}

impl Inst {
    /// The successor nodes of this instruction, in branch order.
    pub fn successors(&self) -> SmallVec<[Node; 2]> {
        match self {
            Inst::Inop { succ }
            | Inst::Iop { succ, .. }
            | Inst::Iload { succ, .. }
            | Inst::Istore { succ, .. }
            | Inst::Icall { succ, .. }
            | Inst::Ibuiltin { succ, .. }
            | Inst::Igetstack { succ, .. }
            | Inst::Isetstack { succ, .. } => SmallVec::from_slice(&[*succ]),
            Inst::Icond { ifso, ifnot, .. } => SmallVec::from_slice(&[*ifso, *ifnot]),
            Inst::Ijumptable { targets, .. } => targets.iter().copied().collect(),
            Inst::Itailcall { .. } | Inst::Ireturn(_) => SmallVec::new(),
        }
    }

    /// The registers this instruction reads.
    pub fn uses(&self) -> SmallVec<[Reg; 4]> {
        let mut out = SmallVec::new();
        match self {
            Inst::Inop { .. } | Inst::Igetstack { .. } => {}
            Inst::Iop { args, .. } => out.extend(args.iter().copied()),
            Inst::Iload { args, .. } => out.extend(args.iter().copied()),
            Inst::Istore { args, src, .. } => {
                out.extend(args.iter().copied());
                out.push(*src);
            }
            Inst::Icall { callee, args, .. } | Inst::Itailcall { callee, args, .. } => {
                out.extend(args.iter().copied());
                if let Callee::Reg(r) = callee {
                    out.push(*r);
                }
            }
            Inst::Ibuiltin { args, .. } => out.extend(args.iter().copied()),
            Inst::Icond { args, .. } => out.extend(args.iter().copied()),
            Inst::Ijumptable { arg, .. } => out.push(*arg),
            Inst::Ireturn(Some(r)) => out.push(*r),
            Inst::Ireturn(None) => {}
            Inst::Isetstack { src, .. } => out.push(*src),
        }
        out
    }

    /// The register this instruction defines, if any.
    pub fn def(&self) -> Option<Reg> {
        match self {
            Inst::Iop { dest, .. }
            | Inst::Iload { dest, .. }
            | Inst::Igetstack { dest, .. } => Some(*dest),
            Inst::Icall { dest, .. } | Inst::Ibuiltin { dest, .. } => *dest,
            _ => None,
        }
    }

    /// Is this `dest = move(src)`? Returns the pair when it is.
    pub fn as_move(&self) -> Option<(Reg, Reg)> {
        match self {
            Inst::Iop { op, args, dest, .. } if op.is_move() => Some((*dest, args[0])),
            _ => None,
        }
    }
}

/// An RTL function.
#[derive(Clone, Debug)]
pub struct Function {
    /// Machine-level signature.
    pub sig: Signature,
    /// Parameter registers, in order.
    pub params: Vec<Reg>,
    /// Stack data bytes for former address-taken locals.
    pub stacksize: i64,
    /// The instruction graph.
    pub code: PrimaryMap<Node, Inst>,
    /// The entry node.
    pub entry: Node,
    /// Type of every pseudo-register; also the register allocator.
    pub reg_types: PrimaryMap<Reg, Type>,
    /// Spill slots, present only between allocation rounds.
    pub spill_slots: PrimaryMap<SpillSlot, Type>,
}

impl Function {
    /// Allocate a fresh pseudo-register of type `ty`.
    pub fn new_reg(&mut self, ty: Type) -> Reg {
        self.reg_types.push(ty)
    }

    /// The type of register `r`.
    pub fn reg_type(&self, r: Reg) -> Type {
        self.reg_types[r]
    }

    /// Append an instruction, returning its node.
    pub fn add_instr(&mut self, inst: Inst) -> Node {
        self.code.push(inst)
    }
}

/// A complete RTL program.
#[derive(Clone, Debug, Default)]
pub struct Program {
    /// Global data items.
    pub globals: Vec<(Symbol, DataItem)>,
    /// Function definitions.
    pub functions: Vec<(Symbol, Function)>,
    /// External functions with their signatures.
    pub externals: Vec<(Symbol, Signature)>,
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Inst::Inop { succ } => write!(f, "nop -> {}", succ),
            Inst::Iop {
                op,
                args,
                dest,
                succ,
            } => {
                write!(f, "{} = ", dest)?;
                crate::ir::op::print_operation(f, op, args)?;
                write!(f, " -> {}", succ)
            }
            Inst::Iload {
                chunk,
                mode,
                args,
                dest,
                succ,
            } => {
                write!(f, "{} = {}[", dest, chunk)?;
                crate::ir::op::print_addressing(f, mode, args)?;
                write!(f, "] -> {}", succ)
            }
            Inst::Istore {
                chunk,
                mode,
                args,
                src,
                succ,
            } => {
                write!(f, "{}[", chunk)?;
                crate::ir::op::print_addressing(f, mode, args)?;
                write!(f, "] = {} -> {}", src, succ)
            }
            Inst::Icall {
                sig,
                callee,
                args,
                dest,
                succ,
            } => {
                if let Some(d) = dest {
                    write!(f, "{} = ", d)?;
                }
                write!(f, "call {}(", callee)?;
                for (i, a) in args.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ") {} -> {}", sig, succ)
            }
            Inst::Itailcall { sig, callee, args } => {
                write!(f, "tailcall {}(", callee)?;
                for (i, a) in args.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ") {}", sig)
            }
            Inst::Ibuiltin {
                builtin,
                args,
                dest,
                succ,
            } => {
                if let Some(d) = dest {
                    write!(f, "{} = ", d)?;
                }
                write!(f, "{}(", builtin)?;
                for (i, a) in args.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ") -> {}", succ)
            }
            Inst::Icond {
                cond,
                args,
                ifso,
                ifnot,
            } => {
                write!(f, "if (")?;
                crate::ir::op::print_condition(f, cond, args)?;
                write!(f, ") -> {} else {}", ifso, ifnot)
            }
            Inst::Ijumptable { arg, targets } => {
                write!(f, "jumptable {} [", arg)?;
                for (i, t) in targets.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, "]")
            }
            Inst::Ireturn(None) => write!(f, "return"),
            Inst::Ireturn(Some(r)) => write!(f, "return {}", r),
            Inst::Igetstack { slot, dest, succ } => {
                write!(f, "{} = {} -> {}", dest, slot, succ)
            }
            Inst::Isetstack { src, slot, succ } => {
                write!(f, "{} = {} -> {}", slot, src, succ)
            }
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (i, r) in self.params.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", r, self.reg_type(*r))?;
        }
        match self.sig.ret {
            None => writeln!(f, "): void"),
            Some(ty) => writeln!(f, "): {}", ty),
        }?;
        writeln!(f, "{{")?;
        if self.stacksize > 0 {
            writeln!(f, "  stack {};", self.stacksize)?;
        }
        writeln!(f, "  entry {};", self.entry)?;
        for (node, inst) in self.code.iter() {
            writeln!(f, "  {}: {}", node, inst)?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (name, g) in &self.globals {
            let kind = if g.readonly { "readonly " } else { "" };
            writeln!(f, "{}var \"{}\"[{}, align {}]", kind, name, g.size, g.align)?;
        }
        for (name, sig) in &self.externals {
            writeln!(f, "extern \"{}\"{}", name, sig)?;
        }
        for (name, func) in &self.functions {
            write!(f, "\"{}\"{}", name, func)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::Comparison;
    use smallvec::smallvec;

    fn empty_function() -> Function {
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
    fn uses_and_defs() {
        let mut func = empty_function();
        let a = func.new_reg(Type::I32);
        let b = func.new_reg(Type::I32);
        let d = func.new_reg(Type::I32);
        let ret = func.add_instr(Inst::Ireturn(Some(d)));
        let op = Inst::Iop {
            op: Operation::Oadd,
            args: smallvec![a, b],
            dest: d,
            succ: ret,
        };
        assert_eq!(op.def(), Some(d));
        assert_eq!(op.uses().as_slice(), &[a, b]);
        assert_eq!(op.successors().as_slice(), &[ret]);
        assert_eq!(Inst::Ireturn(Some(d)).uses().as_slice(), &[d]);
        assert!(Inst::Ireturn(None).successors().is_empty());
    }

    #[test]
    fn move_detection() {
        let mut func = empty_function();
        let a = func.new_reg(Type::I64);
        let d = func.new_reg(Type::I64);
        let succ = func.add_instr(Inst::Ireturn(None));
        let mv = Inst::Iop {
            op: Operation::Omove,
            args: smallvec![a],
            dest: d,
            succ,
        };
        assert_eq!(mv.as_move(), Some((d, a)));
        let not_mv = Inst::Iop {
            op: Operation::Oneg,
            args: smallvec![a],
            dest: d,
            succ,
        };
        assert_eq!(not_mv.as_move(), None);
    }

    #[test]
    fn cond_display() {
        let mut func = empty_function();
        let a = func.new_reg(Type::I32);
        let t = func.add_instr(Inst::Ireturn(None));
        let e = func.add_instr(Inst::Ireturn(None));
        let inst = Inst::Icond {
            cond: Condition::Ccompimm(Comparison::Lt, 10),
            args: smallvec![a],
            ifso: t,
            ifnot: e,
        };
        assert_eq!(inst.to_string(), "if (r0 < 10) -> n0 else n1");
    }
}
