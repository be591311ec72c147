//! The LTL intermediate representation.
//!
//! The output of register allocation: the same control-flow graph as RTL,
//! but grouped into basic blocks whose instructions reference machine
//! registers and stack slots instead of pseudo-registers. Operation
//! operands are always machine registers; stack slots appear only in the
//! dedicated `Lgetstack`/`Lsetstack` moves that the allocator inserted for
//! spilled values and argument traffic.
//!
//! Calls carry no explicit operand list: by construction the preceding
//! moves have placed the arguments in their calling-convention locations.

use crate::ir::op::{Addressing, Condition, Operation};
use crate::ir::rtl::Node;
use crate::ir::types::{Builtin, Chunk, Signature, Slot, Type};
use crate::ir::DataItem;
use crate::isa::arm64::Mreg;
use crate::symbols::Symbol;
use charcoal_entity::PrimaryMap;
use core::fmt;
use smallvec::SmallVec;

/// Operand lists over machine registers.
pub type MregList = SmallVec<[Mreg; 4]>;

/// A location: either a machine register or a stack slot.
///
/// This is the codomain of the allocator's assignment of pseudo-registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Loc {
    /// A machine register.
    R(Mreg),
    /// A stack slot.
    S(Slot),
}

impl Loc {
    /// The type of the value stored at this location.
    pub fn ty(self, reg_ty: Type) -> Type {
        match self {
            Loc::R(_) => reg_ty,
            Loc::S(slot) => slot.ty,
        }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Loc::R(r) => write!(f, "{}", r),
            Loc::S(s) => write!(f, "{}", s),
        }
    }
}

/// The callee of a call or tail call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Callee {
    /// Direct call to a known symbol.
    Symbol(Symbol),
    /// Indirect call through a register.
    Reg(Mreg),
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Callee::Symbol(s) => write!(f, "\"{}\"", s),
            Callee::Reg(r) => write!(f, "{}", r),
        }
    }
}

/// One LTL instruction. The last instruction of a basic block is always
/// one of the control-flow forms.
#[derive(Clone, Debug, PartialEq)]
pub enum Inst {
    /// `dest = op(args)`.
    Lop {
        /// The operation.
        op: Operation,
        /// Argument registers.
        args: MregList,
        /// Result register.
        dest: Mreg,
    },
    /// `dest = chunk[mode(args)]`.
    Lload {
        /// Access width and signedness.
        chunk: Chunk,
        /// Addressing mode.
        mode: Addressing,
        /// Address registers.
        args: MregList,
        /// Result register.
        dest: Mreg,
    },
    /// Load from a stack slot.
    Lgetstack {
        /// The slot.
        slot: Slot,
        /// Result register.
        dest: Mreg,
    },
    /// Store to a stack slot.
    Lsetstack {
        /// Stored register.
        src: Mreg,
        /// The slot.
        slot: Slot,
    },
    /// `chunk[mode(args)] = src`.
    Lstore {
        /// Access width and signedness.
        chunk: Chunk,
        /// Addressing mode.
        mode: Addressing,
        /// Address registers.
        args: MregList,
        /// Stored register.
        src: Mreg,
    },
    /// Call; arguments are in convention locations.
    Lcall {
        /// Callee signature.
        sig: Signature,
        /// Callee.
        callee: Callee,
    },
    /// Builtin invocation; arguments are in convention locations.
    Lbuiltin {
        /// Which builtin.
        builtin: Builtin,
    },
    /// Unconditional branch.
    Lbranch(Node),
    /// Two-way branch.
    Lcond {
        /// The condition.
        cond: Condition,
        /// Condition arguments.
        args: MregList,
        /// Taken when the condition holds.
        ifso: Node,
        /// Taken otherwise.
        ifnot: Node,
    },
    /// Indexed jump.
    Ljumptable {
        /// Index register.
        arg: Mreg,
        /// One node per table entry.
        targets: Vec<Node>,
    },
    /// Return; the result, if any, is already in its convention register.
    Lreturn,
    /// Tail call; arguments are in convention locations.
    Ltailcall {
        /// Callee signature.
        sig: Signature,
        /// Callee.
        callee: Callee,
    },
}

impl Inst {
    /// Is this instruction a block terminator?
    pub fn is_terminator(&self) -> bool {
        match self {
            Inst::Lbranch(_)
            | Inst::Lcond { .. }
            | Inst::Ljumptable { .. }
            | Inst::Lreturn
            | Inst::Ltailcall { .. } => true,
            _ => false,
        }
    }

    /// The successor nodes of a terminator; empty for straight-line
    /// instructions, `Lreturn` and `Ltailcall`.
    pub fn successors(&self) -> SmallVec<[Node; 2]> {
        match self {
            Inst::Lbranch(n) => SmallVec::from_slice(&[*n]),
            Inst::Lcond { ifso, ifnot, .. } => SmallVec::from_slice(&[*ifso, *ifnot]),
            Inst::Ljumptable { targets, .. } => targets.iter().copied().collect(),
            _ => SmallVec::new(),
        }
    }
}

/// A basic block: straight-line instructions ending in a terminator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BBlock {
    /// The instructions.
    pub body: Vec<Inst>,
}

/// An LTL function, with the frame regions the stacking pass will place.
#[derive(Clone, Debug)]
pub struct Function {
    /// Machine-level signature.
    pub sig: Signature,
    /// The entry block.
    pub entry: Node,
    /// The blocks, still keyed by the RTL node ids.
    pub code: PrimaryMap<Node, BBlock>,
    /// Bytes of stack data (former address-taken locals).
    pub stackdata: i64,
    /// Bytes of spill slots (`SlotKind::Local`).
    pub locals_size: i64,
    /// Bytes of the outgoing-argument area (`SlotKind::Outgoing`).
    pub outgoing_size: i64,
    /// Callee-saved registers the allocator actually used, in save order.
    pub used_callee_saved: Vec<Mreg>,
    /// Whether the function contains any call, tail call or builtin.
    pub has_calls: bool,
}

/// A complete LTL program.
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
            Inst::Lop { op, args, dest } => {
                write!(f, "{} = ", dest)?;
                crate::ir::op::print_operation(f, op, args)
            }
            Inst::Lload {
                chunk,
                mode,
                args,
                dest,
            } => {
                write!(f, "{} = {}[", dest, chunk)?;
                crate::ir::op::print_addressing(f, mode, args)?;
                write!(f, "]")
            }
            Inst::Lgetstack { slot, dest } => write!(f, "{} = {}", dest, slot),
            Inst::Lsetstack { src, slot } => write!(f, "{} = {}", slot, src),
            Inst::Lstore {
                chunk,
                mode,
                args,
                src,
            } => {
                write!(f, "{}[", chunk)?;
                crate::ir::op::print_addressing(f, mode, args)?;
                write!(f, "] = {}", src)
            }
            Inst::Lcall { sig, callee } => write!(f, "call {} {}", callee, sig),
            Inst::Lbuiltin { builtin } => write!(f, "builtin {}", builtin),
            Inst::Lbranch(n) => write!(f, "goto {}", n),
            Inst::Lcond {
                cond,
                args,
                ifso,
                ifnot,
            } => {
                write!(f, "if (")?;
                crate::ir::op::print_condition(f, cond, args)?;
                write!(f, ") -> {} else {}", ifso, ifnot)
            }
            Inst::Ljumptable { arg, targets } => {
                write!(f, "jumptable {} [", arg)?;
                for (i, t) in targets.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, "]")
            }
            Inst::Lreturn => write!(f, "return"),
            Inst::Ltailcall { sig, callee } => write!(f, "tailcall {} {}", callee, sig),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.sig.ret {
            None => writeln!(f, "(): void"),
            Some(ty) => writeln!(f, "(): {}", ty),
        }?;
        writeln!(f, "{{")?;
        writeln!(
            f,
            "  frame: data {}, locals {}, outgoing {};",
            self.stackdata, self.locals_size, self.outgoing_size
        )?;
        if !self.used_callee_saved.is_empty() {
            write!(f, "  saved:")?;
            for r in &self.used_callee_saved {
                write!(f, " {}", r)?;
            }
            writeln!(f, ";")?;
        }
        writeln!(f, "  entry {};", self.entry)?;
        for (node, block) in self.code.iter() {
            writeln!(f, "  {}:", node)?;
            for inst in &block.body {
                writeln!(f, "    {}", inst)?;
            }
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
    use crate::ir::types::SlotKind;
    use smallvec::smallvec;

    #[test]
    fn terminators() {
        assert!(Inst::Lreturn.is_terminator());
        assert!(Inst::Lbranch(Node::from_u32(0)).is_terminator());
        let op = Inst::Lop {
            op: Operation::Omove,
            args: smallvec![Mreg::X1],
            dest: Mreg::X0,
        };
        assert!(!op.is_terminator());
        assert!(op.successors().is_empty());
    }

    #[test]
    fn display() {
        let i = Inst::Lgetstack {
            slot: Slot::new(SlotKind::Local, 8, Type::I64),
            dest: Mreg::X9,
        };
        assert_eq!(i.to_string(), "x9 = S(local, 8, long)");
        let i = Inst::Lop {
            op: Operation::Oaddimm(1),
            args: smallvec![Mreg::X2],
            dest: Mreg::X1,
        };
        assert_eq!(i.to_string(), "x1 = x2 + 1");
    }
}
