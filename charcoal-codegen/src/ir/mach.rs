//! The Mach intermediate representation.
//!
//! The final IR: a flat list of near-assembly instructions with labels and
//! gotos instead of a graph, and an explicit activation record. Stack-slot
//! references have been replaced by loads and stores at concrete offsets:
//! `Mgetstack`/`Msetstack` address the current frame from SP,
//! `Mgetparam` addresses the caller's outgoing area through FP. The
//! function records its total frame size and the callee-saved registers it
//! uses; the emitter materialises the SP/FP adjustment from those.

use crate::ir::ltl::Callee;
use crate::ir::op::{Addressing, Condition, Operation};
use crate::ir::types::{Builtin, Chunk, Signature, Type};
use crate::ir::DataItem;
use crate::isa::arm64::Mreg;
use crate::symbols::Symbol;
use charcoal_entity::entity_impl;
use core::fmt;
use smallvec::SmallVec;

/// A code label.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);
entity_impl!(Label, "L");

/// Operand lists over machine registers.
pub type MregList = SmallVec<[Mreg; 4]>;

/// One Mach instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum Inst {
    /// Load from the current frame: `dest = ty[sp + ofs]`.
    Mgetstack {
        /// Byte offset from SP.
        ofs: i64,
        /// Value type.
        ty: Type,
        /// Result register.
        dest: Mreg,
    },
    /// Store to the current frame: `ty[sp + ofs] = src`.
    Msetstack {
        /// Stored register.
        src: Mreg,
        /// Byte offset from SP.
        ofs: i64,
        /// Value type.
        ty: Type,
    },
    /// Load an incoming overflow argument: `dest = ty[fp + 16 + ofs]`.
    Mgetparam {
        /// Byte offset into the incoming-argument area.
        ofs: i64,
        /// Value type.
        ty: Type,
        /// Result register.
        dest: Mreg,
    },
    /// `dest = op(args)`.
    Mop {
        /// The operation.
        op: Operation,
        /// Argument registers.
        args: MregList,
        /// Result register.
        dest: Mreg,
    },
    /// `dest = chunk[mode(args)]`.
    Mload {
        /// Access width and signedness.
        chunk: Chunk,
        /// Addressing mode.
        mode: Addressing,
        /// Address registers.
        args: MregList,
        /// Result register.
        dest: Mreg,
    },
    /// `chunk[mode(args)] = src`.
    Mstore {
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
    Mcall {
        /// Callee signature.
        sig: Signature,
        /// Callee.
        callee: Callee,
    },
    /// Tail call. Callee-saved restores precede this instruction; the
    /// emitter adds the SP adjustment before the branch.
    Mtailcall {
        /// Callee signature.
        sig: Signature,
        /// Callee.
        callee: Callee,
    },
    /// Builtin invocation; arguments are in convention locations.
    Mbuiltin {
        /// Which builtin.
        builtin: Builtin,
    },
    /// A label.
    Mlabel(Label),
    /// Unconditional jump.
    Mgoto(Label),
    /// Conditional jump; falls through when the condition does not hold.
    Mcond {
        /// The condition.
        cond: Condition,
        /// Condition arguments.
        args: MregList,
        /// Taken when the condition holds.
        target: Label,
    },
    /// Indexed jump through a table of labels.
    Mjumptable {
        /// Index register.
        arg: Mreg,
        /// One label per table entry.
        targets: Vec<Label>,
    },
    /// Return. Callee-saved restores precede this instruction; the
    /// emitter adds the epilogue.
    Mreturn,
}

/// A Mach function.
#[derive(Clone, Debug)]
pub struct Function {
    /// Machine-level signature.
    pub sig: Signature,
    /// The instructions.
    pub body: Vec<Inst>,
    /// Total frame size in bytes, 16-byte aligned. Zero for frameless leaf
    /// functions.
    pub stacksize: i64,
    /// Callee-saved registers used, in save order.
    pub saved_regs: Vec<Mreg>,
    /// Whether the function makes no calls (and may go frameless).
    pub is_leaf: bool,
}

/// A complete Mach program.
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
            Inst::Mgetstack { ofs, ty, dest } => {
                write!(f, "{} = {}[sp + {}]", dest, ty, ofs)
            }
            Inst::Msetstack { src, ofs, ty } => {
                write!(f, "{}[sp + {}] = {}", ty, ofs, src)
            }
            Inst::Mgetparam { ofs, ty, dest } => {
                write!(f, "{} = {}[param {}]", dest, ty, ofs)
            }
            Inst::Mop { op, args, dest } => {
                write!(f, "{} = ", dest)?;
                crate::ir::op::print_operation(f, op, args)
            }
            Inst::Mload {
                chunk,
                mode,
                args,
                dest,
            } => {
                write!(f, "{} = {}[", dest, chunk)?;
                crate::ir::op::print_addressing(f, mode, args)?;
                write!(f, "]")
            }
            Inst::Mstore {
                chunk,
                mode,
                args,
                src,
            } => {
                write!(f, "{}[", chunk)?;
                crate::ir::op::print_addressing(f, mode, args)?;
                write!(f, "] = {}", src)
            }
            Inst::Mcall { sig, callee } => write!(f, "call {} {}", callee, sig),
            Inst::Mtailcall { sig, callee } => write!(f, "tailcall {} {}", callee, sig),
            Inst::Mbuiltin { builtin } => write!(f, "builtin {}", builtin),
            Inst::Mlabel(l) => write!(f, "{}:", l),
            Inst::Mgoto(l) => write!(f, "goto {}", l),
            Inst::Mcond { cond, args, target } => {
                write!(f, "if (")?;
                crate::ir::op::print_condition(f, cond, args)?;
                write!(f, ") goto {}", target)
            }
            Inst::Mjumptable { arg, targets } => {
                write!(f, "jumptable {} [", arg)?;
                for (i, t) in targets.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, "]")
            }
            Inst::Mreturn => write!(f, "return"),
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
        writeln!(f, "  stacksize {};", self.stacksize)?;
        if !self.saved_regs.is_empty() {
            write!(f, "  saved:")?;
            for r in &self.saved_regs {
                write!(f, " {}", r)?;
            }
            writeln!(f, ";")?;
        }
        for inst in &self.body {
            match inst {
                Inst::Mlabel(_) => writeln!(f, "  {}", inst)?,
                _ => writeln!(f, "    {}", inst)?,
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
    use smallvec::smallvec;

    #[test]
    fn display() {
        let i = Inst::Mgetstack {
            ofs: 24,
            ty: Type::I64,
            dest: Mreg::X19,
        };
        assert_eq!(i.to_string(), "x19 = long[sp + 24]");
        let i = Inst::Mop {
            op: Operation::Ointconst(42),
            args: smallvec![],
            dest: Mreg::X0,
        };
        assert_eq!(i.to_string(), "x0 = 42");
        assert_eq!(Inst::Mlabel(Label::from_u32(3)).to_string(), "L3:");
    }
}
