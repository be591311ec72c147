//! The CminorSel intermediate representation.
//!
//! The output of instruction selection. Expressions are trees of machine
//! [`Operation`]s; memory accesses carry an [`Addressing`] mode and the
//! mode's register arguments; conditions are a little language of their own
//! ([`CondExpr`]) whose leaves are flat machine conditions and whose
//! interior nodes encode short-circuit combination. `Elet`/`Eletvar`
//! introduce de Bruijn-indexed bindings so the selector can share operand
//! values without inventing temporaries.

use crate::ir::data::DataItem;
use crate::ir::op::{Addressing, Condition, Operation};
use crate::ir::types::{Builtin, Chunk, Signature, Temp, Type};
use crate::symbols::Symbol;
use core::fmt;

/// A CminorSel expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// The value of a temporary.
    Evar(Temp),
    /// A machine operation applied to argument expressions.
    Eop(Operation, Vec<Expr>),
    /// Chunked load through an addressing mode.
    Eload(Chunk, Addressing, Vec<Expr>),
    /// Value of one of two branches selected by a condition.
    Econdition(Box<CondExpr>, Box<Expr>, Box<Expr>),
    /// Bind the first expression's value; `Eletvar(0)` references it in
    /// the second.
    Elet(Box<Expr>, Box<Expr>),
    /// Reference to the `n`-th enclosing `Elet` binding, 0 the nearest.
    Eletvar(u32),
}

/// A condition expression.
#[derive(Clone, Debug, PartialEq)]
pub enum CondExpr {
    /// Always true.
    CondTrue,
    /// Always false.
    CondFalse,
    /// A flat machine condition applied to argument expressions.
    CondCmp(Condition, Vec<Expr>),
    /// Negation.
    CondNot(Box<CondExpr>),
    /// Both conditions hold.
    CondAnd(Box<CondExpr>, Box<CondExpr>),
    /// At least one condition holds.
    CondOr(Box<CondExpr>, Box<CondExpr>),
}

/// A CminorSel statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// Do nothing.
    Sskip,
    /// Assign to a temporary.
    Sset(Temp, Expr),
    /// Chunked store through an addressing mode; the last field is the
    /// stored value.
    Sstore(Chunk, Addressing, Vec<Expr>, Expr),
    /// Call; the callee is an address expression (RTLgen recognises
    /// `Eop(Oaddrsymbol, [])` as a direct call).
    Scall(Option<Temp>, Signature, Expr, Vec<Expr>),
    /// Builtin invocation.
    Sbuiltin(Option<Temp>, Builtin, Vec<Expr>),
    /// Sequencing.
    Sseq(Box<Stmt>, Box<Stmt>),
    /// Conditional.
    Sifthenelse(CondExpr, Box<Stmt>, Box<Stmt>),
    /// Infinite loop.
    Sloop(Box<Stmt>),
    /// An exit target.
    Sblock(Box<Stmt>),
    /// Jump past the `n`-th enclosing block.
    Sexit(u32),
    /// Dense jump table over the normalised scrutinee.
    Sswitch {
        /// Compare as 64-bit.
        is_long: bool,
        /// The normalised scrutinee.
        scrutinee: Expr,
        /// Exit depth per in-range value.
        targets: Vec<u32>,
        /// Exit depth for out-of-range values.
        default: u32,
    },
    /// Return, optionally with a value.
    Sreturn(Option<Expr>),
    /// A labelled statement.
    Slabel(Symbol, Box<Stmt>),
    /// Jump to a label in the same function.
    Sgoto(Symbol),
}

impl Stmt {
    /// Sequence two statements, dropping skips.
    pub fn seq(a: Stmt, b: Stmt) -> Stmt {
        match (a, b) {
            (Stmt::Sskip, b) => b,
            (a, Stmt::Sskip) => a,
            (a, b) => Stmt::Sseq(Box::new(a), Box::new(b)),
        }
    }
}

/// A CminorSel function.
#[derive(Clone, Debug)]
pub struct Function {
    /// Machine-level signature.
    pub sig: Signature,
    /// Temporaries receiving the parameters, in order.
    pub params: Vec<Temp>,
    /// Stack data bytes (unchanged from Cminor).
    pub stackspace: i64,
    /// All temporaries with their machine types.
    pub temps: Vec<(Temp, Type)>,
    /// The body.
    pub body: Stmt,
}

impl Function {
    /// The machine type of temporary `t`.
    pub fn temp_type(&self, t: Temp) -> Type {
        self.temps[t.as_u32() as usize].1
    }
}

/// A complete CminorSel program.
#[derive(Clone, Debug, Default)]
pub struct Program {
    /// Global data items.
    pub globals: Vec<(Symbol, DataItem)>,
    /// Function definitions.
    pub functions: Vec<(Symbol, Function)>,
    /// External functions with their signatures.
    pub externals: Vec<(Symbol, Signature)>,
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Evar(t) => write!(f, "{}", t),
            Expr::Eop(op, args) => {
                write!(f, "(")?;
                crate::ir::op::print_operation(f, op, args)?;
                write!(f, ")")
            }
            Expr::Eload(chunk, mode, args) => {
                write!(f, "{}[", chunk)?;
                crate::ir::op::print_addressing(f, mode, args)?;
                write!(f, "]")
            }
            Expr::Econdition(c, a, b) => write!(f, "({} ? {} : {})", c, a, b),
            Expr::Elet(bound, body) => write!(f, "(let {} in {})", bound, body),
            Expr::Eletvar(n) => write!(f, "let#{}", n),
        }
    }
}

impl fmt::Display for CondExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CondExpr::CondTrue => write!(f, "true"),
            CondExpr::CondFalse => write!(f, "false"),
            CondExpr::CondCmp(cond, args) => {
                crate::ir::op::print_condition(f, cond, args)
            }
            CondExpr::CondNot(c) => write!(f, "not ({})", c),
            CondExpr::CondAnd(a, b) => write!(f, "({}) and ({})", a, b),
            CondExpr::CondOr(a, b) => write!(f, "({}) or ({})", a, b),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (i, t) in self.params.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", t, self.temp_type(*t))?;
        }
        match self.sig.ret {
            None => writeln!(f, "): void"),
            Some(ty) => writeln!(f, "): {}", ty),
        }?;
        writeln!(f, "{{")?;
        if self.stackspace > 0 {
            writeln!(f, "  stack {};", self.stackspace)?;
        }
        write_stmt(f, &self.body, 2)?;
        writeln!(f, "}}")
    }
}

fn write_stmt(f: &mut fmt::Formatter, s: &Stmt, indent: usize) -> fmt::Result {
    let pad = |f: &mut fmt::Formatter| write!(f, "{:1$}", "", indent);
    match s {
        Stmt::Sskip => {
            pad(f)?;
            writeln!(f, "skip;")
        }
        Stmt::Sset(t, e) => {
            pad(f)?;
            writeln!(f, "{} = {};", t, e)
        }
        Stmt::Sstore(chunk, mode, args, val) => {
            pad(f)?;
            write!(f, "{}[", chunk)?;
            crate::ir::op::print_addressing(f, mode, args)?;
            writeln!(f, "] = {};", val)
        }
        Stmt::Scall(dest, sig, callee, args) => {
            pad(f)?;
            if let Some(t) = dest {
                write!(f, "{} = ", t)?;
            }
            write!(f, "{}(", callee)?;
            for (i, a) in args.iter().enumerate() {
                if i != 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", a)?;
            }
            writeln!(f, ") {};", sig)
        }
        Stmt::Sbuiltin(dest, b, args) => {
            pad(f)?;
            if let Some(t) = dest {
                write!(f, "{} = ", t)?;
            }
            write!(f, "{}(", b)?;
            for (i, a) in args.iter().enumerate() {
                if i != 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", a)?;
            }
            writeln!(f, ");")
        }
        Stmt::Sseq(a, b) => {
            write_stmt(f, a, indent)?;
            write_stmt(f, b, indent)
        }
        Stmt::Sifthenelse(c, a, b) => {
            pad(f)?;
            writeln!(f, "if ({}) {{", c)?;
            write_stmt(f, a, indent + 2)?;
            pad(f)?;
            writeln!(f, "}} else {{")?;
            write_stmt(f, b, indent + 2)?;
            pad(f)?;
            writeln!(f, "}}")
        }
        Stmt::Sloop(body) => {
            pad(f)?;
            writeln!(f, "loop {{")?;
            write_stmt(f, body, indent + 2)?;
            pad(f)?;
            writeln!(f, "}}")
        }
        Stmt::Sblock(body) => {
            pad(f)?;
            writeln!(f, "block {{")?;
            write_stmt(f, body, indent + 2)?;
            pad(f)?;
            writeln!(f, "}}")
        }
        Stmt::Sexit(n) => {
            pad(f)?;
            writeln!(f, "exit {};", n)
        }
        Stmt::Sswitch {
            is_long,
            scrutinee,
            targets,
            default,
        } => {
            pad(f)?;
            write!(
                f,
                "{} ({}) [",
                if *is_long { "switchl" } else { "switch" },
                scrutinee
            )?;
            for (i, t) in targets.iter().enumerate() {
                if i != 0 {
                    write!(f, ", ")?;
                }
                write!(f, "exit {}", t)?;
            }
            writeln!(f, "] default exit {};", default)
        }
        Stmt::Sreturn(None) => {
            pad(f)?;
            writeln!(f, "return;")
        }
        Stmt::Sreturn(Some(e)) => {
            pad(f)?;
            writeln!(f, "return {};", e)
        }
        Stmt::Slabel(l, s) => {
            writeln!(f, "{}:", l)?;
            write_stmt(f, s, indent)
        }
        Stmt::Sgoto(l) => {
            pad(f)?;
            writeln!(f, "goto {};", l)
        }
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
    use crate::ir::op::ShiftOp;
    use crate::ir::types::Comparison;

    #[test]
    fn expr_display() {
        let e = Expr::Eop(
            Operation::Oaddshift(ShiftOp::Lsl, 2),
            vec![
                Expr::Evar(Temp::from_u32(1)),
                Expr::Evar(Temp::from_u32(2)),
            ],
        );
        assert_eq!(e.to_string(), "($1 + ($2 lsl 2))");
    }

    #[test]
    fn load_display() {
        let e = Expr::Eload(
            Chunk::Int32,
            Addressing::Aindexed(8),
            vec![Expr::Evar(Temp::from_u32(3))],
        );
        assert_eq!(e.to_string(), "int32[$3 + 8]");
    }

    #[test]
    fn condexpr_display() {
        let c = CondExpr::CondAnd(
            Box::new(CondExpr::CondCmp(
                Condition::Ccompimm(Comparison::Lt, 10),
                vec![Expr::Evar(Temp::from_u32(0))],
            )),
            Box::new(CondExpr::CondTrue),
        );
        assert_eq!(c.to_string(), "($0 < 10) and (true)");
    }
}
