//! The Csharpminor intermediate representation.
//!
//! C types are gone. Expressions are untyped machine computations; memory
//! is accessed through explicitly chunked loads and stores; operators carry
//! their own typing (`Oadd` vs `Oaddl` vs `Oaddf`). Variables come in three
//! forms: `Evar` denotes the address of a stack-resident named local,
//! `Eaddrof` the address of a global, and `Etempvar` reads a numbered
//! temporary. Loops have been lowered to `Sblock`/`Sloop`/`Sexit` with
//! de Bruijn exit depths; `switch` still carries labelled fall-through
//! arms.

use crate::ir::data::DataItem;
use crate::ir::ops::{Binop, Const, Unop};
use crate::ir::types::{Builtin, Chunk, Signature, Temp, Type};
use crate::symbols::Symbol;
use core::fmt;

/// A Csharpminor expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// A constant.
    Econst(Const),
    /// The address of the stack-resident local `sym`.
    Evar(Symbol),
    /// The address of the global `sym`.
    Eaddrof(Symbol),
    /// The value of a temporary.
    Etempvar(Temp),
    /// Unary operation.
    Eunop(Unop, Box<Expr>),
    /// Binary operation.
    Ebinop(Binop, Box<Expr>, Box<Expr>),
    /// Chunked load from the address computed by the sub-expression.
    Eload(Chunk, Box<Expr>),
}

/// One arm of a `switch`: `None` labels `default`; arms fall through.
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchCase {
    /// Case value, or `None` for `default`.
    pub value: Option<i64>,
    /// The arm's body.
    pub body: Stmt,
}

/// A Csharpminor statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// Do nothing.
    Sskip,
    /// Assign to a temporary.
    Sset(Temp, Expr),
    /// Chunked store: `chunk[addr] = value`.
    Sstore(Chunk, Expr, Expr),
    /// Call through a function address.
    Scall(Option<Temp>, Signature, Expr, Vec<Expr>),
    /// Builtin invocation.
    Sbuiltin(Option<Temp>, Builtin, Vec<Expr>),
    /// Sequencing.
    Sseq(Box<Stmt>, Box<Stmt>),
    /// Conditional on a nonzero 32-bit integer.
    Sifthenelse(Expr, Box<Stmt>, Box<Stmt>),
    /// Infinite loop.
    Sloop(Box<Stmt>),
    /// An exit target: `Sexit` jumps past the end of an enclosing block.
    Sblock(Box<Stmt>),
    /// Jump past the `n`-th enclosing block, 0 being the nearest. The
    /// selected arm of a `switch` counts as one enclosing block.
    Sexit(u32),
    /// C `switch` with fall-through arms. The flag selects 64-bit
    /// comparison of the scrutinee.
    Sswitch(bool, Expr, Vec<SwitchCase>),
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

/// A stack-resident local variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Var {
    /// Name.
    pub name: Symbol,
    /// Size in bytes.
    pub size: i64,
    /// Required alignment in bytes.
    pub align: i64,
}

/// A Csharpminor function.
#[derive(Clone, Debug)]
pub struct Function {
    /// Machine-level signature.
    pub sig: Signature,
    /// Temporaries receiving the parameters, in order.
    pub params: Vec<Temp>,
    /// Stack-resident locals.
    pub vars: Vec<Var>,
    /// All temporaries with their machine types, indexed by [`Temp`].
    pub temps: Vec<(Temp, Type)>,
    /// The body.
    pub body: Stmt,
}

impl Function {
    /// Allocate a fresh temporary of type `ty`.
    pub fn new_temp(&mut self, ty: Type) -> Temp {
        let t = Temp::from_u32(self.temps.len() as u32);
        self.temps.push((t, ty));
        t
    }

    /// The machine type of temporary `t`.
    pub fn temp_type(&self, t: Temp) -> Type {
        self.temps[t.as_u32() as usize].1
    }
}

/// A complete Csharpminor program.
#[derive(Clone, Debug, Default)]
pub struct Program {
    /// Lowered global variables, in declaration order (hoisted string
    /// literals last).
    pub globals: Vec<(Symbol, DataItem)>,
    /// Function definitions.
    pub functions: Vec<(Symbol, Function)>,
    /// External functions with their signatures.
    pub externals: Vec<(Symbol, Signature)>,
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Econst(c) => write!(f, "{}", c),
            Expr::Evar(x) => write!(f, "&{}", x),
            Expr::Eaddrof(g) => write!(f, "&\"{}\"", g),
            Expr::Etempvar(t) => write!(f, "{}", t),
            Expr::Eunop(op, a) => write!(f, "{}({})", op, a),
            Expr::Ebinop(op, a, b) => write!(f, "({} {} {})", a, op, b),
            Expr::Eload(chunk, addr) => write!(f, "{}[{}]", chunk, addr),
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
        for v in &self.vars {
            writeln!(f, "  var {}[{}, align {}];", v.name, v.size, v.align)?;
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
        Stmt::Sstore(chunk, addr, val) => {
            pad(f)?;
            writeln!(f, "{}[{}] = {};", chunk, addr, val)
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
        Stmt::Sswitch(is_long, e, cases) => {
            pad(f)?;
            writeln!(f, "{} ({}) {{", if *is_long { "switchl" } else { "switch" }, e)?;
            for case in cases {
                pad(f)?;
                match case.value {
                    Some(v) => writeln!(f, "case {}:", v)?,
                    None => writeln!(f, "default:")?,
                }
                write_stmt(f, &case.body, indent + 2)?;
            }
            pad(f)?;
            writeln!(f, "}}")
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
    use crate::ir::types::Comparison;
    use crate::symbols::symbol;

    #[test]
    fn seq_drops_skips() {
        let s = Stmt::seq(Stmt::Sskip, Stmt::Sexit(0));
        assert_eq!(s, Stmt::Sexit(0));
        let s = Stmt::seq(Stmt::Sexit(1), Stmt::Sskip);
        assert_eq!(s, Stmt::Sexit(1));
    }

    #[test]
    fn expr_display() {
        let e = Expr::Ebinop(
            Binop::Ocmpu(Comparison::Lt),
            Box::new(Expr::Etempvar(Temp::from_u32(1))),
            Box::new(Expr::Econst(Const::Ointconst(10))),
        );
        assert_eq!(e.to_string(), "($1 <u 10)");
        let l = Expr::Eload(Chunk::Int32, Box::new(Expr::Evar(symbol("x"))));
        assert_eq!(l.to_string(), "int32[&x]");
    }
}
