//! The Cminor intermediate representation.
//!
//! Compared to Csharpminor, named variables are gone: the function reserves
//! `stackspace` bytes of its activation record for what used to be
//! address-taken locals, and addresses are computed from the
//! `Oaddrstack`/`Oaddrsymbol` constants. Switches have been lowered to a
//! dense jump table mapping zero-based scrutinee values to exit depths (the
//! other two dispatch strategies became plain conditionals during
//! lowering).

use crate::ir::data::DataItem;
use crate::ir::ops::{Binop, Const, Unop};
use crate::ir::types::{Builtin, Chunk, Signature, Temp, Type};
use crate::symbols::Symbol;
use core::fmt;

/// A Cminor expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// A constant, including symbol and stack addresses.
    Econst(Const),
    /// The value of a temporary.
    Etempvar(Temp),
    /// Unary operation.
    Eunop(Unop, Box<Expr>),
    /// Binary operation.
    Ebinop(Binop, Box<Expr>, Box<Expr>),
    /// Chunked load.
    Eload(Chunk, Box<Expr>),
}

/// A Cminor statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// Do nothing.
    Sskip,
    /// Assign to a temporary.
    Sset(Temp, Expr),
    /// Chunked store.
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
    /// An exit target.
    Sblock(Box<Stmt>),
    /// Jump past the `n`-th enclosing block.
    Sexit(u32),
    /// Dense jump table: `targets[v]` is the exit depth taken when the
    /// (already normalised) scrutinee equals `v`; out-of-range values take
    /// `default`. The flag selects 64-bit comparison.
    Sswitch {
        /// Compare as 64-bit.
        is_long: bool,
        /// The normalised scrutinee.
        scrutinee: Expr,
        /// Exit depth for each in-range value.
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

/// A Cminor function.
#[derive(Clone, Debug)]
pub struct Function {
    /// Machine-level signature.
    pub sig: Signature,
    /// Temporaries receiving the parameters, in order.
    pub params: Vec<Temp>,
    /// Bytes of activation record reserved for former address-taken
    /// locals. Always a multiple of 8.
    pub stackspace: i64,
    /// All temporaries with their machine types.
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

/// A complete Cminor program.
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
            Expr::Econst(c) => write!(f, "{}", c),
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
    use crate::ir::ops::Const;
    use crate::symbols::symbol;

    #[test]
    fn function_header_format() {
        let mut func = Function {
            sig: Signature {
                params: vec![Type::I32],
                ret: Some(Type::I32),
                variadic: false,
            },
            params: vec![],
            stackspace: 16,
            temps: vec![],
            body: Stmt::Sreturn(Some(Expr::Econst(Const::Ointconst(0)))),
        };
        let p = func.new_temp(Type::I32);
        func.params.push(p);
        let text = format!("\"f\"{}", func);
        assert!(text.starts_with("\"f\"($0: int): int\n"));
        assert!(text.contains("stack 16;"));
        assert!(text.contains("return 0;"));
    }

    #[test]
    fn addr_const_display() {
        let e = Expr::Econst(Const::Oaddrsymbol(symbol("g"), 4));
        assert_eq!(e.to_string(), "\"g\" + 4");
        let e = Expr::Econst(Const::Oaddrstack(8));
        assert_eq!(e.to_string(), "&stack[8]");
    }
}
