//! The Clight intermediate representation.
//!
//! Clight is the typed, C-level entry point of the pipeline. Expressions
//! are pure (the front-end has already pulled assignments, calls and
//! short-circuit operators out into statements), carry their C type, and
//! still distinguish l-values from r-values. Statements keep C's structured
//! control flow, including `break`/`continue` and fall-through `switch`.

use crate::ir::types::{Builtin, Chunk, Signature, Temp, Type};
use crate::symbols::Symbol;
use core::fmt;
use std::collections::BTreeMap;

/// Signedness of an integer type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signedness {
    /// Signed.
    Signed,
    /// Unsigned.
    Unsigned,
}

/// Width of a C integer type below `long`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntSize {
    /// `char`.
    I8,
    /// `short`.
    I16,
    /// `int`.
    I32,
}

/// A C type.
#[derive(Clone, Debug, PartialEq)]
pub enum CType {
    /// `void`.
    Void,
    /// Integer types up to 32 bits.
    Int(IntSize, Signedness),
    /// 64-bit `long` (and `long long`).
    Long(Signedness),
    /// `float`.
    Float,
    /// `double`.
    Double,
    /// A pointer.
    Pointer(Box<CType>),
    /// An array with a known element count.
    Array(Box<CType>, i64),
    /// A function type.
    Function(Box<FunType>),
    /// A struct referenced by tag; the layout lives in the program's
    /// [`StructTable`].
    Struct(Symbol),
}

/// Parameter and return types of a function.
#[derive(Clone, Debug, PartialEq)]
pub struct FunType {
    /// Declared parameter types.
    pub params: Vec<CType>,
    /// Return type; `CType::Void` for none.
    pub ret: CType,
    /// Whether the function is variadic.
    pub variadic: bool,
}

impl CType {
    /// Size of a value of this type in bytes.
    ///
    /// Function types have no size; they only occur behind pointers.
    pub fn sizeof(&self, structs: &StructTable) -> i64 {
        match self {
            CType::Void => 1,
            CType::Int(IntSize::I8, _) => 1,
            CType::Int(IntSize::I16, _) => 2,
            CType::Int(IntSize::I32, _) => 4,
            CType::Long(_) => 8,
            CType::Float => 4,
            CType::Double => 8,
            CType::Pointer(_) => 8,
            CType::Array(elem, n) => elem.sizeof(structs) * (*n).max(0),
            CType::Function(_) => 8,
            CType::Struct(tag) => structs.sizeof(*tag),
        }
    }

    /// Natural alignment of this type in bytes.
    pub fn alignof(&self, structs: &StructTable) -> i64 {
        match self {
            CType::Void => 1,
            CType::Int(IntSize::I8, _) => 1,
            CType::Int(IntSize::I16, _) => 2,
            CType::Int(IntSize::I32, _) => 4,
            CType::Long(_) => 8,
            CType::Float => 4,
            CType::Double => 8,
            CType::Pointer(_) | CType::Function(_) => 8,
            CType::Array(elem, _) => elem.alignof(structs),
            CType::Struct(tag) => structs.alignof(*tag),
        }
    }

    /// Is this any integer type (including pointers' favourite, `long`)?
    pub fn is_integer(&self) -> bool {
        match self {
            CType::Int(..) | CType::Long(_) => true,
            _ => false,
        }
    }

    /// Is this a pointer type?
    pub fn is_pointer(&self) -> bool {
        match self {
            CType::Pointer(_) => true,
            _ => false,
        }
    }

    /// Is this a float type?
    pub fn is_float(&self) -> bool {
        match self {
            CType::Float | CType::Double => true,
            _ => false,
        }
    }

    /// Is this a scalar type: integer, float or pointer?
    pub fn is_scalar(&self) -> bool {
        self.is_integer() || self.is_float() || self.is_pointer()
    }

    /// Is this an aggregate: array or struct?
    pub fn is_aggregate(&self) -> bool {
        match self {
            CType::Array(..) | CType::Struct(_) => true,
            _ => false,
        }
    }

    /// Signedness, if this is an integer type.
    pub fn signedness(&self) -> Option<Signedness> {
        match self {
            CType::Int(_, s) | CType::Long(s) => Some(*s),
            _ => None,
        }
    }

    /// The machine type a scalar value of this type is held in.
    pub fn machine_type(&self) -> Option<Type> {
        match self {
            CType::Int(..) => Some(Type::I32),
            CType::Long(_) | CType::Pointer(_) | CType::Function(_) => Some(Type::I64),
            CType::Float => Some(Type::F32),
            CType::Double => Some(Type::F64),
            CType::Void | CType::Array(..) | CType::Struct(_) => None,
        }
    }

    /// The memory chunk a scalar value of this type is accessed with.
    pub fn access_chunk(&self) -> Option<Chunk> {
        match self {
            CType::Int(IntSize::I8, Signedness::Signed) => Some(Chunk::Int8Signed),
            CType::Int(IntSize::I8, Signedness::Unsigned) => Some(Chunk::Int8Unsigned),
            CType::Int(IntSize::I16, Signedness::Signed) => Some(Chunk::Int16Signed),
            CType::Int(IntSize::I16, Signedness::Unsigned) => Some(Chunk::Int16Unsigned),
            CType::Int(IntSize::I32, _) => Some(Chunk::Int32),
            CType::Long(_) | CType::Pointer(_) | CType::Function(_) => Some(Chunk::Int64),
            CType::Float => Some(Chunk::Float32),
            CType::Double => Some(Chunk::Float64),
            CType::Void | CType::Array(..) | CType::Struct(_) => None,
        }
    }
}

impl FunType {
    /// The machine-level signature of this function type.
    ///
    /// Returns `None` when a parameter or the return type is not scalar
    /// (struct-valued parameters and returns are unsupported and rejected
    /// by the front-end).
    pub fn signature(&self) -> Option<Signature> {
        let mut params = Vec::with_capacity(self.params.len());
        for p in &self.params {
            params.push(p.machine_type()?);
        }
        let ret = match &self.ret {
            CType::Void => None,
            ty => Some(ty.machine_type()?),
        };
        Some(Signature {
            params,
            ret,
            variadic: self.variadic,
        })
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CType::Void => write!(f, "void"),
            CType::Int(IntSize::I8, Signedness::Signed) => write!(f, "signed char"),
            CType::Int(IntSize::I8, Signedness::Unsigned) => write!(f, "unsigned char"),
            CType::Int(IntSize::I16, Signedness::Signed) => write!(f, "short"),
            CType::Int(IntSize::I16, Signedness::Unsigned) => write!(f, "unsigned short"),
            CType::Int(IntSize::I32, Signedness::Signed) => write!(f, "int"),
            CType::Int(IntSize::I32, Signedness::Unsigned) => write!(f, "unsigned int"),
            CType::Long(Signedness::Signed) => write!(f, "long"),
            CType::Long(Signedness::Unsigned) => write!(f, "unsigned long"),
            CType::Float => write!(f, "float"),
            CType::Double => write!(f, "double"),
            CType::Pointer(inner) => write!(f, "{}*", inner),
            CType::Array(inner, n) => write!(f, "{}[{}]", inner, n),
            CType::Function(ft) => {
                write!(f, "{}(", ft.ret)?;
                for (i, p) in ft.params.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                if ft.variadic {
                    if !ft.params.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "...")?;
                }
                write!(f, ")")
            }
            CType::Struct(tag) => write!(f, "struct {}", tag),
        }
    }
}

/// The struct definitions of a program, keyed by tag.
#[derive(Clone, Debug, Default)]
pub struct StructTable {
    defs: BTreeMap<Symbol, Vec<(Symbol, CType)>>,
}

impl StructTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Default::default()
    }

    /// Define `tag` with the given fields, replacing any previous
    /// definition.
    pub fn define(&mut self, tag: Symbol, fields: Vec<(Symbol, CType)>) {
        self.defs.insert(tag, fields);
    }

    /// Is `tag` defined?
    pub fn is_defined(&self, tag: Symbol) -> bool {
        self.defs.contains_key(&tag)
    }

    /// The fields of `tag`, in declaration order.
    pub fn fields(&self, tag: Symbol) -> &[(Symbol, CType)] {
        self.defs
            .get(&tag)
            .map(|v| v.as_slice())
            .unwrap_or_else(|| panic!("undefined struct `{}`", tag))
    }

    /// Alignment of `struct tag`: the maximum of its field alignments.
    pub fn alignof(&self, tag: Symbol) -> i64 {
        self.fields(tag)
            .iter()
            .map(|(_, ty)| ty.alignof(self))
            .max()
            .unwrap_or(1)
    }

    /// Size of `struct tag`, padded to its own alignment.
    pub fn sizeof(&self, tag: Symbol) -> i64 {
        let mut ofs = 0;
        for (_, ty) in self.fields(tag) {
            ofs = align_up(ofs, ty.alignof(self));
            ofs += ty.sizeof(self);
        }
        align_up(ofs, self.alignof(tag))
    }

    /// Byte offset and type of field `name` in `struct tag`.
    pub fn field_offset(&self, tag: Symbol, name: Symbol) -> Option<(i64, &CType)> {
        let mut ofs = 0;
        for (fname, ty) in self.fields(tag) {
            ofs = align_up(ofs, ty.alignof(self));
            if *fname == name {
                return Some((ofs, ty));
            }
            ofs += ty.sizeof(self);
        }
        None
    }

    /// Iterate over all defined tags in tag order.
    pub fn tags(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.defs.keys().copied()
    }
}

/// Round `n` up to the next multiple of `align` (a power of two).
pub fn align_up(n: i64, align: i64) -> i64 {
    debug_assert!(align > 0 && (align & (align - 1)) == 0);
    (n + align - 1) & !(align - 1)
}

/// A C-level unary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Bitwise complement.
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "~",
        })
    }
}

/// A C-level binary operator.
///
/// Logical `&&`/`||` do not appear: the front-end lowers them into control
/// flow or pure bitwise form before Clight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinaryOp {
    /// Is this one of the six comparison operators?
    pub fn is_comparison(self) -> bool {
        use BinaryOp::*;
        match self {
            Eq | Ne | Lt | Gt | Le | Ge => true,
            _ => false,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use BinaryOp::*;
        f.write_str(match *self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Mod => "%",
            And => "&",
            Or => "|",
            Xor => "^",
            Shl => "<<",
            Shr => ">>",
            Eq => "==",
            Ne => "!=",
            Lt => "<",
            Gt => ">",
            Le => "<=",
            Ge => ">=",
        })
    }
}

/// A Clight expression. Every node carries its C type.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// 32-bit integer literal.
    EconstInt(i32, CType),
    /// 64-bit integer literal.
    EconstLong(i64, CType),
    /// `double` literal.
    EconstFloat(f64, CType),
    /// `float` literal.
    EconstSingle(f32, CType),
    /// String literal; the bytes exclude the implicit NUL.
    EconstStr(Vec<u8>, CType),
    /// A named variable (l-value).
    Evar(Symbol, CType),
    /// A numbered temporary (r-value).
    Etempvar(Temp, CType),
    /// Pointer dereference (l-value).
    Ederef(Box<Expr>, CType),
    /// Address of an l-value.
    Eaddrof(Box<Expr>, CType),
    /// Unary arithmetic.
    Eunop(UnaryOp, Box<Expr>, CType),
    /// Binary arithmetic or comparison.
    Ebinop(BinaryOp, Box<Expr>, Box<Expr>, CType),
    /// Type conversion.
    Ecast(Box<Expr>, CType),
    /// Struct field access (l-value when the base is one).
    Efield(Box<Expr>, Symbol, CType),
    /// `sizeof(t)`; carries the queried type and the (unsigned) result
    /// type.
    Esizeof(CType, CType),
    /// `_Alignof(t)`; same conventions as `Esizeof`.
    Ealignof(CType, CType),
}

impl Expr {
    /// The C type of this expression.
    pub fn ty(&self) -> &CType {
        match self {
            Expr::EconstInt(_, t)
            | Expr::EconstLong(_, t)
            | Expr::EconstFloat(_, t)
            | Expr::EconstSingle(_, t)
            | Expr::EconstStr(_, t)
            | Expr::Evar(_, t)
            | Expr::Etempvar(_, t)
            | Expr::Ederef(_, t)
            | Expr::Eaddrof(_, t)
            | Expr::Eunop(_, _, t)
            | Expr::Ebinop(_, _, _, t)
            | Expr::Ecast(_, t)
            | Expr::Efield(_, _, t)
            | Expr::Esizeof(_, t)
            | Expr::Ealignof(_, t) => t,
        }
    }

    /// Is this expression an l-value form?
    pub fn is_lvalue(&self) -> bool {
        match self {
            Expr::Evar(..) | Expr::Ederef(..) | Expr::Efield(..) => true,
            _ => false,
        }
    }
}

/// One arm of a `switch`: `None` labels `default`.
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchCase {
    /// Case value, or `None` for `default`.
    pub value: Option<i64>,
    /// The arm's body. Control falls through to the next arm.
    pub body: Stmt,
}

/// A Clight statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// Do nothing.
    Sskip,
    /// Store an r-value into an l-value.
    Sassign(Expr, Expr),
    /// Assign an r-value to a temporary.
    Sset(Temp, Expr),
    /// Call, optionally binding the result to a temporary.
    Scall(Option<Temp>, Expr, Vec<Expr>),
    /// Builtin invocation; arguments are addresses/values as the builtin
    /// requires.
    Sbuiltin(Option<Temp>, Builtin, Vec<Expr>),
    /// Sequencing.
    Ssequence(Box<Stmt>, Box<Stmt>),
    /// Conditional.
    Sifthenelse(Expr, Box<Stmt>, Box<Stmt>),
    /// Infinite loop. The second statement is the `continue` target,
    /// executed after the body on every iteration.
    Sloop(Box<Stmt>, Box<Stmt>),
    /// Leave the innermost enclosing loop or switch.
    Sbreak,
    /// Skip to the continue statement of the innermost enclosing loop.
    Scontinue,
    /// Return, optionally with a value.
    Sreturn(Option<Expr>),
    /// C `switch` with fall-through arms.
    Sswitch(Expr, Vec<SwitchCase>),
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
            (a, b) => Stmt::Ssequence(Box::new(a), Box::new(b)),
        }
    }
}

/// A Clight function definition.
#[derive(Clone, Debug)]
pub struct Function {
    /// Return type.
    pub ret: CType,
    /// Parameters, in declaration order.
    pub params: Vec<(Symbol, CType)>,
    /// Temporaries holding promoted parameters, parallel to `params`.
    /// Empty until `simpl_locals` has run.
    pub param_temps: Vec<Temp>,
    /// Named local variables. After `simpl_locals` these are exactly the
    /// locals whose address is taken (plus aggregates).
    pub vars: Vec<(Symbol, CType)>,
    /// Temporaries with their types, indexed by [`Temp`].
    pub temps: Vec<(Temp, CType)>,
    /// Whether the function is variadic.
    pub variadic: bool,
    /// The body.
    pub body: Stmt,
}

impl Function {
    /// Allocate a fresh temporary of type `ty`.
    pub fn new_temp(&mut self, ty: CType) -> Temp {
        let t = Temp::from_u32(self.temps.len() as u32);
        self.temps.push((t, ty));
        t
    }

    /// The C type of temporary `t`.
    pub fn temp_type(&self, t: Temp) -> &CType {
        &self.temps[t.as_u32() as usize].1
    }

    /// The machine-level signature of this function.
    pub fn signature(&self) -> Option<Signature> {
        FunType {
            params: self.params.iter().map(|(_, t)| t.clone()).collect(),
            ret: self.ret.clone(),
            variadic: self.variadic,
        }
        .signature()
    }
}

/// A global variable before type erasure.
#[derive(Clone, Debug)]
pub struct GlobVar {
    /// Declared type.
    pub ty: CType,
    /// Initial bytes; `None` means zero-initialised.
    pub init: Option<Vec<u8>>,
    /// `const`-qualified.
    pub readonly: bool,
}

/// A complete Clight program.
#[derive(Clone, Debug, Default)]
pub struct Program {
    /// Struct layouts.
    pub structs: StructTable,
    /// Global variables in declaration order.
    pub globals: Vec<(Symbol, GlobVar)>,
    /// Function definitions in declaration order.
    pub functions: Vec<(Symbol, Function)>,
    /// Declared-but-undefined functions (externals), with their types.
    pub externals: Vec<(Symbol, FunType)>,
}

mod printer {
    //! The Clight reference printer: C-like syntax, temporaries as `$N`.

    use super::*;

    pub(super) fn write_expr(f: &mut fmt::Formatter, e: &Expr) -> fmt::Result {
        match e {
            Expr::EconstInt(n, _) => write!(f, "{}", n),
            Expr::EconstLong(n, _) => write!(f, "{}L", n),
            Expr::EconstFloat(x, _) => write!(f, "{:?}", x),
            Expr::EconstSingle(x, _) => write!(f, "{:?}f", x),
            Expr::EconstStr(bytes, _) => {
                write!(f, "\"")?;
                for &b in bytes {
                    match b {
                        b'"' => write!(f, "\\\"")?,
                        b'\\' => write!(f, "\\\\")?,
                        b'\n' => write!(f, "\\n")?,
                        b'\t' => write!(f, "\\t")?,
                        0x20..=0x7e => write!(f, "{}", b as char)?,
                        _ => write!(f, "\\{:03o}", b)?,
                    }
                }
                write!(f, "\"")
            }
            Expr::Evar(x, _) => write!(f, "{}", x),
            Expr::Etempvar(t, _) => write!(f, "{}", t),
            Expr::Ederef(a, _) => {
                write!(f, "*")?;
                write_atom(f, a)
            }
            Expr::Eaddrof(a, _) => {
                write!(f, "&")?;
                write_atom(f, a)
            }
            Expr::Eunop(op, a, _) => {
                write!(f, "{}", op)?;
                write_atom(f, a)
            }
            Expr::Ebinop(op, a, b, _) => {
                write_atom(f, a)?;
                write!(f, " {} ", op)?;
                write_atom(f, b)
            }
            Expr::Ecast(a, t) => {
                write!(f, "({}) ", t)?;
                write_atom(f, a)
            }
            Expr::Efield(a, name, _) => {
                write_atom(f, a)?;
                write!(f, ".{}", name)
            }
            Expr::Esizeof(t, _) => write!(f, "sizeof({})", t),
            Expr::Ealignof(t, _) => write!(f, "_Alignof({})", t),
        }
    }

    fn write_atom(f: &mut fmt::Formatter, e: &Expr) -> fmt::Result {
        match e {
            Expr::Ebinop(..) | Expr::Ecast(..) | Expr::Eunop(..) => {
                write!(f, "(")?;
                write_expr(f, e)?;
                write!(f, ")")
            }
            _ => write_expr(f, e),
        }
    }

    pub(super) fn write_stmt(
        f: &mut fmt::Formatter,
        s: &Stmt,
        indent: usize,
    ) -> fmt::Result {
        let pad = |f: &mut fmt::Formatter| write!(f, "{:1$}", "", indent);
        match s {
            Stmt::Sskip => {
                pad(f)?;
                writeln!(f, "/*skip*/;")
            }
            Stmt::Sassign(lhs, rhs) => {
                pad(f)?;
                write_expr(f, lhs)?;
                write!(f, " = ")?;
                write_expr(f, rhs)?;
                writeln!(f, ";")
            }
            Stmt::Sset(t, rhs) => {
                pad(f)?;
                write!(f, "{} = ", t)?;
                write_expr(f, rhs)?;
                writeln!(f, ";")
            }
            Stmt::Scall(dest, callee, args) => {
                pad(f)?;
                if let Some(t) = dest {
                    write!(f, "{} = ", t)?;
                }
                write_atom(f, callee)?;
                write!(f, "(")?;
                for (i, a) in args.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write_expr(f, a)?;
                }
                writeln!(f, ");")
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
                    write_expr(f, a)?;
                }
                writeln!(f, ");")
            }
            Stmt::Ssequence(a, b) => {
                write_stmt(f, a, indent)?;
                write_stmt(f, b, indent)
            }
            Stmt::Sifthenelse(c, a, b) => {
                pad(f)?;
                write!(f, "if (")?;
                write_expr(f, c)?;
                writeln!(f, ") {{")?;
                write_stmt(f, a, indent + 2)?;
                pad(f)?;
                writeln!(f, "}} else {{")?;
                write_stmt(f, b, indent + 2)?;
                pad(f)?;
                writeln!(f, "}}")
            }
            Stmt::Sloop(body, cont) => {
                pad(f)?;
                writeln!(f, "loop {{")?;
                write_stmt(f, body, indent + 2)?;
                pad(f)?;
                writeln!(f, "}} continue: {{")?;
                write_stmt(f, cont, indent + 2)?;
                pad(f)?;
                writeln!(f, "}}")
            }
            Stmt::Sbreak => {
                pad(f)?;
                writeln!(f, "break;")
            }
            Stmt::Scontinue => {
                pad(f)?;
                writeln!(f, "continue;")
            }
            Stmt::Sreturn(None) => {
                pad(f)?;
                writeln!(f, "return;")
            }
            Stmt::Sreturn(Some(e)) => {
                pad(f)?;
                write!(f, "return ")?;
                write_expr(f, e)?;
                writeln!(f, ";")
            }
            Stmt::Sswitch(e, cases) => {
                pad(f)?;
                write!(f, "switch (")?;
                write_expr(f, e)?;
                writeln!(f, ") {{")?;
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
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        printer::write_expr(f, self)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (i, (name, ty)) in self.params.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", ty, name)?;
        }
        writeln!(f, ")")?;
        writeln!(f, "{{")?;
        for (name, ty) in &self.vars {
            writeln!(f, "  {} {};", ty, name)?;
        }
        for (t, ty) in &self.temps {
            writeln!(f, "  register {} {};", ty, t)?;
        }
        printer::write_stmt(f, &self.body, 2)?;
        writeln!(f, "}}")
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for tag in self.structs.tags() {
            writeln!(f, "struct {} {{", tag)?;
            for (name, ty) in self.structs.fields(tag) {
                writeln!(f, "  {} {};", ty, name)?;
            }
            writeln!(f, "}};")?;
        }
        for (name, g) in &self.globals {
            if g.readonly {
                write!(f, "const ")?;
            }
            match &g.init {
                None => writeln!(f, "{} {};", g.ty, name)?,
                Some(bytes) => writeln!(f, "{} {} = /* {} bytes */;", g.ty, name, bytes.len())?,
            }
        }
        for (name, ext) in &self.externals {
            writeln!(f, "extern {} {}(...); /* {:?} args */", ext.ret, name, ext.params.len())?;
        }
        for (name, func) in &self.functions {
            write!(f, "{} {}", func.ret, name)?;
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::symbol;

    fn int() -> CType {
        CType::Int(IntSize::I32, Signedness::Signed)
    }

    #[test]
    fn sizes_and_alignment() {
        let structs = StructTable::new();
        assert_eq!(int().sizeof(&structs), 4);
        assert_eq!(CType::Pointer(Box::new(int())).sizeof(&structs), 8);
        assert_eq!(CType::Array(Box::new(int()), 3).sizeof(&structs), 12);
        assert_eq!(CType::Array(Box::new(int()), 3).alignof(&structs), 4);
    }

    #[test]
    fn struct_layout() {
        let mut structs = StructTable::new();
        let s = symbol("s");
        structs.define(
            s,
            vec![
                (symbol("a"), CType::Int(IntSize::I8, Signedness::Signed)),
                (symbol("b"), int()),
                (symbol("c"), CType::Long(Signedness::Signed)),
            ],
        );
        assert_eq!(structs.alignof(s), 8);
        assert_eq!(structs.field_offset(s, symbol("a")).unwrap().0, 0);
        assert_eq!(structs.field_offset(s, symbol("b")).unwrap().0, 4);
        assert_eq!(structs.field_offset(s, symbol("c")).unwrap().0, 8);
        assert_eq!(structs.sizeof(s), 16);
        assert!(structs.field_offset(s, symbol("nope")).is_none());
    }

    #[test]
    fn expr_types() {
        let e = Expr::Ebinop(
            BinaryOp::Add,
            Box::new(Expr::EconstInt(1, int())),
            Box::new(Expr::EconstInt(2, int())),
            int(),
        );
        assert_eq!(*e.ty(), int());
        assert!(!e.is_lvalue());
        assert!(Expr::Evar(symbol("x"), int()).is_lvalue());
    }

    #[test]
    fn signature_rejects_aggregates() {
        let ft = FunType {
            params: vec![CType::Struct(symbol("s"))],
            ret: CType::Void,
            variadic: false,
        };
        assert!(ft.signature().is_none());

        let ft = FunType {
            params: vec![int()],
            ret: int(),
            variadic: false,
        };
        let sig = ft.signature().unwrap();
        assert_eq!(sig.params, vec![Type::I32]);
        assert_eq!(sig.ret, Some(Type::I32));
    }
}
