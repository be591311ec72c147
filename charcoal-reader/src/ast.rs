//! The parsed syntax tree.
//!
//! Still C-shaped: types are as written (arrays and function declarators
//! unresolved against struct layouts), expressions carry no types, and
//! statements keep `for`/`while`/`do` distinct. The elaborator flattens
//! all of this into Clight.

use crate::error::Location;

/// A type as written in a declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum PType {
    /// `void`.
    Void,
    /// `char`, `signed char`, `unsigned char`.
    Char(bool),
    /// `short`; the flag is unsignedness.
    Short(bool),
    /// `int`.
    Int(bool),
    /// `long`, `long long`.
    Long(bool),
    /// `float`.
    Float,
    /// `double`.
    Double,
    /// `struct tag`.
    Struct(String),
    /// Pointer.
    Pointer(Box<PType>),
    /// Array with an optional written length.
    Array(Box<PType>, Option<Box<PExpr>>),
    /// Function: return type, parameters, variadic flag.
    Function(Box<PType>, Vec<(Option<String>, PType)>, bool),
}

/// A unary operator as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PUnop {
    /// `-`
    Neg,
    /// `+` (no-op after promotion)
    Plus,
    /// `~`
    BitNot,
    /// `!`
    LogNot,
    /// `*`
    Deref,
    /// `&`
    AddrOf,
}

/// A binary operator as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum PBinop {
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
    LogAnd,
    LogOr,
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum PExpr {
    /// An identifier.
    Ident(String, Location),
    /// Integer literal.
    IntLit {
        /// The value bits.
        value: u64,
        /// `u` suffix.
        unsigned: bool,
        /// `l`/`ll` suffix.
        long: bool,
        /// Source location.
        loc: Location,
    },
    /// Float literal; `single` for an `f` suffix.
    FloatLit {
        /// The value.
        value: f64,
        /// `f` suffix.
        single: bool,
        /// Source location.
        loc: Location,
    },
    /// Character constant.
    CharLit(i64, Location),
    /// String literal.
    StrLit(Vec<u8>, Location),
    /// Unary operation.
    Unary(PUnop, Box<PExpr>, Location),
    /// Binary operation.
    Binary(PBinop, Box<PExpr>, Box<PExpr>, Location),
    /// Assignment; a compound `op=` carries the operator.
    Assign(Option<PBinop>, Box<PExpr>, Box<PExpr>, Location),
    /// Conditional `c ? a : b`.
    Cond(Box<PExpr>, Box<PExpr>, Box<PExpr>, Location),
    /// Function call.
    Call(Box<PExpr>, Vec<PExpr>, Location),
    /// Array subscript.
    Index(Box<PExpr>, Box<PExpr>, Location),
    /// Member access; `arrow` for `->`.
    Member(Box<PExpr>, String, bool, Location),
    /// Cast.
    Cast(PType, Box<PExpr>, Location),
    /// `sizeof(type)`.
    SizeofType(PType, Location),
    /// `sizeof expr`.
    SizeofExpr(Box<PExpr>, Location),
    /// `++e` / `--e`; the flag is increment.
    PreIncDec(bool, Box<PExpr>, Location),
    /// `e++` / `e--`.
    PostIncDec(bool, Box<PExpr>, Location),
    /// Comma expression.
    Comma(Box<PExpr>, Box<PExpr>, Location),
}

impl PExpr {
    /// The source location of this expression.
    pub fn loc(&self) -> &Location {
        match self {
            PExpr::Ident(_, l)
            | PExpr::IntLit { loc: l, .. }
            | PExpr::FloatLit { loc: l, .. }
            | PExpr::CharLit(_, l)
            | PExpr::StrLit(_, l)
            | PExpr::Unary(_, _, l)
            | PExpr::Binary(_, _, _, l)
            | PExpr::Assign(_, _, _, l)
            | PExpr::Cond(_, _, _, l)
            | PExpr::Call(_, _, l)
            | PExpr::Index(_, _, l)
            | PExpr::Member(_, _, _, l)
            | PExpr::Cast(_, _, l)
            | PExpr::SizeofType(_, l)
            | PExpr::SizeofExpr(_, l)
            | PExpr::PreIncDec(_, _, l)
            | PExpr::PostIncDec(_, _, l)
            | PExpr::Comma(_, _, l) => l,
        }
    }
}

/// An initialiser.
#[derive(Debug, Clone, PartialEq)]
pub enum PInit {
    /// A scalar expression.
    Scalar(PExpr),
    /// A brace-enclosed list.
    List(Vec<PInit>),
}

/// One local declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct PDecl {
    /// Declared name.
    pub name: String,
    /// Declared type.
    pub ty: PType,
    /// Optional initialiser.
    pub init: Option<PInit>,
    /// Source location.
    pub loc: Location,
}

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum PStmt {
    /// Expression statement; `None` for `;`.
    Expr(Option<PExpr>),
    /// Local declarations.
    Decl(Vec<PDecl>),
    /// Compound statement.
    Block(Vec<PStmt>),
    /// `if`.
    If(PExpr, Box<PStmt>, Option<Box<PStmt>>),
    /// `while`.
    While(PExpr, Box<PStmt>),
    /// `do … while`.
    DoWhile(Box<PStmt>, PExpr),
    /// `for(init; cond; step) body`.
    For {
        /// Initialiser, a declaration or expression statement.
        init: Option<Box<PStmt>>,
        /// Controlling expression.
        cond: Option<PExpr>,
        /// Step expression.
        step: Option<PExpr>,
        /// Body.
        body: Box<PStmt>,
    },
    /// `return`.
    Return(Option<PExpr>, Location),
    /// `break`.
    Break(Location),
    /// `continue`.
    Continue(Location),
    /// `switch` with its grouped arms.
    Switch(PExpr, Vec<PSwitchArm>, Location),
    /// A labelled statement.
    Label(String, Box<PStmt>),
    /// `goto`.
    Goto(String, Location),
}

/// One arm of a parsed switch: the labels in front of a run of
/// statements. `None` labels `default`.
#[derive(Debug, Clone, PartialEq)]
pub struct PSwitchArm {
    /// The `case`/`default` labels of this arm.
    pub labels: Vec<(Option<PExpr>, Location)>,
    /// The statements until the next label.
    pub body: Vec<PStmt>,
}

/// A top-level declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum PTopDecl {
    /// `struct tag { fields };`
    Struct {
        /// The tag.
        tag: String,
        /// Field names and types.
        fields: Vec<(String, PType)>,
        /// Source location.
        loc: Location,
    },
    /// A global variable.
    Var {
        /// Declared name.
        name: String,
        /// Declared type.
        ty: PType,
        /// Optional initialiser.
        init: Option<PInit>,
        /// `const`-qualified.
        readonly: bool,
        /// `extern` — a declaration only.
        is_extern: bool,
        /// Source location.
        loc: Location,
    },
    /// A function definition or declaration.
    Func {
        /// Name.
        name: String,
        /// Return type.
        ret: PType,
        /// Parameters.
        params: Vec<(Option<String>, PType)>,
        /// Variadic.
        variadic: bool,
        /// Body; `None` for a declaration.
        body: Option<Vec<PStmt>>,
        /// Source location.
        loc: Location,
    },
}

/// A whole translation unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PProgram {
    /// Top-level declarations in order.
    pub decls: Vec<PTopDecl>,
}
