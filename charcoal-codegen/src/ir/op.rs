//! Target-flavoured operations, addressing modes and conditions.
//!
//! From CminorSel down to Mach, all IRs share this vocabulary, just as they
//! share the AArch64 machine it describes. Operations include the combined
//! forms the instruction selector recognises: shifted second operands
//! (`add x, y, lsl #2`), multiply-add/subtract (`madd`/`msub`), fused float
//! multiply-add, and immediate forms.

use crate::ir::types::{Comparison, Type};
use crate::symbols::Symbol;
use core::fmt;

/// The shift applied to a second operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    /// Logical shift left.
    Lsl,
    /// Logical shift right.
    Lsr,
    /// Arithmetic shift right.
    Asr,
}

impl fmt::Display for ShiftOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            ShiftOp::Lsl => "lsl",
            ShiftOp::Lsr => "lsr",
            ShiftOp::Asr => "asr",
        })
    }
}

/// The extension applied to a 32-bit index in an addressing mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Extension {
    /// Zero extension.
    Uxtw,
    /// Sign extension.
    Sxtw,
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Extension::Uxtw => "uxtw",
            Extension::Sxtw => "sxtw",
        })
    }
}

/// A machine condition over a short argument list.
///
/// Unsignedness, width and immediate forms are encoded in the constructor;
/// the float forms come in positive and negated versions because the
/// negation of a float comparison is not a float comparison (NaN).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Condition {
    Ccomp(Comparison),
    Ccompu(Comparison),
    Ccompimm(Comparison, i32),
    Ccompuimm(Comparison, i32),
    Ccompl(Comparison),
    Ccomplu(Comparison),
    Ccomplimm(Comparison, i64),
    Ccompluimm(Comparison, i64),
    Ccompf(Comparison),
    Cnotcompf(Comparison),
    Ccompfs(Comparison),
    Cnotcompfs(Comparison),
}

impl Condition {
    /// Number of arguments the condition tests.
    pub fn num_args(self) -> usize {
        use Condition::*;
        match self {
            Ccomp(_) | Ccompu(_) | Ccompl(_) | Ccomplu(_) | Ccompf(_) | Cnotcompf(_)
            | Ccompfs(_) | Cnotcompfs(_) => 2,
            Ccompimm(..) | Ccompuimm(..) | Ccomplimm(..) | Ccompluimm(..) => 1,
        }
    }

    /// The condition that holds exactly when `self` does not.
    pub fn negate(self) -> Self {
        use Condition::*;
        match self {
            Ccomp(c) => Ccomp(c.negate()),
            Ccompu(c) => Ccompu(c.negate()),
            Ccompimm(c, n) => Ccompimm(c.negate(), n),
            Ccompuimm(c, n) => Ccompuimm(c.negate(), n),
            Ccompl(c) => Ccompl(c.negate()),
            Ccomplu(c) => Ccomplu(c.negate()),
            Ccomplimm(c, n) => Ccomplimm(c.negate(), n),
            Ccompluimm(c, n) => Ccompluimm(c.negate(), n),
            Ccompf(c) => Cnotcompf(c),
            Cnotcompf(c) => Ccompf(c),
            Ccompfs(c) => Cnotcompfs(c),
            Cnotcompfs(c) => Ccompfs(c),
        }
    }

    /// The machine type of the compared arguments.
    pub fn arg_type(self) -> Type {
        use Condition::*;
        match self {
            Ccomp(_) | Ccompu(_) | Ccompimm(..) | Ccompuimm(..) => Type::I32,
            Ccompl(_) | Ccomplu(_) | Ccomplimm(..) | Ccompluimm(..) => Type::I64,
            Ccompf(_) | Cnotcompf(_) => Type::F64,
            Ccompfs(_) | Cnotcompfs(_) => Type::F32,
        }
    }
}

/// An addressing mode together with the arguments it consumes.
///
/// The argument count is fixed by the constructor; see [`num_args`].
///
/// [`num_args`]: Addressing::num_args
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Addressing {
    /// Base register plus byte offset.
    Aindexed(i64),
    /// Base register plus index register.
    Aindexed2,
    /// Base register plus index register shifted left.
    Aindexed2shift(u8),
    /// Base register plus sign/zero-extended 32-bit index shifted left.
    Aindexed2ext(Extension, u8),
    /// A global symbol plus byte offset.
    Aglobal(Symbol, i64),
    /// A byte offset into the function's stack data.
    Ainstack(i64),
}

impl Addressing {
    /// Number of register arguments the mode consumes.
    pub fn num_args(self) -> usize {
        match self {
            Addressing::Aindexed(_) => 1,
            Addressing::Aindexed2
            | Addressing::Aindexed2shift(_)
            | Addressing::Aindexed2ext(..) => 2,
            Addressing::Aglobal(..) | Addressing::Ainstack(_) => 0,
        }
    }
}

/// A machine operation.
///
/// Immediate, shifted and combined variants mirror what a single AArch64
/// instruction can do. `Omove` is special: it copies its argument of any
/// type and is the coalescing target of the register allocator.
#[derive(Clone, Copy, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum Operation {
    Omove,
    // Constants.
    Ointconst(i32),
    Olongconst(i64),
    Ofloatconst(f64),
    Osingleconst(f32),
    Oaddrsymbol(Symbol, i64),
    Oaddrstack(i64),
    // 32-bit integer arithmetic.
    Oneg,
    Oadd,
    Oaddshift(ShiftOp, u8),
    Oaddimm(i32),
    Osub,
    Osubshift(ShiftOp, u8),
    Omul,
    Omadd,
    Omsub,
    Odiv,
    Odivu,
    Oand,
    Oandshift(ShiftOp, u8),
    Oandimm(i32),
    Oor,
    Oorshift(ShiftOp, u8),
    Oorimm(i32),
    Oxor,
    Oxorshift(ShiftOp, u8),
    Oxorimm(i32),
    Onot,
    Onotshift(ShiftOp, u8),
    Oshl,
    Oshr,
    Oshru,
    Oshiftimm(ShiftOp, u8),
    // 64-bit integer arithmetic.
    Onegl,
    Oaddl,
    Oaddlshift(ShiftOp, u8),
    Oaddlimm(i64),
    Osubl,
    Osublshift(ShiftOp, u8),
    Omull,
    Omaddl,
    Omsubl,
    Odivl,
    Odivlu,
    Oandl,
    Oandlshift(ShiftOp, u8),
    Oandlimm(i64),
    Oorl,
    Oorlshift(ShiftOp, u8),
    Oorlimm(i64),
    Oxorl,
    Oxorlshift(ShiftOp, u8),
    Oxorlimm(i64),
    Onotl,
    Onotlshift(ShiftOp, u8),
    Oshll,
    Oshrl,
    Oshrlu,
    Oshiftlimm(ShiftOp, u8),
    // In-register integer narrowing and widening.
    Ocast8signed,
    Ocast8unsigned,
    Ocast16signed,
    Ocast16unsigned,
    Ocast32signed,
    Ocast32unsigned,
    Olowlong,
    // 64-bit float arithmetic.
    Onegf,
    Oabsf,
    Oaddf,
    Osubf,
    Omulf,
    Odivf,
    Ofmadd,
    Ofmsub,
    // 32-bit float arithmetic.
    Onegs,
    Oabss,
    Oadds,
    Osubs,
    Omuls,
    Odivs,
    Ofmadds,
    Ofmsubs,
    // Conversions.
    Osingleoffloat,
    Ofloatofsingle,
    Ointoffloat,
    Ointuoffloat,
    Ofloatofint,
    Ofloatofintu,
    Olongoffloat,
    Olonguoffloat,
    Ofloatoflong,
    Ofloatoflongu,
    Ointofsingle,
    Ointuofsingle,
    Osingleofint,
    Osingleofintu,
    Olongofsingle,
    Olonguofsingle,
    Osingleoflong,
    Osingleoflongu,
    // Materialise a condition as 0 or 1.
    Ocmp(Condition),
}

impl Operation {
    /// Is this the register-to-register move?
    pub fn is_move(&self) -> bool {
        match self {
            Operation::Omove => true,
            _ => false,
        }
    }

    /// Number of register arguments the operation consumes.
    pub fn num_args(&self) -> usize {
        use Operation::*;
        match *self {
            Ointconst(_) | Olongconst(_) | Ofloatconst(_) | Osingleconst(_)
            | Oaddrsymbol(..) | Oaddrstack(_) => 0,
            Omove | Oneg | Oaddimm(_) | Oandimm(_) | Oorimm(_) | Oxorimm(_) | Onot
            | Oshiftimm(..) | Onegl | Oaddlimm(_) | Oandlimm(_) | Oorlimm(_) | Oxorlimm(_)
            | Onotl | Oshiftlimm(..) | Ocast8signed | Ocast8unsigned | Ocast16signed
            | Ocast16unsigned | Ocast32signed | Ocast32unsigned | Olowlong | Onegf | Oabsf
            | Onegs | Oabss | Osingleoffloat | Ofloatofsingle | Ointoffloat | Ointuoffloat
            | Ofloatofint | Ofloatofintu | Olongoffloat | Olonguoffloat | Ofloatoflong
            | Ofloatoflongu | Ointofsingle | Ointuofsingle | Osingleofint | Osingleofintu
            | Olongofsingle | Olonguofsingle | Osingleoflong | Osingleoflongu => 1,
            Omadd | Omsub | Omaddl | Omsubl | Ofmadd | Ofmsub | Ofmadds | Ofmsubs => 3,
            Ocmp(c) => c.num_args(),
            _ => 2,
        }
    }

    /// The machine type of the result, or `None` for `Omove`, whose result
    /// has the type of its argument.
    pub fn result_type(&self) -> Option<Type> {
        use Operation::*;
        Some(match *self {
            Omove => return None,
            Ointconst(_) => Type::I32,
            Olongconst(_) | Oaddrsymbol(..) | Oaddrstack(_) => Type::I64,
            Ofloatconst(_) => Type::F64,
            Osingleconst(_) => Type::F32,
            Oneg | Oadd | Oaddshift(..) | Oaddimm(_) | Osub | Osubshift(..) | Omul | Omadd
            | Omsub | Odiv | Odivu | Oand | Oandshift(..) | Oandimm(_) | Oor | Oorshift(..)
            | Oorimm(_) | Oxor | Oxorshift(..) | Oxorimm(_) | Onot | Onotshift(..) | Oshl
            | Oshr | Oshru | Oshiftimm(..) | Ocast8signed | Ocast8unsigned | Ocast16signed
            | Ocast16unsigned | Olowlong | Ointoffloat | Ointuoffloat | Ointofsingle
            | Ointuofsingle | Ocmp(_) => Type::I32,
            Onegl | Oaddl | Oaddlshift(..) | Oaddlimm(_) | Osubl | Osublshift(..) | Omull
            | Omaddl | Omsubl | Odivl | Odivlu | Oandl | Oandlshift(..) | Oandlimm(_)
            | Oorl | Oorlshift(..) | Oorlimm(_) | Oxorl | Oxorlshift(..) | Oxorlimm(_)
            | Onotl | Onotlshift(..) | Oshll | Oshrl | Oshrlu | Oshiftlimm(..)
            | Ocast32signed | Ocast32unsigned | Olongoffloat | Olonguoffloat
            | Olongofsingle | Olonguofsingle => Type::I64,
            Onegf | Oabsf | Oaddf | Osubf | Omulf | Odivf | Ofmadd | Ofmsub
            | Ofloatofsingle | Ofloatofint | Ofloatofintu | Ofloatoflong | Ofloatoflongu => {
                Type::F64
            }
            Onegs | Oabss | Oadds | Osubs | Omuls | Odivs | Ofmadds | Ofmsubs
            | Osingleoffloat | Osingleofint | Osingleofintu | Osingleoflong
            | Osingleoflongu => Type::F32,
        })
    }
}

/// Print `op` applied to `args` in the reference dump format.
pub fn print_operation<T: fmt::Display>(
    f: &mut fmt::Formatter,
    op: &Operation,
    args: &[T],
) -> fmt::Result {
    use Operation::*;
    let a = |i: usize| &args[i];
    match *op {
        Omove => write!(f, "{}", a(0)),
        Ointconst(n) => write!(f, "{}", n),
        Olongconst(n) => write!(f, "{}L", n),
        Ofloatconst(x) => write!(f, "{:?}", x),
        Osingleconst(x) => write!(f, "{:?}f", x),
        Oaddrsymbol(s, 0) => write!(f, "\"{}\"", s),
        Oaddrsymbol(s, ofs) => write!(f, "\"{}\" + {}", s, ofs),
        Oaddrstack(ofs) => write!(f, "&stack[{}]", ofs),
        Oneg => write!(f, "-{}", a(0)),
        Oadd => write!(f, "{} + {}", a(0), a(1)),
        Oaddshift(s, n) => write!(f, "{} + ({} {} {})", a(0), a(1), s, n),
        Oaddimm(n) => write!(f, "{} + {}", a(0), n),
        Osub => write!(f, "{} - {}", a(0), a(1)),
        Osubshift(s, n) => write!(f, "{} - ({} {} {})", a(0), a(1), s, n),
        Omul => write!(f, "{} * {}", a(0), a(1)),
        Omadd => write!(f, "{} + {} * {}", a(0), a(1), a(2)),
        Omsub => write!(f, "{} - {} * {}", a(0), a(1), a(2)),
        Odiv => write!(f, "{} / {}", a(0), a(1)),
        Odivu => write!(f, "{} /u {}", a(0), a(1)),
        Oand => write!(f, "{} & {}", a(0), a(1)),
        Oandshift(s, n) => write!(f, "{} & ({} {} {})", a(0), a(1), s, n),
        Oandimm(n) => write!(f, "{} & {}", a(0), n),
        Oor => write!(f, "{} | {}", a(0), a(1)),
        Oorshift(s, n) => write!(f, "{} | ({} {} {})", a(0), a(1), s, n),
        Oorimm(n) => write!(f, "{} | {}", a(0), n),
        Oxor => write!(f, "{} ^ {}", a(0), a(1)),
        Oxorshift(s, n) => write!(f, "{} ^ ({} {} {})", a(0), a(1), s, n),
        Oxorimm(n) => write!(f, "{} ^ {}", a(0), n),
        Onot => write!(f, "~{}", a(0)),
        Onotshift(s, n) => write!(f, "~({} {} {})", a(0), s, n),
        Oshl => write!(f, "{} << {}", a(0), a(1)),
        Oshr => write!(f, "{} >> {}", a(0), a(1)),
        Oshru => write!(f, "{} >>u {}", a(0), a(1)),
        Oshiftimm(s, n) => write!(f, "{} {} {}", a(0), s, n),
        Onegl => write!(f, "-l {}", a(0)),
        Oaddl => write!(f, "{} +l {}", a(0), a(1)),
        Oaddlshift(s, n) => write!(f, "{} +l ({} {} {})", a(0), a(1), s, n),
        Oaddlimm(n) => write!(f, "{} +l {}", a(0), n),
        Osubl => write!(f, "{} -l {}", a(0), a(1)),
        Osublshift(s, n) => write!(f, "{} -l ({} {} {})", a(0), a(1), s, n),
        Omull => write!(f, "{} *l {}", a(0), a(1)),
        Omaddl => write!(f, "{} +l {} *l {}", a(0), a(1), a(2)),
        Omsubl => write!(f, "{} -l {} *l {}", a(0), a(1), a(2)),
        Odivl => write!(f, "{} /l {}", a(0), a(1)),
        Odivlu => write!(f, "{} /lu {}", a(0), a(1)),
        Oandl => write!(f, "{} &l {}", a(0), a(1)),
        Oandlshift(s, n) => write!(f, "{} &l ({} {} {})", a(0), a(1), s, n),
        Oandlimm(n) => write!(f, "{} &l {}", a(0), n),
        Oorl => write!(f, "{} |l {}", a(0), a(1)),
        Oorlshift(s, n) => write!(f, "{} |l ({} {} {})", a(0), a(1), s, n),
        Oorlimm(n) => write!(f, "{} |l {}", a(0), n),
        Oxorl => write!(f, "{} ^l {}", a(0), a(1)),
        Oxorlshift(s, n) => write!(f, "{} ^l ({} {} {})", a(0), a(1), s, n),
        Oxorlimm(n) => write!(f, "{} ^l {}", a(0), n),
        Onotl => write!(f, "~l {}", a(0)),
        Onotlshift(s, n) => write!(f, "~l ({} {} {})", a(0), s, n),
        Oshll => write!(f, "{} <<l {}", a(0), a(1)),
        Oshrl => write!(f, "{} >>l {}", a(0), a(1)),
        Oshrlu => write!(f, "{} >>lu {}", a(0), a(1)),
        Oshiftlimm(s, n) => write!(f, "{} {}l {}", a(0), s, n),
        Ocast8signed => write!(f, "int8signed({})", a(0)),
        Ocast8unsigned => write!(f, "int8unsigned({})", a(0)),
        Ocast16signed => write!(f, "int16signed({})", a(0)),
        Ocast16unsigned => write!(f, "int16unsigned({})", a(0)),
        Ocast32signed => write!(f, "int32signed({})", a(0)),
        Ocast32unsigned => write!(f, "int32unsigned({})", a(0)),
        Olowlong => write!(f, "lowlong({})", a(0)),
        Onegf => write!(f, "-f {}", a(0)),
        Oabsf => write!(f, "absf({})", a(0)),
        Oaddf => write!(f, "{} +f {}", a(0), a(1)),
        Osubf => write!(f, "{} -f {}", a(0), a(1)),
        Omulf => write!(f, "{} *f {}", a(0), a(1)),
        Odivf => write!(f, "{} /f {}", a(0), a(1)),
        Ofmadd => write!(f, "fmadd({}, {}, {})", a(0), a(1), a(2)),
        Ofmsub => write!(f, "fmsub({}, {}, {})", a(0), a(1), a(2)),
        Onegs => write!(f, "-s {}", a(0)),
        Oabss => write!(f, "abss({})", a(0)),
        Oadds => write!(f, "{} +s {}", a(0), a(1)),
        Osubs => write!(f, "{} -s {}", a(0), a(1)),
        Omuls => write!(f, "{} *s {}", a(0), a(1)),
        Odivs => write!(f, "{} /s {}", a(0), a(1)),
        Ofmadds => write!(f, "fmadds({}, {}, {})", a(0), a(1), a(2)),
        Ofmsubs => write!(f, "fmsubs({}, {}, {})", a(0), a(1), a(2)),
        Osingleoffloat => write!(f, "singleoffloat({})", a(0)),
        Ofloatofsingle => write!(f, "floatofsingle({})", a(0)),
        Ointoffloat => write!(f, "intoffloat({})", a(0)),
        Ointuoffloat => write!(f, "intuoffloat({})", a(0)),
        Ofloatofint => write!(f, "floatofint({})", a(0)),
        Ofloatofintu => write!(f, "floatofintu({})", a(0)),
        Olongoffloat => write!(f, "longoffloat({})", a(0)),
        Olonguoffloat => write!(f, "longuoffloat({})", a(0)),
        Ofloatoflong => write!(f, "floatoflong({})", a(0)),
        Ofloatoflongu => write!(f, "floatoflongu({})", a(0)),
        Ointofsingle => write!(f, "intofsingle({})", a(0)),
        Ointuofsingle => write!(f, "intuofsingle({})", a(0)),
        Osingleofint => write!(f, "singleofint({})", a(0)),
        Osingleofintu => write!(f, "singleofintu({})", a(0)),
        Olongofsingle => write!(f, "longofsingle({})", a(0)),
        Olonguofsingle => write!(f, "longuofsingle({})", a(0)),
        Osingleoflong => write!(f, "singleoflong({})", a(0)),
        Osingleoflongu => write!(f, "singleoflongu({})", a(0)),
        Ocmp(c) => print_condition(f, &c, args),
    }
}

/// Print `cond` applied to `args` in the reference dump format.
pub fn print_condition<T: fmt::Display>(
    f: &mut fmt::Formatter,
    cond: &Condition,
    args: &[T],
) -> fmt::Result {
    use Condition::*;
    match *cond {
        Ccomp(c) => write!(f, "{} {} {}", args[0], c, args[1]),
        Ccompu(c) => write!(f, "{} {}u {}", args[0], c, args[1]),
        Ccompimm(c, n) => write!(f, "{} {} {}", args[0], c, n),
        Ccompuimm(c, n) => write!(f, "{} {}u {}", args[0], c, n),
        Ccompl(c) => write!(f, "{} {}l {}", args[0], c, args[1]),
        Ccomplu(c) => write!(f, "{} {}lu {}", args[0], c, args[1]),
        Ccomplimm(c, n) => write!(f, "{} {}l {}", args[0], c, n),
        Ccompluimm(c, n) => write!(f, "{} {}lu {}", args[0], c, n),
        Ccompf(c) => write!(f, "{} {}f {}", args[0], c, args[1]),
        Cnotcompf(c) => write!(f, "!({} {}f {})", args[0], c, args[1]),
        Ccompfs(c) => write!(f, "{} {}s {}", args[0], c, args[1]),
        Cnotcompfs(c) => write!(f, "!({} {}s {})", args[0], c, args[1]),
    }
}

/// Print the memory address denoted by `mode` applied to `args`.
pub fn print_addressing<T: fmt::Display>(
    f: &mut fmt::Formatter,
    mode: &Addressing,
    args: &[T],
) -> fmt::Result {
    use Addressing::*;
    match *mode {
        Aindexed(0) => write!(f, "{}", args[0]),
        Aindexed(ofs) => write!(f, "{} + {}", args[0], ofs),
        Aindexed2 => write!(f, "{} + {}", args[0], args[1]),
        Aindexed2shift(s) => write!(f, "{} + ({} lsl {})", args[0], args[1], s),
        Aindexed2ext(ext, 0) => write!(f, "{} + {}({})", args[0], ext, args[1]),
        Aindexed2ext(ext, s) => write!(f, "{} + ({}({}) lsl {})", args[0], ext, args[1], s),
        Aglobal(s, 0) => write!(f, "\"{}\"", s),
        Aglobal(s, ofs) => write!(f, "\"{}\" + {}", s, ofs),
        Ainstack(ofs) => write!(f, "stack[{}]", ofs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_counts() {
        assert_eq!(Operation::Ointconst(1).num_args(), 0);
        assert_eq!(Operation::Omove.num_args(), 1);
        assert_eq!(Operation::Oaddshift(ShiftOp::Lsl, 2).num_args(), 2);
        assert_eq!(Operation::Omadd.num_args(), 3);
        assert_eq!(
            Operation::Ocmp(Condition::Ccompimm(Comparison::Eq, 0)).num_args(),
            1
        );
        assert_eq!(Addressing::Aindexed2shift(3).num_args(), 2);
        assert_eq!(Addressing::Aglobal(crate::symbols::symbol("g"), 0).num_args(), 0);
    }

    #[test]
    fn condition_negation() {
        use Comparison::*;
        assert_eq!(
            Condition::Ccomp(Lt).negate(),
            Condition::Ccomp(Ge)
        );
        assert_eq!(
            Condition::Ccompf(Eq).negate(),
            Condition::Cnotcompf(Eq)
        );
        assert_eq!(
            Condition::Cnotcompfs(Le).negate(),
            Condition::Ccompfs(Le)
        );
        // Double negation round-trips.
        let c = Condition::Ccompluimm(Gt, 7);
        assert_eq!(c.negate().negate(), c);
    }

    #[test]
    fn result_types() {
        assert_eq!(Operation::Omove.result_type(), None);
        assert_eq!(Operation::Oaddl.result_type(), Some(Type::I64));
        assert_eq!(Operation::Ofmadds.result_type(), Some(Type::F32));
        assert_eq!(
            Operation::Ocmp(Condition::Ccompl(Comparison::Lt)).result_type(),
            Some(Type::I32)
        );
    }
}
