//! Operators of the middle IRs.
//!
//! Csharpminor and Cminor share one operator vocabulary, typed at the
//! operator rather than at the operands: `Oadd` is 32-bit integer addition,
//! `Oaddl` the 64-bit variant, `Oaddf`/`Oadds` the double and single float
//! variants. Comparisons are a parameterised family carrying a
//! [`Comparison`](super::types::Comparison) code, with unsigned, long and
//! float versions.

use crate::ir::types::{Comparison, Type};
use crate::symbols::Symbol;
use core::fmt;

/// A compile-time constant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Const {
    /// A 32-bit integer constant.
    Ointconst(i32),
    /// A 64-bit integer constant.
    Olongconst(i64),
    /// A 64-bit float constant.
    Ofloatconst(f64),
    /// A 32-bit float constant.
    Osingleconst(f32),
    /// The address of a global symbol plus a byte offset. Produced by
    /// `cminorgen`; Csharpminor uses `Eaddrof` instead.
    Oaddrsymbol(Symbol, i64),
    /// An address within the function's stack data, as a byte offset.
    /// Produced by `cminorgen` for address-taken locals.
    Oaddrstack(i64),
}

impl Const {
    /// The machine type of the constant's value.
    pub fn result_type(&self) -> Type {
        match *self {
            Const::Ointconst(_) => Type::I32,
            Const::Olongconst(_) => Type::I64,
            Const::Ofloatconst(_) => Type::F64,
            Const::Osingleconst(_) => Type::F32,
            Const::Oaddrsymbol(..) | Const::Oaddrstack(_) => Type::I64,
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Const::Ointconst(n) => write!(f, "{}", n),
            Const::Olongconst(n) => write!(f, "{}L", n),
            Const::Ofloatconst(x) => write!(f, "{:?}", x),
            Const::Osingleconst(x) => write!(f, "{:?}f", x),
            Const::Oaddrsymbol(s, 0) => write!(f, "\"{}\"", s),
            Const::Oaddrsymbol(s, ofs) => write!(f, "\"{}\" + {}", s, ofs),
            Const::Oaddrstack(ofs) => write!(f, "&stack[{}]", ofs),
        }
    }
}

/// A unary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Unop {
    // 32-bit integers.
    Onegint,
    Onotint,
    // 64-bit integers.
    Onegl,
    Onotl,
    // Floats.
    Onegf,
    Oabsf,
    Onegs,
    Oabss,
    // Integer narrowing within 32 bits.
    Ocast8signed,
    Ocast8unsigned,
    Ocast16signed,
    Ocast16unsigned,
    // Conversions between int and long.
    Olongofint,
    Olongofintu,
    Ointoflong,
    // Conversions between int and float/single.
    Ofloatofint,
    Ofloatofintu,
    Ointoffloat,
    Ointuoffloat,
    Osingleofint,
    Osingleofintu,
    Ointofsingle,
    Ointuofsingle,
    // Conversions between long and float/single.
    Ofloatoflong,
    Ofloatoflongu,
    Olongoffloat,
    Olonguoffloat,
    Osingleoflong,
    Osingleoflongu,
    Olongofsingle,
    Olonguofsingle,
    // Conversions between the two float widths.
    Osingleoffloat,
    Ofloatofsingle,
}

impl Unop {
    /// The machine type of the operator's result.
    pub fn result_type(self) -> Type {
        use Unop::*;
        match self {
            Onegint | Onotint | Ocast8signed | Ocast8unsigned | Ocast16signed
            | Ocast16unsigned | Ointoflong | Ointoffloat | Ointuoffloat | Ointofsingle
            | Ointuofsingle => Type::I32,
            Onegl | Onotl | Olongofint | Olongofintu | Olongoffloat | Olonguoffloat
            | Olongofsingle | Olonguofsingle => Type::I64,
            Onegf | Oabsf | Ofloatofint | Ofloatofintu | Ofloatoflong | Ofloatoflongu
            | Ofloatofsingle => Type::F64,
            Onegs | Oabss | Osingleofint | Osingleofintu | Osingleoflong | Osingleoflongu
            | Osingleoffloat => Type::F32,
        }
    }
}

impl fmt::Display for Unop {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Unop::*;
        f.write_str(match *self {
            Onegint => "-",
            Onotint => "~",
            Onegl => "-l",
            Onotl => "~l",
            Onegf => "-f",
            Oabsf => "absf",
            Onegs => "-s",
            Oabss => "abss",
            Ocast8signed => "int8signed",
            Ocast8unsigned => "int8unsigned",
            Ocast16signed => "int16signed",
            Ocast16unsigned => "int16unsigned",
            Olongofint => "longofint",
            Olongofintu => "longofintu",
            Ointoflong => "intoflong",
            Ofloatofint => "floatofint",
            Ofloatofintu => "floatofintu",
            Ointoffloat => "intoffloat",
            Ointuoffloat => "intuoffloat",
            Osingleofint => "singleofint",
            Osingleofintu => "singleofintu",
            Ointofsingle => "intofsingle",
            Ointuofsingle => "intuofsingle",
            Ofloatoflong => "floatoflong",
            Ofloatoflongu => "floatoflongu",
            Olongoffloat => "longoffloat",
            Olonguoffloat => "longuoffloat",
            Osingleoflong => "singleoflong",
            Osingleoflongu => "singleoflongu",
            Olongofsingle => "longofsingle",
            Olonguofsingle => "longuofsingle",
            Osingleoffloat => "singleoffloat",
            Ofloatofsingle => "floatofsingle",
        })
    }
}

/// A binary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Binop {
    // 32-bit integer arithmetic.
    Oadd,
    Osub,
    Omul,
    Odiv,
    Odivu,
    Omod,
    Omodu,
    Oand,
    Oor,
    Oxor,
    Oshl,
    Oshr,
    Oshru,
    // 64-bit integer arithmetic. Shift amounts are 32-bit.
    Oaddl,
    Osubl,
    Omull,
    Odivl,
    Odivlu,
    Omodl,
    Omodlu,
    Oandl,
    Oorl,
    Oxorl,
    Oshll,
    Oshrl,
    Oshrlu,
    // Float arithmetic.
    Oaddf,
    Osubf,
    Omulf,
    Odivf,
    Oadds,
    Osubs,
    Omuls,
    Odivs,
    // Comparison families. The result is a 32-bit 0 or 1.
    Ocmp(Comparison),
    Ocmpu(Comparison),
    Ocmpl(Comparison),
    Ocmplu(Comparison),
    Ocmpf(Comparison),
    Ocmps(Comparison),
}

impl Binop {
    /// The machine type of the operator's result.
    pub fn result_type(self) -> Type {
        use Binop::*;
        match self {
            Oadd | Osub | Omul | Odiv | Odivu | Omod | Omodu | Oand | Oor | Oxor | Oshl
            | Oshr | Oshru => Type::I32,
            Oaddl | Osubl | Omull | Odivl | Odivlu | Omodl | Omodlu | Oandl | Oorl | Oxorl
            | Oshll | Oshrl | Oshrlu => Type::I64,
            Oaddf | Osubf | Omulf | Odivf => Type::F64,
            Oadds | Osubs | Omuls | Odivs => Type::F32,
            Ocmp(_) | Ocmpu(_) | Ocmpl(_) | Ocmplu(_) | Ocmpf(_) | Ocmps(_) => Type::I32,
        }
    }
}

impl fmt::Display for Binop {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Binop::*;
        match *self {
            Ocmp(c) => return write!(f, "{}", c),
            Ocmpu(c) => return write!(f, "{}u", c),
            Ocmpl(c) => return write!(f, "{}l", c),
            Ocmplu(c) => return write!(f, "{}lu", c),
            Ocmpf(c) => return write!(f, "{}f", c),
            Ocmps(c) => return write!(f, "{}s", c),
            _ => {}
        }
        f.write_str(match *self {
            Oadd => "+",
            Osub => "-",
            Omul => "*",
            Odiv => "/",
            Odivu => "/u",
            Omod => "%",
            Omodu => "%u",
            Oand => "&",
            Oor => "|",
            Oxor => "^",
            Oshl => "<<",
            Oshr => ">>",
            Oshru => ">>u",
            Oaddl => "+l",
            Osubl => "-l",
            Omull => "*l",
            Odivl => "/l",
            Odivlu => "/lu",
            Omodl => "%l",
            Omodlu => "%lu",
            Oandl => "&l",
            Oorl => "|l",
            Oxorl => "^l",
            Oshll => "<<l",
            Oshrl => ">>l",
            Oshrlu => ">>lu",
            Oaddf => "+f",
            Osubf => "-f",
            Omulf => "*f",
            Odivf => "/f",
            Oadds => "+s",
            Osubs => "-s",
            Omuls => "*s",
            Odivs => "/s",
            _ => unreachable!(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_types() {
        assert_eq!(Binop::Oaddl.result_type(), Type::I64);
        assert_eq!(Binop::Ocmplu(Comparison::Lt).result_type(), Type::I32);
        assert_eq!(Unop::Ofloatofint.result_type(), Type::F64);
        assert_eq!(Unop::Ointoflong.result_type(), Type::I32);
    }

    #[test]
    fn display() {
        assert_eq!(Binop::Oaddf.to_string(), "+f");
        assert_eq!(Binop::Ocmpu(Comparison::Le).to_string(), "<=u");
        assert_eq!(Const::Olongconst(-3).to_string(), "-3L");
    }
}
