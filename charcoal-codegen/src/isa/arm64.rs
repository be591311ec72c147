//! ARM64 register descriptions and the AAPCS64 calling convention.
//!
//! Register roles:
//! * `x0`–`x7` / `d0`–`d7` — argument and result registers, caller-saved;
//! * `x8`–`x15`, `d16`–`d30` — caller-saved;
//! * `x19`–`x28`, `d8`–`d15` — callee-saved;
//! * `x16`/`x17` — linker/veneer scratch, never allocated; charcoal also
//!   uses them (with `d31`) to break parallel-move cycles;
//! * `x18` — platform register, never allocated;
//! * `x29`/`x30` — frame pointer and link register, managed by the
//!   prologue/epilogue.

use crate::ir::types::{Signature, Type};
use crate::isa::RegClass;
use core::fmt;

/// A machine register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
#[rustfmt::skip]
pub enum Mreg {
    X0, X1, X2, X3, X4, X5, X6, X7,
    X8, X9, X10, X11, X12, X13, X14, X15,
    X16, X17, X18, X19, X20, X21, X22, X23,
    X24, X25, X26, X27, X28, X29, X30,
    D0, D1, D2, D3, D4, D5, D6, D7,
    D8, D9, D10, D11, D12, D13, D14, D15,
    D16, D17, D18, D19, D20, D21, D22, D23,
    D24, D25, D26, D27, D28, D29, D30, D31,
}

use Mreg::*;

/// All registers, indexable by [`Mreg::index`].
#[rustfmt::skip]
pub const ALL_MREGS: [Mreg; 63] = [
    X0, X1, X2, X3, X4, X5, X6, X7,
    X8, X9, X10, X11, X12, X13, X14, X15,
    X16, X17, X18, X19, X20, X21, X22, X23,
    X24, X25, X26, X27, X28, X29, X30,
    D0, D1, D2, D3, D4, D5, D6, D7,
    D8, D9, D10, D11, D12, D13, D14, D15,
    D16, D17, D18, D19, D20, D21, D22, D23,
    D24, D25, D26, D27, D28, D29, D30, D31,
];

/// Integer argument registers, in argument order.
pub const INT_PARAM_REGS: [Mreg; 8] = [X0, X1, X2, X3, X4, X5, X6, X7];

/// Float argument registers, in argument order.
pub const FLOAT_PARAM_REGS: [Mreg; 8] = [D0, D1, D2, D3, D4, D5, D6, D7];

/// Integer scratch registers reserved for the emitter and for
/// parallel-move cycle breaking.
pub const INT_SCRATCH: [Mreg; 2] = [X16, X17];

/// Float scratch register.
pub const FLOAT_SCRATCH: Mreg = D31;

impl Mreg {
    /// A dense index: integer registers first, then floats.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The register with the given dense index.
    pub fn from_index(i: usize) -> Mreg {
        ALL_MREGS[i]
    }

    /// The class this register belongs to.
    pub fn class(self) -> RegClass {
        if (self as usize) <= (X30 as usize) {
            RegClass::Int
        } else {
            RegClass::Float
        }
    }

    /// The class holding values of machine type `ty`.
    pub fn class_for(ty: Type) -> RegClass {
        if ty.is_int() {
            RegClass::Int
        } else {
            RegClass::Float
        }
    }

    /// Is this register preserved across calls by the callee?
    pub fn is_callee_saved(self) -> bool {
        match self {
            X19 | X20 | X21 | X22 | X23 | X24 | X25 | X26 | X27 | X28 => true,
            D8 | D9 | D10 | D11 | D12 | D13 | D14 | D15 => true,
            _ => false,
        }
    }
}

impl fmt::Display for Mreg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let i = self.index();
        if i <= X30.index() {
            write!(f, "x{}", i)
        } else {
            write!(f, "d{}", i - D0.index())
        }
    }
}

/// Allocatable registers of `class`, in colouring preference order:
/// caller-saved before callee-saved, so leaf code avoids save/restore
/// traffic.
pub fn allocatable(class: RegClass) -> &'static [Mreg] {
    #[rustfmt::skip]
    static INT: [Mreg; 24] = [
        X0, X1, X2, X3, X4, X5, X6, X7,
        X8, X9, X10, X11, X12, X13, X14, X15,
        X19, X20, X21, X22, X23, X24, X25, X26,
    ];
    #[rustfmt::skip]
    static FLOAT: [Mreg; 31] = [
        D0, D1, D2, D3, D4, D5, D6, D7,
        D16, D17, D18, D19, D20, D21, D22, D23,
        D24, D25, D26, D27, D28, D29, D30,
        D8, D9, D10, D11, D12, D13, D14, D15,
    ];
    match class {
        RegClass::Int => &INT,
        RegClass::Float => &FLOAT,
    }
}

/// Allocatable callee-saved registers of `class`, used for values that
/// must survive a call.
pub fn allocatable_callee_saved(class: RegClass) -> &'static [Mreg] {
    static INT: [Mreg; 8] = [X19, X20, X21, X22, X23, X24, X25, X26];
    static FLOAT: [Mreg; 8] = [D8, D9, D10, D11, D12, D13, D14, D15];
    match class {
        RegClass::Int => &INT,
        RegClass::Float => &FLOAT,
    }
}

/// Where one argument is passed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgLoc {
    /// In a machine register.
    Reg(Mreg),
    /// On the stack, at the given byte offset into the outgoing-argument
    /// area.
    Stack(i64),
}

/// Argument locations for a call with signature `sig`, plus the size in
/// bytes of the outgoing-argument area the call needs.
///
/// The first eight integer arguments go in `x0..x7`, the first eight float
/// arguments in `d0..d7`; further arguments take 8-byte stack slots in
/// order.
pub fn loc_arguments(sig: &Signature) -> (Vec<ArgLoc>, i64) {
    let mut locs = Vec::with_capacity(sig.params.len());
    let mut next_int = 0;
    let mut next_float = 0;
    let mut stack = 0;
    for &ty in &sig.params {
        let loc = match Mreg::class_for(ty) {
            RegClass::Int if next_int < INT_PARAM_REGS.len() => {
                next_int += 1;
                ArgLoc::Reg(INT_PARAM_REGS[next_int - 1])
            }
            RegClass::Float if next_float < FLOAT_PARAM_REGS.len() => {
                next_float += 1;
                ArgLoc::Reg(FLOAT_PARAM_REGS[next_float - 1])
            }
            _ => {
                let ofs = stack;
                stack += 8;
                ArgLoc::Stack(ofs)
            }
        };
        locs.push(loc);
    }
    (locs, stack)
}

/// The register holding the result of a call with signature `sig`.
pub fn loc_result(sig: &Signature) -> Option<Mreg> {
    sig.ret.map(|ty| match Mreg::class_for(ty) {
        RegClass::Int => X0,
        RegClass::Float => D0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_indices() {
        assert_eq!(X0.to_string(), "x0");
        assert_eq!(X30.to_string(), "x30");
        assert_eq!(D0.to_string(), "d0");
        assert_eq!(D31.to_string(), "d31");
        for (i, &r) in ALL_MREGS.iter().enumerate() {
            assert_eq!(r.index(), i);
            assert_eq!(Mreg::from_index(i), r);
        }
    }

    #[test]
    fn classes() {
        assert_eq!(X7.class(), RegClass::Int);
        assert_eq!(D7.class(), RegClass::Float);
        assert_eq!(Mreg::class_for(Type::I64), RegClass::Int);
        assert_eq!(Mreg::class_for(Type::F32), RegClass::Float);
    }

    #[test]
    fn preservation() {
        assert!(X19.is_callee_saved());
        assert!(D8.is_callee_saved());
        assert!(!X0.is_callee_saved());
        assert!(!D16.is_callee_saved());
        // FP, LR and the reserved registers are never allocatable.
        for &r in &[X16, X17, X18, X29, X30, D31] {
            assert!(!allocatable(r.class()).contains(&r), "{} allocatable", r);
        }
        for class in RegClass::ALL.iter().copied() {
            for &r in allocatable_callee_saved(class) {
                assert!(r.is_callee_saved());
                assert!(allocatable(class).contains(&r));
            }
        }
    }

    #[test]
    fn argument_locations() {
        use crate::ir::types::Type::*;
        let sig = Signature {
            params: vec![I32, F64, I64, I32, I32, I32, I32, I32, I32, I32, F32],
            ret: Some(I32),
            variadic: false,
        };
        let (locs, stack) = loc_arguments(&sig);
        assert_eq!(locs[0], ArgLoc::Reg(X0));
        assert_eq!(locs[1], ArgLoc::Reg(D0));
        assert_eq!(locs[2], ArgLoc::Reg(X1));
        // Eight int args fill x0..x7; the ninth goes to the stack.
        assert_eq!(locs[8], ArgLoc::Reg(X7));
        assert_eq!(locs[9], ArgLoc::Stack(0));
        assert_eq!(locs[10], ArgLoc::Reg(D1));
        assert_eq!(stack, 8);
        assert_eq!(loc_result(&sig), Some(X0));
    }
}
