//! The intermediate representations.
//!
//! The IRs form a tower of increasingly machine-specific program
//! representations. Every IR is a closed sum of statement and expression
//! variants; every IR has a reference printer whose output is the format of
//! the corresponding debug dump and the oracle of the golden tests.
//!
//! From source level down to assembly level:
//!
//! | module        | representation                                       |
//! |---------------|------------------------------------------------------|
//! | `clight`      | typed C-level IR with l-values and structured control |
//! | `csharpminor` | untyped expressions over chunks, exit-indexed blocks |
//! | `cminor`      | stack frame reduced to a byte count, lowered switches |
//! | `cminorsel`   | target operations, addressing modes, condition trees |
//! | `rtl`         | CFG of three-address code over pseudo-registers      |
//! | `ltl`         | CFG over machine registers and stack slots           |
//! | `mach`        | label/goto instruction list with concrete frames     |

pub mod clight;
pub mod cminor;
pub mod cminorsel;
pub mod csharpminor;
pub mod data;
pub mod ltl;
pub mod mach;
pub mod op;
pub mod ops;
pub mod rtl;
pub mod types;

pub use self::data::DataItem;
pub use self::types::{Builtin, Chunk, Comparison, Signature, Slot, SlotKind, Temp, Type};
