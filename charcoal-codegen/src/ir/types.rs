//! Common machine-level vocabulary shared by all IRs: types, memory chunks,
//! comparisons, signatures and stack slots.

use charcoal_entity::entity_impl;
use core::fmt;

/// A machine-level value type.
///
/// This is the type of a temporary, a pseudo-register or a stack slot. The
/// distinction between the many C integer types is gone: narrow integers
/// live in 32-bit registers and only matter at memory accesses, where the
/// [`Chunk`] carries width and signedness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    /// 32-bit integers and smaller.
    I32,
    /// 64-bit integers and pointers.
    I64,
    /// 32-bit IEEE 754 floats.
    F32,
    /// 64-bit IEEE 754 floats.
    F64,
}

impl Type {
    /// The size of a value of this type in bytes.
    pub fn bytes(self) -> i64 {
        match self {
            Type::I32 | Type::F32 => 4,
            Type::I64 | Type::F64 => 8,
        }
    }

    /// Is this one of the integer types?
    pub fn is_int(self) -> bool {
        match self {
            Type::I32 | Type::I64 => true,
            Type::F32 | Type::F64 => false,
        }
    }

    /// Is this one of the floating-point types?
    pub fn is_float(self) -> bool {
        !self.is_int()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Type::I32 => "int",
            Type::I64 => "long",
            Type::F32 => "single",
            Type::F64 => "float",
        })
    }
}

/// A memory access chunk: the width and signedness of a load or store.
///
/// Signedness matters only for loads narrower than 32 bits, where it
/// selects sign or zero extension of the loaded value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Chunk {
    /// 8-bit, sign-extended on load.
    Int8Signed,
    /// 8-bit, zero-extended on load.
    Int8Unsigned,
    /// 16-bit, sign-extended on load.
    Int16Signed,
    /// 16-bit, zero-extended on load.
    Int16Unsigned,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer or pointer.
    Int64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
}

impl Chunk {
    /// The number of bytes accessed.
    pub fn bytes(self) -> i64 {
        match self {
            Chunk::Int8Signed | Chunk::Int8Unsigned => 1,
            Chunk::Int16Signed | Chunk::Int16Unsigned => 2,
            Chunk::Int32 | Chunk::Float32 => 4,
            Chunk::Int64 | Chunk::Float64 => 8,
        }
    }

    /// The machine type of the value moved by this chunk.
    pub fn value_type(self) -> Type {
        match self {
            Chunk::Int8Signed
            | Chunk::Int8Unsigned
            | Chunk::Int16Signed
            | Chunk::Int16Unsigned
            | Chunk::Int32 => Type::I32,
            Chunk::Int64 => Type::I64,
            Chunk::Float32 => Type::F32,
            Chunk::Float64 => Type::F64,
        }
    }

    /// The chunk that moves a full value of type `ty`.
    pub fn of_type(ty: Type) -> Self {
        match ty {
            Type::I32 => Chunk::Int32,
            Type::I64 => Chunk::Int64,
            Type::F32 => Chunk::Float32,
            Type::F64 => Chunk::Float64,
        }
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Chunk::Int8Signed => "int8s",
            Chunk::Int8Unsigned => "int8u",
            Chunk::Int16Signed => "int16s",
            Chunk::Int16Unsigned => "int16u",
            Chunk::Int32 => "int32",
            Chunk::Int64 => "int64",
            Chunk::Float32 => "float32",
            Chunk::Float64 => "float64",
        })
    }
}

/// An integer or float comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Comparison {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl Comparison {
    /// The comparison that is true exactly when `self` is false.
    pub fn negate(self) -> Self {
        match self {
            Comparison::Eq => Comparison::Ne,
            Comparison::Ne => Comparison::Eq,
            Comparison::Lt => Comparison::Ge,
            Comparison::Le => Comparison::Gt,
            Comparison::Gt => Comparison::Le,
            Comparison::Ge => Comparison::Lt,
        }
    }

    /// The comparison with its operands swapped: `a < b` iff `b > a`.
    pub fn swap(self) -> Self {
        match self {
            Comparison::Eq => Comparison::Eq,
            Comparison::Ne => Comparison::Ne,
            Comparison::Lt => Comparison::Gt,
            Comparison::Le => Comparison::Ge,
            Comparison::Gt => Comparison::Lt,
            Comparison::Ge => Comparison::Le,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        })
    }
}

/// The interface of a function: argument types, return type, variadicity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Machine types of the declared parameters.
    pub params: Vec<Type>,
    /// Machine type of the returned value, if any.
    pub ret: Option<Type>,
    /// Whether extra arguments may follow the declared ones.
    pub variadic: bool,
}

impl Signature {
    /// A signature with no arguments and no result.
    pub fn void() -> Self {
        Self {
            params: Vec::new(),
            ret: None,
            variadic: false,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (i, ty) in self.params.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", ty)?;
        }
        if self.variadic {
            if !self.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "...")?;
        }
        write!(f, ")")?;
        match self.ret {
            None => write!(f, ": void"),
            Some(ty) => write!(f, ": {}", ty),
        }
    }
}

/// The kind of a stack slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// A spill slot in the current activation record.
    Local,
    /// An overflow argument passed by our caller.
    Incoming,
    /// An overflow argument we are about to pass.
    Outgoing,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            SlotKind::Local => "local",
            SlotKind::Incoming => "incoming",
            SlotKind::Outgoing => "outgoing",
        })
    }
}

/// A stack slot: kind, byte offset within its region, and value type.
///
/// Offsets are region-relative until the stacking pass assigns the regions
/// their places in the concrete frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Slot {
    /// Which frame region the slot lives in.
    pub kind: SlotKind,
    /// Byte offset within the region.
    pub ofs: i64,
    /// Type of the stored value.
    pub ty: Type,
}

impl Slot {
    /// Construct a slot.
    pub fn new(kind: SlotKind, ofs: i64, ty: Type) -> Self {
        Self { kind, ofs, ty }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "S({}, {}, {})", self.kind, self.ofs, self.ty)
    }
}

/// A compiler builtin operation.
///
/// Builtins ride through every IR unchanged: `Sbuiltin` in the source-level
/// IRs, `Ibuiltin`/`Lbuiltin`/`Mbuiltin` below. The emitter expands them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    /// Copy `size` bytes between two non-overlapping addresses with the
    /// given guaranteed alignment. Produced for aggregate assignment.
    Memcpy {
        /// Bytes to copy.
        size: i64,
        /// Alignment of both addresses.
        align: i64,
    },
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Builtin::Memcpy { size, align } => {
                write!(f, "__builtin_memcpy_aligned({}, {})", size, align)
            }
        }
    }
}

/// A numbered temporary variable.
///
/// Temporaries are function-local, unlimited, and register-like: their
/// address cannot be taken. They are introduced by the front-end and by
/// `simpl_locals`, and become pseudo-registers in RTL.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Temp(u32);
entity_impl!(Temp, "$");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_properties() {
        assert_eq!(Type::I32.bytes(), 4);
        assert_eq!(Type::F64.bytes(), 8);
        assert!(Type::I64.is_int());
        assert!(Type::F32.is_float());
        assert_eq!(Type::I64.to_string(), "long");
    }

    #[test]
    fn chunk_round_trip() {
        for &ty in &[Type::I32, Type::I64, Type::F32, Type::F64] {
            assert_eq!(Chunk::of_type(ty).value_type(), ty);
            assert_eq!(Chunk::of_type(ty).bytes(), ty.bytes());
        }
        assert_eq!(Chunk::Int8Unsigned.value_type(), Type::I32);
        assert_eq!(Chunk::Int16Signed.bytes(), 2);
    }

    #[test]
    fn comparison_negate_swap() {
        use Comparison::*;
        for &c in &[Eq, Ne, Lt, Le, Gt, Ge] {
            assert_eq!(c.negate().negate(), c);
            assert_eq!(c.swap().swap(), c);
        }
        assert_eq!(Lt.negate(), Ge);
        assert_eq!(Le.swap(), Ge);
    }

    #[test]
    fn display() {
        let sig = Signature {
            params: vec![Type::I32, Type::F64],
            ret: Some(Type::I32),
            variadic: false,
        };
        assert_eq!(sig.to_string(), "(int, float): int");
        assert_eq!(
            Slot::new(SlotKind::Local, 8, Type::I64).to_string(),
            "S(local, 8, long)"
        );
        assert_eq!(Temp::from_u32(7).to_string(), "$7");
    }
}
