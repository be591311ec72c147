//! Array-based data structures indexed by small integer "entity references".
//!
//! Compiler data structures in charcoal reference each other constantly: an
//! RTL instruction names its successor nodes, a pseudo-register names its
//! type, a basic block names the blocks it branches to. These references are
//! not Rust references. Rust's ownership rules make cyclic graphs of `&`
//! painful, and 64-bit pointers waste space. Instead, every referenced
//! entity gets a dedicated index type wrapping a `u32`, and the entities
//! themselves live in dense tables indexed by that type. A separate index
//! type per entity kind keeps the type safety.
//!
//! The `entity_impl!` macro implements the boilerplate for a new entity
//! type, including a `Display` implementation with a per-entity prefix that
//! matches the textual IR format (`r12`, `n4`, ...).

#![deny(missing_docs)]

/// A type wrapping a small integer index should implement `EntityRef` so it
/// can be used as the key of an entity table.
pub trait EntityRef: Copy + Eq {
    /// Create a new entity reference from a small integer.
    /// This should crash if the requested index is not representable.
    fn new(_: usize) -> Self;

    /// Get the index that was used to create this entity reference.
    fn index(self) -> usize;
}

/// Macro which provides the common implementation of a 32-bit entity
/// reference: `EntityRef`, `From`/`Into` conversions for `u32`, and
/// `Display`/`Debug` using the given prefix.
#[macro_export]
macro_rules! entity_impl {
    ($entity:ident) => {
        impl $crate::EntityRef for $entity {
            fn new(index: usize) -> Self {
                debug_assert!(index < (::core::u32::MAX as usize));
                $entity(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $entity {
            /// Create a new instance from a `u32`.
            #[allow(dead_code)]
            pub fn from_u32(x: u32) -> Self {
                debug_assert!(x < ::core::u32::MAX);
                $entity(x)
            }

            /// Return the underlying index value as a `u32`.
            #[allow(dead_code)]
            pub fn as_u32(self) -> u32 {
                self.0
            }
        }
    };

    // Include a `Display` and `Debug` implementation using the given prefix.
    ($entity:ident, $display_prefix:expr) => {
        $crate::entity_impl!($entity);

        impl ::core::fmt::Display for $entity {
            fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                write!(f, concat!($display_prefix, "{}"), self.0)
            }
        }

        impl ::core::fmt::Debug for $entity {
            fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                (self as &dyn ::core::fmt::Display).fmt(f)
            }
        }
    };
}

pub mod keys;
pub mod map;
pub mod primary;

pub use crate::keys::Keys;
pub use crate::map::SecondaryMap;
pub use crate::primary::PrimaryMap;
