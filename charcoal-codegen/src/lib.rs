//! Charcoal code generation library.
//!
//! This crate is the core of the charcoal C compiler: a tower of
//! intermediate representations in the CompCert tradition, and the passes
//! that lower a typed C-level program (`Clight`) step by step into a
//! near-assembly program (`Mach`) with explicit activation records.
//!
//! The pipeline, leaves first:
//!
//! * `simpl_locals` — promote address-not-taken locals to temporaries
//! * `cshmgen` — drop C types, lower l-values to chunked loads and stores
//! * `cminorgen` — stack-frame layout, exit-indexed blocks, switch lowering
//! * `selection` — addressing modes, combined operations, condition trees
//! * `rtlgen` — a control-flow graph of three-address code
//! * `regalloc` — liveness, interference, IRC colouring, spilling
//! * `linearize` + `stacking` — block ordering and concrete frames
//!
//! Each pass is a total function from one IR to the next. Passes return
//! error values through [`CodegenResult`]; none of them performs I/O.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use charcoal_entity as entity;

pub mod context;
pub mod ir;
pub mod isa;
pub mod symbols;

mod result;

pub mod cminorgen;
pub mod cshmgen;
pub mod linearize;
pub mod regalloc;
pub mod rtlgen;
pub mod selection;
pub mod simpl_locals;
pub mod stacking;

pub use crate::result::{CodegenError, CodegenResult};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
