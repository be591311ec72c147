//! Driver-side pieces of the charcoal compiler: assembly emission from
//! Mach and the external-preprocessor plumbing. The `charcoalc` binary is
//! a thin CLI over this and the `charcoal-reader`/`charcoal-codegen`
//! crates.

pub mod emit;
pub mod preprocess;
