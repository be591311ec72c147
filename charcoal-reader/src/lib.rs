//! Charcoal C front-end.
//!
//! Reads preprocessed C text and produces a typed Clight program for the
//! back-end. Three stages:
//!
//! * [`lexer`] — hand-written scanner; honours `#line` directives and GCC
//!   linemarkers so diagnostics point into the original files;
//! * [`parser`] — recursive descent with precedence climbing, producing a
//!   syntax tree that still looks like C;
//! * [`elab`] — type checking and lowering: usual arithmetic conversions
//!   become explicit casts, side effects move out of expressions,
//!   initialisers become assignments, and the result is Clight.
//!
//! The supported language is the charcoal subset: no `typedef`, `enum`,
//! `union`, bitfields or variadic definitions; see the crate
//! documentation of each stage for details.

#![deny(missing_docs)]

pub mod error;

pub mod ast;
pub mod elab;
pub mod lexer;
pub mod parser;

pub use crate::error::{Location, ParseError, ParseResult};

use charcoal_codegen::ir::clight;

/// Parse and elaborate a whole preprocessed translation unit.
///
/// `file` names the input for diagnostics until the first linemarker
/// overrides it.
pub fn parse_program(source: &str, file: &str) -> ParseResult<clight::Program> {
    let tokens = lexer::tokenize(source, file)?;
    let ast = parser::parse(tokens)?;
    elab::elaborate(ast)
}
