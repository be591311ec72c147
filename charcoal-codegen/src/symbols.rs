//! Interned symbol names.
//!
//! Global variables, functions, labels and struct tags are referenced by
//! name across every IR in the pipeline. Names are interned process-wide so
//! that symbol comparison is pointer identity and the IRs stay `Copy`-light.
//! New symbols are minted by the front-end and by `cshmgen` (string-literal
//! labels); the passes only read them.

use internment::Intern;

/// An interned symbol name.
///
/// `Display` prints the original spelling.
pub type Symbol = Intern<String>;

/// Intern `name`, returning its symbol.
pub fn symbol(name: &str) -> Symbol {
    Intern::from_ref(name)
}

/// Mint the label for the `n`-th hoisted string literal.
///
/// Labels are stable within a program compilation: the first literal
/// encountered is `__stringlit_1`, and so on.
pub fn string_literal_label(n: u32) -> Symbol {
    symbol(&format!("__stringlit_{}", n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity() {
        assert_eq!(symbol("main"), symbol("main"));
        assert_ne!(symbol("main"), symbol("mainn"));
        assert_eq!(symbol("main").to_string(), "main");
    }

    #[test]
    fn literal_labels() {
        assert_eq!(string_literal_label(1).to_string(), "__stringlit_1");
        assert_eq!(string_literal_label(12).to_string(), "__stringlit_12");
    }
}
