//! The compilation pipeline.
//!
//! A thin driver chaining the passes in order. Debug dumps are captured
//! as printed text on request and handed back to the caller; the library
//! itself never touches the filesystem.

use crate::ir::{clight, mach};
use crate::CodegenResult;
use crate::{cminorgen, cshmgen, regalloc, rtlgen, selection, simpl_locals, stacking};

/// Which intermediate programs to capture as text.
#[derive(Clone, Copy, Debug, Default)]
pub struct DumpConfig {
    /// Clight after `simpl_locals` (`--dc`).
    pub simplified: bool,
    /// Cminor (`--dcminor`).
    pub cminor: bool,
    /// RTL, one capture per allocation round (`--drtl`).
    pub rtl: bool,
    /// LTL (`--dltl`).
    pub ltl: bool,
    /// Mach (`--dmach`).
    pub mach: bool,
}

/// Captured dump text.
#[derive(Debug, Default)]
pub struct Dumps {
    /// Clight after `simpl_locals`.
    pub simplified: Option<String>,
    /// Cminor.
    pub cminor: Option<String>,
    /// RTL per round; round 0 is the RTLgen output.
    pub rtl: Vec<String>,
    /// LTL.
    pub ltl: Option<String>,
    /// Mach.
    pub mach: Option<String>,
}

/// The compilation context.
///
/// Stateless today; it exists so that per-process resources (and a future
/// per-function parallel driver) have a home.
#[derive(Default)]
pub struct Context;

impl Context {
    /// Create a compilation context.
    pub fn new() -> Self {
        Context
    }

    /// Lower a Clight program all the way to Mach.
    pub fn compile(
        &self,
        prog: clight::Program,
        config: DumpConfig,
    ) -> CodegenResult<(mach::Program, Dumps)> {
        let mut dumps = Dumps::default();

        let prog = simpl_locals::run(prog);
        if config.simplified {
            dumps.simplified = Some(prog.to_string());
        }

        let prog = cshmgen::run(prog)?;
        let prog = cminorgen::run(prog);
        if config.cminor {
            dumps.cminor = Some(prog.to_string());
        }

        let prog = selection::run(prog);
        let prog = rtlgen::run(prog);

        let mut rounds = Vec::new();
        let prog = regalloc::run_with_dumps(prog, &mut rounds);
        if config.rtl {
            dumps.rtl = rounds;
        }
        if config.ltl {
            dumps.ltl = Some(prog.to_string());
        }

        let prog = stacking::run(prog);
        if config.mach {
            dumps.mach = Some(prog.to_string());
        }

        Ok((prog, dumps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::clight::{CType, Expr, Function, IntSize, Signedness, Stmt};

    fn int() -> CType {
        CType::Int(IntSize::I32, Signedness::Signed)
    }

    /// `int main() { return 42; }` survives the whole pipeline.
    #[test]
    fn minimal_program_compiles() {
        let main = Function {
            ret: int(),
            params: vec![],
            param_temps: vec![],
            vars: vec![],
            temps: vec![],
            variadic: false,
            body: Stmt::Sreturn(Some(Expr::EconstInt(42, int()))),
        };
        let mut prog = clight::Program::default();
        prog.functions.push((crate::symbols::symbol("main"), main));

        let ctx = Context::new();
        let (mach, dumps) = ctx
            .compile(
                prog,
                DumpConfig {
                    rtl: true,
                    mach: true,
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(mach.functions.len(), 1);
        let f = &mach.functions[0].1;
        // A frameless leaf returning a constant.
        assert_eq!(f.stacksize % 16, 0);
        assert!(f
            .body
            .iter()
            .any(|i| matches!(i, crate::ir::mach::Inst::Mreturn)));
        assert!(!dumps.rtl.is_empty());
        assert!(dumps.mach.is_some());
    }
}
