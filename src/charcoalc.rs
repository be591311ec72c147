//! The charcoal compiler driver.
//!
//! `charcoalc file.c` preprocesses, compiles, assembles and links a
//! single C source into an executable next to it. `-S` stops at
//! assembly, `-c` at an object file, and the `--d*` family writes the
//! intermediate representations to files next to the input, one per
//! pass:
//!
//! | flag         | dump                      | suffix        |
//! |--------------|---------------------------|---------------|
//! | `--dparse`   | parsed syntax tree        | `.parsed.c`   |
//! | `--dc`       | Clight after simpl-locals | `.compcert.c` |
//! | `--dclight`  | Clight                    | `.light.c`    |
//! | `--dcminor`  | Cminor                    | `.cminor`     |
//! | `--drtl`     | RTL, one file per round   | `.rtl.N`      |
//! | `--dltl`     | LTL                       | `.ltl`        |
//! | `--dmach`    | Mach                      | `.mach`       |
//! | `--dasm`     | assembly                  | `.s`          |

use anyhow::{bail, Context, Result};
use charcoal_tools::{emit, preprocess};
use charcoal_codegen::context::{Context as Pipeline, DumpConfig};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Parser)]
#[command(
    name = "charcoalc",
    version,
    about = "charcoal: a C compiler targeting AArch64"
)]
struct Args {
    /// Input files (.c, or preprocessed .i/.p).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Add a preprocessor include path.
    #[arg(short = 'I', value_name = "DIR")]
    includes: Vec<String>,

    /// Write the output here (single input only).
    #[arg(short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Stop after generating assembly.
    #[arg(short = 'S')]
    asm_only: bool,

    /// Stop after assembling to an object file.
    #[arg(short = 'c')]
    object_only: bool,

    /// Dump the parsed syntax tree.
    #[arg(long = "dparse")]
    dparse: bool,

    /// Dump Clight after local promotion.
    #[arg(long = "dc")]
    dc: bool,

    /// Dump Clight as elaborated.
    #[arg(long = "dclight")]
    dclight: bool,

    /// Dump Cminor.
    #[arg(long = "dcminor")]
    dcminor: bool,

    /// Dump RTL after each allocation round.
    #[arg(long = "drtl")]
    drtl: bool,

    /// Dump LTL.
    #[arg(long = "dltl")]
    dltl: bool,

    /// Dump Mach.
    #[arg(long = "dmach")]
    dmach: bool,

    /// Keep the generated assembly next to the input.
    #[arg(long = "dasm")]
    dasm: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("charcoalc: error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    if args.output.is_some() && args.inputs.len() > 1 {
        bail!("-o cannot be combined with multiple inputs");
    }
    for input in &args.inputs {
        compile_one(args, input)?;
    }
    Ok(())
}

/// The input path with its extension replaced.
fn with_suffix(input: &Path, suffix: &str) -> PathBuf {
    input.with_extension("").with_extension(
        suffix.trim_start_matches('.'),
    )
}

fn write_dump(input: &Path, suffix: &str, text: &str) -> Result<()> {
    let path = with_suffix(input, suffix);
    std::fs::write(&path, text)
        .with_context(|| format!("cannot write `{}`", path.display()))
}

fn compile_one(args: &Args, input: &Path) -> Result<()> {
    let source = preprocess::read_source(input, &args.includes)?;

    let file_name = input.to_string_lossy();
    let tokens = charcoal_reader::lexer::tokenize(&source, &file_name)
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    let ast = charcoal_reader::parser::parse(tokens).map_err(|e| anyhow::anyhow!("{}", e))?;
    if args.dparse {
        write_dump(input, "parsed.c", &format!("{:#?}\n", ast))?;
    }
    let clight =
        charcoal_reader::elab::elaborate(ast).map_err(|e| anyhow::anyhow!("{}", e))?;
    if args.dclight {
        write_dump(input, "light.c", &clight.to_string())?;
    }

    let pipeline = Pipeline::new();
    let (mach, dumps) = pipeline
        .compile(
            clight,
            DumpConfig {
                simplified: args.dc,
                cminor: args.dcminor,
                rtl: args.drtl,
                ltl: args.dltl,
                mach: args.dmach,
            },
        )
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    if let Some(text) = &dumps.simplified {
        write_dump(input, "compcert.c", text)?;
    }
    if let Some(text) = &dumps.cminor {
        write_dump(input, "cminor", text)?;
    }
    for (round, text) in dumps.rtl.iter().enumerate() {
        write_dump(input, &format!("rtl.{}", round), text)?;
    }
    if let Some(text) = &dumps.ltl {
        write_dump(input, "ltl", text)?;
    }
    if let Some(text) = &dumps.mach {
        write_dump(input, "mach", text)?;
    }

    let triple = target_lexicon::Triple::host();
    let dialect = emit::Dialect::for_triple(&triple);
    let asm = emit::emit_program(&mach, dialect);

    let asm_path = if args.asm_only {
        args.output
            .clone()
            .unwrap_or_else(|| with_suffix(input, "s"))
    } else {
        with_suffix(input, "s")
    };
    std::fs::write(&asm_path, &asm)
        .with_context(|| format!("cannot write `{}`", asm_path.display()))?;
    if args.asm_only {
        return Ok(());
    }

    // Hand the text to the system toolchain.
    let result = if args.object_only {
        let obj = args
            .output
            .clone()
            .unwrap_or_else(|| with_suffix(input, "o"));
        assemble(&asm_path, &obj)
    } else {
        let exe = args
            .output
            .clone()
            .unwrap_or_else(|| with_suffix(input, ""));
        link(&asm_path, &exe)
    };
    if !args.dasm {
        let _ = std::fs::remove_file(&asm_path);
    }
    result
}

fn assemble(asm: &Path, obj: &Path) -> Result<()> {
    let status = Command::new("cc")
        .arg("-c")
        .arg(asm)
        .arg("-o")
        .arg(obj)
        .status()
        .context("cannot run the assembler")?;
    if !status.success() {
        bail!("assembler failed on `{}`", asm.display());
    }
    Ok(())
}

fn link(asm: &Path, exe: &Path) -> Result<()> {
    let status = Command::new("cc")
        .arg(asm)
        .arg("-o")
        .arg(exe)
        .status()
        .context("cannot run the linker")?;
    if !status.success() {
        bail!("linking failed for `{}`", asm.display());
    }
    Ok(())
}
