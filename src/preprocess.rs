//! External preprocessor invocation.
//!
//! `.c` sources are piped through the first available of `cc`, `gcc`,
//! `clang` with `-E`; `.i` and `.p` files are taken as already
//! preprocessed. A failing preprocessor aborts the compilation with its
//! stderr passed through verbatim.

use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use std::process::Command;

/// Candidate preprocessor drivers, in preference order.
const DRIVERS: [&str; 3] = ["cc", "gcc", "clang"];

/// Is `path` already preprocessed, by extension?
pub fn is_preprocessed(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("i") | Some("p")
    )
}

/// Read `path`, preprocessing it if necessary. `includes` are `-I` paths.
pub fn read_source(path: &Path, includes: &[String]) -> Result<String> {
    if is_preprocessed(path) {
        return std::fs::read_to_string(path)
            .with_context(|| format!("cannot read `{}`", path.display()));
    }
    preprocess(path, includes)
}

fn preprocess(path: &Path, includes: &[String]) -> Result<String> {
    let driver = DRIVERS
        .iter()
        .find(|d| {
            Command::new(d)
                .arg("--version")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("no C preprocessor found (tried {})", DRIVERS.join(", ")))?;

    let mut cmd = Command::new(driver);
    cmd.arg("-E");
    for dir in includes {
        cmd.arg(format!("-I{}", dir));
    }
    cmd.arg(path);

    log::debug!("preprocess: {:?}", cmd);
    let output = cmd
        .output()
        .with_context(|| format!("cannot run `{}`", driver))?;
    if !output.status.success() {
        // The preprocessor's own diagnostics are the message.
        bail!("{}", String::from_utf8_lossy(&output.stderr));
    }
    String::from_utf8(output.stdout).context("preprocessor produced invalid UTF-8")
}
