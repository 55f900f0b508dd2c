//! Front end for the Bloch quantum programming language: lexer, parser,
//! semantic analyser, and the statevector QASM simulator the runtime
//! evaluator drives for quantum primitives.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod semantics;
pub mod simulator;

use std::time::SystemTime;

pub use error::{BlochError, BlochResult};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// UTC build timestamp, computed at call time rather than baked in by
/// `build.rs` so a long-running host (e.g. the CLI's `--version` flag)
/// always reports the moment it was asked, not the moment it was built.
pub fn build_timestamp() -> String {
    let now = SystemTime::now();
    let dt = chrono::DateTime::<chrono::Utc>::from(now);
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Short git commit hash baked in by `build.rs`, or `"unknown"` outside a
/// git checkout.
pub fn git_commit_hash() -> String {
    env!("GIT_HASH").to_string()
}

/// The output of a successful front-end run: the parsed program plus the
/// class registry built during semantic analysis, ready for
/// `bloch-runtime` to evaluate.
pub struct CompiledProgram {
    pub program: ast::Program,
    pub registry: semantics::ClassRegistry,
}

/// Runs the full front end over `source`: lex, parse, then both phases
/// of semantic analysis. Fails fast on the first error encountered in
/// any stage.
pub fn compile(source: &str) -> BlochResult<CompiledProgram> {
    let program = parser::parse(source)?;
    let registry = semantics::analyze(&program)?;
    Ok(CompiledProgram { program, registry })
}
