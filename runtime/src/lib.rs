//! Tree-walking evaluator for compiled Bloch programs: runtime values,
//! the heap and its background collector, qubit bookkeeping, lexical
//! scoping, and the evaluator itself.

pub mod classes;
pub mod environment;
pub mod evaluator;
pub mod heap;
pub mod qubits;
pub mod value;

pub use evaluator::{ExecutionReport, RuntimeEvaluator};

use bloch_compiler::error::BlochResult;
use bloch_compiler::CompiledProgram;

/// Runs a single shot of a compiled program to completion. Callers
/// orchestrating multiple shots construct a fresh evaluator per shot
/// from the same `CompiledProgram` so each shot starts from identical,
/// unshared state.
pub fn run(compiled: &CompiledProgram) -> BlochResult<ExecutionReport> {
    let evaluator = RuntimeEvaluator::new(&compiled.program, compiled.registry.clone());
    evaluator.execute()
}
