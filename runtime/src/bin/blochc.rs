// runtime/src/bin/blochc.rs - CLI driver for the Bloch quantum language
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use bloch_compiler::error::BlochError;
use bloch_compiler::CompiledProgram;
use bloch_runtime::evaluator::RuntimeEvaluator;
use bloch_runtime::ExecutionReport;

const APP_NAME: &str = "blochc";

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(author = "Bloch Team")]
#[command(version = clap::crate_version!())]
#[command(about = "Bloch quantum programming language compiler and runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, help = "Disable colored output")]
    no_color: bool,

    #[arg(short, long, global = true, help = "Verbose output")]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and execute a Bloch source file
    #[command(arg_required_else_help = true)]
    Run {
        /// Input .bloch file
        input: PathBuf,

        /// Where to write the generated QASM (defaults to the input path with a .qasm extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the @shots(N) annotation on main, if any
        #[arg(long)]
        shots: Option<u64>,

        /// Output format for the tracked-outcome summary
        #[arg(short = 'f', long, default_value = "table")]
        format: ReportFormat,
    },

    /// Validate syntax and semantics without executing
    Check {
        /// Input .bloch files
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Print the parsed AST for each file
        #[arg(long)]
        ast: bool,
    },

    /// Show compiler and runtime version info
    Version,

    /// Show the set of quantum gates and language capabilities
    Capabilities,
}

#[derive(ValueEnum, Clone, Debug)]
enum ReportFormat {
    Table,
    Json,
}

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let result = match &cli.command {
        Commands::Run { input, output, shots, format } => run_file(input, output.as_deref(), *shots, format, cli.verbose),
        Commands::Check { input, ast } => check_files(input, *ast),
        Commands::Version => {
            show_version(cli.verbose);
            Ok(())
        }
        Commands::Capabilities => {
            show_capabilities();
            Ok(())
        }
    };

    if let Err(message) = result {
        eprintln!("{}", "Stopping program execution...".red().bold());
        eprintln!("{}", message);
        std::process::exit(1);
    }
}

fn show_version(verbose: bool) {
    println!("{} {} ({})", APP_NAME, clap::crate_version!(), bloch_compiler::build_timestamp());
    if verbose {
        println!("Commit:  {}", bloch_compiler::git_commit_hash());
        println!("License: Apache-2.0");
    }
}

fn show_capabilities() {
    println!("{}", "Bloch capabilities:".bold());
    for cap in [
        "Classes with single inheritance, abstract classes, virtual/override dispatch",
        "Generic classes, instantiated lazily per distinct type-argument tuple",
        "Built-in gates: h, x, y, z, rx, ry, rz, cx",
        "Tracked variables and fields (@tracked), aggregated across shots",
        "Background mark-and-sweep collector for cyclic object graphs",
        "OpenQASM 2.0 emission",
    ] {
        println!(" - {}", cap);
    }
}

fn check_files(inputs: &[PathBuf], show_ast: bool) -> Result<(), String> {
    println!("{} Syntax and semantic check", "[INFO]".blue().bold());
    let mut failed = 0usize;

    for path in inputs {
        let source = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                println!("{} {}: {}", "[ERR]".red().bold(), path.display(), e);
                failed += 1;
                continue;
            }
        };

        match bloch_compiler::compile(&source) {
            Ok(compiled) => {
                println!("{} {}: OK", "[OK]".green().bold(), path.display());
                if show_ast {
                    println!("{:#?}", compiled.program);
                }
            }
            Err(e) => {
                println!("{} {}: {}", "[ERR]".red().bold(), path.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} of {} file(s) failed", failed, inputs.len()));
    }
    Ok(())
}

fn run_file(
    input: &Path,
    output: Option<&Path>,
    shots_override: Option<u64>,
    format: &ReportFormat,
    verbose: bool,
) -> Result<(), String> {
    let source = fs::read_to_string(input).map_err(|e| format!("Generic error: could not read {}: {}", input.display(), e))?;

    let compiled: CompiledProgram = bloch_compiler::compile(&source).map_err(|e| e.to_string())?;
    let shots = shots_override.or(compiled.program.shots).unwrap_or(1);

    let start = Instant::now();
    let mut aggregate: HashMap<String, HashMap<String, u64>> = HashMap::new();
    let mut last_qasm = String::new();

    let progress = if shots > 1 {
        let pb = ProgressBar::new(shots);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} shots {msg}")
            .unwrap()
            .progress_chars("█▓▒░");
        pb.set_style(style);
        Some(pb)
    } else {
        None
    };

    for shot in 1..=shots {
        let report: ExecutionReport = run_single_shot(&compiled).map_err(|e| format!("{} (shot {}/{})", e, shot, shots))?;
        for line in &report.echo_lines {
            println!("{}", line);
        }
        merge_tracked(&mut aggregate, &report.tracked_outcomes);
        last_qasm = report.qasm;
        if let Some(pb) = &progress {
            pb.inc(1);
        }
    }

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let output_path = output.map(PathBuf::from).unwrap_or_else(|| input.with_extension("qasm"));
    fs::write(&output_path, &last_qasm).map_err(|e| format!("Generic error: could not write {}: {}", output_path.display(), e))?;

    if verbose {
        println!(
            "{} Ran {} shot(s) in {:.4}s, wrote {}",
            "[OK]".green().bold(),
            shots,
            start.elapsed().as_secs_f64(),
            output_path.display()
        );
    } else {
        println!("{} Output written to {}", "[OK]".green().bold(), output_path.display());
    }

    match format {
        ReportFormat::Table => print_aggregate_table(&aggregate),
        ReportFormat::Json => print_aggregate_json(&aggregate, shots)?,
    }

    Ok(())
}

/// Builds and executes one fresh evaluator from the shared `CompiledProgram`
/// so each shot starts from identical, unshared state. Shots execute
/// serially, one evaluator at a time.
fn run_single_shot(compiled: &CompiledProgram) -> Result<ExecutionReport, BlochError> {
    let evaluator = RuntimeEvaluator::new(&compiled.program, compiled.registry.clone());
    evaluator.execute()
}

fn merge_tracked(into: &mut HashMap<String, HashMap<String, u64>>, from: &HashMap<String, HashMap<String, u64>>) {
    for (label, outcomes) in from {
        let entry = into.entry(label.clone()).or_default();
        for (outcome, count) in outcomes {
            *entry.entry(outcome.clone()).or_insert(0) += count;
        }
    }
}

/// Orders outcome strings binary-first (grouped by bit width, then numeric
/// value), with non-binary outcomes (e.g. `"?"`) sorted lexicographically
/// and placed last.
fn outcome_rank(outcome: &str) -> (u8, usize, u64, &str) {
    let is_binary = !outcome.is_empty() && outcome.chars().all(|c| c == '0' || c == '1');
    if is_binary {
        let value = u64::from_str_radix(outcome, 2).unwrap_or(0);
        (0, outcome.len(), value, outcome)
    } else {
        (1, 0, 0, outcome)
    }
}

fn sorted_outcomes(outcomes: &HashMap<String, u64>) -> Vec<(&str, u64)> {
    let mut rows: Vec<(&str, u64)> = outcomes.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    rows.sort_by_key(|(outcome, _)| outcome_rank(outcome));
    rows
}

fn print_aggregate_table(aggregate: &HashMap<String, HashMap<String, u64>>) {
    if aggregate.is_empty() {
        return;
    }
    let mut labels: Vec<&String> = aggregate.keys().collect();
    labels.sort();

    for label in labels {
        let outcomes = &aggregate[label];
        let total: u64 = outcomes.values().sum();
        println!("\n{}", label.bold().underline());
        println!("{:<10} | {:<8} | {:<6}", "outcome", "count", "prob");
        println!("{:-<30}", "-");
        for (outcome, count) in sorted_outcomes(outcomes) {
            let prob = if total == 0 { 0.0 } else { count as f64 / total as f64 };
            println!("{:<10} | {:<8} | {:.4}", outcome, count, prob);
        }
    }
}

#[derive(Serialize)]
struct OutcomeRow {
    outcome: String,
    count: u64,
    prob: f64,
}

#[derive(Serialize)]
struct LabelReport {
    label: String,
    total: u64,
    outcomes: Vec<OutcomeRow>,
}

#[derive(Serialize)]
struct AggregateReport {
    shots: u64,
    labels: Vec<LabelReport>,
}

fn print_aggregate_json(aggregate: &HashMap<String, HashMap<String, u64>>, shots: u64) -> Result<(), String> {
    let mut labels: Vec<&String> = aggregate.keys().collect();
    labels.sort();

    let report = AggregateReport {
        shots,
        labels: labels
            .into_iter()
            .map(|label| {
                let outcomes = &aggregate[label];
                let total: u64 = outcomes.values().sum();
                let rows = sorted_outcomes(outcomes)
                    .into_iter()
                    .map(|(outcome, count)| OutcomeRow {
                        outcome: outcome.to_string(),
                        count,
                        prob: if total == 0 { 0.0 } else { count as f64 / total as f64 },
                    })
                    .collect();
                LabelReport { label: label.clone(), total, outcomes: rows }
            })
            .collect(),
    };

    let text = serde_json::to_string_pretty(&report).map_err(|e| format!("Generic error: {}", e))?;
    println!("{}", text);
    Ok(())
}
