//! `dslc` CLI — thin wrapper around the orchestrator (spec §6): `analyze`, `diff`, and
//! `verify` subcommands. This binary is the only consumer of the crate that reads JSON
//! off disk; everything downstream of argument parsing uses the library's public API
//! the same way any other caller would.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use domainspec_verify::ast::Domain;
use domainspec_verify::config::VerifierConfig;
use domainspec_verify::diagnostics::Severity;
use domainspec_verify::diff::diff_domains;
use domainspec_verify::orchestrator::{Orchestrator, RunInput};
use domainspec_verify::passes::PassRunner;
use domainspec_verify::trace::Trace;

#[derive(Parser)]
#[command(name = "dslc")]
#[command(author, version, about = "Semantic analysis and verification for domain specifications", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the static passes over a spec and print its diagnostics
    Analyze {
        /// Path to the spec's AST, as JSON
        spec: PathBuf,
    },
    /// Structurally diff two spec versions
    Diff {
        /// Path to the older spec's AST, as JSON
        a: PathBuf,
        /// Path to the newer spec's AST, as JSON
        b: PathBuf,
    },
    /// Run the full pipeline — passes, trace evaluation, SMT resolution
    Verify {
        /// Path to the spec's AST, as JSON
        spec: PathBuf,
        /// Path to a JSON array of recorded execution traces
        #[arg(long)]
        traces: Option<PathBuf>,
        /// Path to a TOML config overriding solver limits and timeouts
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_domain(path: &PathBuf) -> Result<Domain, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn load_traces(path: &PathBuf) -> Result<Vec<Trace>, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn print_diagnostics(diagnostics: &[domainspec_verify::diagnostics::Diagnostic]) {
    for d in diagnostics {
        println!(
            "{}:{:?}:{}:{}:{}: {}",
            d.code, d.severity, d.location.file, d.location.line, d.location.column, d.message
        );
    }
}

fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze { spec } => {
            let domain = load_domain(&spec)?;
            let file = spec.to_string_lossy().to_string();
            let diagnostics = PassRunner::with_default_passes().run(&domain, &file)?;
            print_diagnostics(&diagnostics);
            if diagnostics.iter().any(|d| d.severity == Severity::Error) {
                Ok(ExitCode::from(1))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Commands::Diff { a, b } => {
            let old = load_domain(&a)?;
            let new = load_domain(&b)?;
            let diff = diff_domains(&old, &new);

            for (category, label) in [
                (&diff.types, "type"),
                (&diff.entities, "entity"),
                (&diff.behaviors, "behavior"),
            ] {
                for name in &category.added {
                    println!("+ {label} {name}");
                }
                for name in &category.removed {
                    println!("- {label} {name}");
                }
                for change in &category.changed {
                    println!("~ {label} {} ({:?})", change.name, change.severity);
                }
            }
            println!(
                "breakingChanges={} compatibleChanges={} patchChanges={}",
                diff.summary.breaking_changes, diff.summary.compatible_changes, diff.summary.patch_changes
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify { spec, traces, config } => {
            let domain = load_domain(&spec)?;
            let file = spec.to_string_lossy().to_string();
            let traces = match traces {
                Some(path) => load_traces(&path)?,
                None => vec![],
            };
            let verifier_config = match config {
                Some(path) => VerifierConfig::from_file(path)?,
                None => VerifierConfig::default(),
            };

            let report = Orchestrator::new(verifier_config).run(RunInput {
                domain: &domain,
                file: &file,
                traces: &traces,
            });

            print_diagnostics(&report.passes.diagnostics);
            println!(
                "proven={} violated={} notProven={} resolutionRate={:.2} durationMs={} budgetExhausted={}",
                report.summary.totals.proven,
                report.summary.totals.violated,
                report.summary.totals.not_proven,
                report.summary.resolution_rate,
                report.summary.duration_ms,
                report.summary.budget_exhausted,
            );

            if report.summary.budget_exhausted {
                Ok(ExitCode::from(3))
            } else if report
                .passes
                .diagnostics
                .iter()
                .any(|d| d.severity == Severity::Error)
            {
                Ok(ExitCode::from(1))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}
