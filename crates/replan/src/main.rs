//! replan: decide which sources of a module must recompile.
//!
//! Reads the input list, the prior build record, the output file map, and
//! the per-source dependency summaries a previous compilation emitted, and
//! prints the first-wave plan as JSON. The driver embedding the planner
//! library gets the same answer programmatically; this binary exists for
//! inspection and for wiring the planner into scripted builds.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use itertools::Itertools;
use mimalloc::MiMalloc;
use replan_graph::ModuleDepGraph;
use replan_schedule::{IncrementalSetup, PlanOptions, SetupOutcome};
use replan_schemas::{OutputFileMap, ReadError, SourceSummary};
use serde_json::json;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

// Use mimalloc for better performance on allocation-heavy graph builds.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Incremental compilation planner: given a prior build record and
/// per-source dependency summaries, decide which sources must recompile
/// and which can be skipped.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    command: Commands,
}

/// Planner options shared by the subcommands, mapping 1:1 to the
/// recognised driver flags.
#[derive(Debug, clap::Args)]
struct OptionFlags {
    /// Treat every changed input as cascading
    #[arg(long)]
    always_rebuild_dependents: bool,

    /// Emit queuing/skipping/scheduling remarks
    #[arg(long)]
    show_incremental: bool,

    /// Emit per-job lifecycle remarks
    #[arg(long)]
    show_job_lifecycle: bool,

    /// Capture a Graphviz snapshot after every integration
    #[arg(long)]
    emit_dot_after_integration: bool,

    /// Re-verify graph invariants after every integration
    #[arg(long)]
    verify_after_integration: bool,
}

impl OptionFlags {
    fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            always_rebuild_dependents: self.always_rebuild_dependents,
            show_incremental: self.show_incremental,
            show_job_lifecycle: self.show_job_lifecycle,
            emit_dot_after_integration: self.emit_dot_after_integration,
            verify_after_integration: self.verify_after_integration,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the first-wave plan for a set of inputs
    ///
    /// Prints the mandatory and skipped sets as JSON on stdout; remarks go
    /// to stderr.
    Plan {
        /// Source inputs, in command-line order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Path to the prior build record
        #[arg(long, value_name = "PATH")]
        record: Option<PathBuf>,

        /// Path to the output file map
        #[arg(long, value_name = "PATH")]
        output_map: Option<PathBuf>,

        #[command(flatten)]
        flags: OptionFlags,

        /// Output file path (writes to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Print the module dependency graph as Graphviz source
    ///
    /// Builds the graph from the recorded summaries without planning
    /// anything.
    Dot {
        /// Source inputs, in command-line order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Path to the output file map
        #[arg(long, value_name = "PATH")]
        output_map: PathBuf,

        /// Output file path (writes to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize structured logging. Output goes to stderr so JSON output
    // on stdout remains clean for piping. Default to warn, allowlist our
    // crates.
    const CRATES: &[&str] =
        &["replan", "replan_graph", "replan_schedule", "replan_schemas"];
    let level = cli.verbose.tracing_level_filter();
    let allowlist = CRATES.iter().map(|c| format!("{c}={level}")).join(",");
    let filter = EnvFilter::new(format!("warn,{allowlist}"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE)
        .init();

    match cli.command {
        Commands::Plan {
            inputs,
            record,
            output_map,
            flags,
            output,
        } => run_plan(inputs, record, output_map, &flags, output),
        Commands::Dot {
            inputs,
            output_map,
            output,
        } => run_dot(&inputs, &output_map, output),
    }
}

fn run_plan(
    inputs: Vec<PathBuf>,
    record: Option<PathBuf>,
    output_map: Option<PathBuf>,
    flags: &OptionFlags,
    output: Option<String>,
) -> Result<()> {
    let setup = IncrementalSetup {
        inputs: inputs.clone(),
        record_path: record,
        output_map_path: output_map,
        options: flags.plan_options(),
    };

    let value = match setup.prepare() {
        SetupOutcome::Disabled { reason, remarks } => {
            for remark in &remarks {
                eprintln!("{remark}");
            }
            // Incremental mode is off: everything compiles.
            json!({
                "incremental": false,
                "reason": reason,
                "mandatory": inputs,
                "skipped": [],
            })
        }
        SetupOutcome::Ready(planner) => {
            let wave = planner.plan();
            for remark in &wave.remarks {
                eprintln!("{remark}");
            }
            json!({
                "incremental": true,
                "mandatory": wave.mandatory_jobs,
                "skipped": wave.skipped,
                "reasons": wave.reasons,
            })
        }
    };

    let mut writer = open_output(output)?;
    writeln!(writer, "{}", serde_json::to_string_pretty(&value)?)?;
    Ok(())
}

fn run_dot(
    inputs: &[PathBuf],
    output_map: &std::path::Path,
    output: Option<String>,
) -> Result<()> {
    let map = OutputFileMap::read(output_map).with_context(|| {
        format!("reading output file map {}", output_map.display())
    })?;

    let mut graph = ModuleDepGraph::new();
    for input in inputs {
        let summary_path = map.summary_path(input).with_context(|| {
            format!("no summary path reserved for {}", input.display())
        })?;
        graph.register_source(input, summary_path)?;
        match SourceSummary::read(summary_path) {
            Ok(summary) => {
                graph.integrate(input, &summary, &Default::default())?;
            }
            Err(ReadError::Io(err))
                if err.kind() == std::io::ErrorKind::NotFound =>
            {
                // Never-compiled inputs simply have no nodes yet.
                continue;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("reading summary for {}", input.display())
                });
            }
        }
    }

    let mut writer = open_output(output)?;
    writeln!(writer, "{}", graph.to_dot())?;
    Ok(())
}

/// Opens the output target: a file when a path was given, stdout
/// otherwise.
fn open_output(path: Option<String>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(&path)
                .with_context(|| format!("creating output file {path}"))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    })
}
