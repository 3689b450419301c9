//! vframe - frame virtualization driver
//!
//! # Usage
//!
//! ```bash
//! # Compile a frame script and print the optimized graph
//! vframe run frame.vfs
//!
//! # Recompile as if the frame speculation had already failed
//! vframe run --failed-speculation frame.vfs
//!
//! # Graph and statistics as JSON
//! vframe run --format json frame.vfs
//!
//! # Parse and lower without running escape analysis
//! vframe check frame.vfs
//! ```

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use compiler::frame::{CallTargetId, FrameTypes, SpeculationLog, SpeculationReason, SpeculationRegistry};
use compiler::ir::dump::{dump_graph, GraphDump};
use compiler::logging;
use compiler::pipeline::{compile_graph, EscapeAnalysisConfig};
use compiler::script::{build_graph, ScriptContext};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "vframe")]
#[command(version = "0.1.0")]
#[command(about = "Frame virtualization and escape analysis driver", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a frame script through escape analysis
    Run {
        /// Path to the frame script
        file: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Keep the graph as escape analysis left it
        #[arg(long)]
        no_canonicalize: bool,

        /// Treat the frame speculation of this call target as failed
        #[arg(long)]
        failed_speculation: bool,

        /// Separate empty arrays per frame instead of shared constants
        #[arg(long)]
        no_shared_arrays: bool,
    },

    /// Parse and lower a frame script without optimizing it
    Check {
        /// Path to the frame script
        file: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    let cli = Cli::parse();
    if cli.verbose == 0 {
        logging::init_from_env();
    } else {
        logging::init_with_level(logging::level_for_verbosity(cli.verbose));
    }

    let result = match cli.command {
        Commands::Run {
            file,
            format,
            no_canonicalize,
            failed_speculation,
            no_shared_arrays,
        } => run_file(&file, format, no_canonicalize, failed_speculation, no_shared_arrays),
        Commands::Check { file } => check_file(&file),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn script_name(file: &Path) -> String {
    file.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("script")
        .to_string()
}

fn read_script(file: &Path) -> Result<String, String> {
    std::fs::read_to_string(file).map_err(|e| format!("Failed to read {}: {}", file.display(), e))
}

fn run_file(
    file: &Path,
    format: OutputFormat,
    no_canonicalize: bool,
    failed_speculation: bool,
    no_shared_arrays: bool,
) -> Result<(), String> {
    let source = read_script(file)?;
    let call_target = CallTargetId::new(1);
    let registry = SpeculationRegistry::new();
    if failed_speculation {
        registry.record_failure(SpeculationReason::frame(call_target));
    }
    let context = ScriptContext {
        call_target,
        log: SpeculationLog::new(registry),
        types: FrameTypes {
            share_empty_arrays: !no_shared_arrays,
        },
    };

    let mut graph = build_graph(&script_name(file), &source, &context)
        .map_err(|e| format!("{}:{}", file.display(), e))?;
    let config = EscapeAnalysisConfig {
        canonicalize: !no_canonicalize,
        ..EscapeAnalysisConfig::default()
    };
    let report = compile_graph(&mut graph, &config).map_err(|e| e.to_string())?;

    match format {
        OutputFormat::Text => {
            print!("{}", dump_graph(&graph));
            println!("; {}", report.escape);
            if let Some(canonicalization) = &report.canonicalization {
                println!("; canonicalization eliminated {} nodes", canonicalization.nodes_eliminated);
            }
            println!("; deopt exits: {}", report.deopt_exits);
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "graph": GraphDump::new(&graph),
                "escape": report.escape,
                "deopt_exits": report.deopt_exits,
            });
            let text = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
            println!("{}", text);
        }
    }
    Ok(())
}

fn check_file(file: &Path) -> Result<(), String> {
    let source = read_script(file)?;
    let graph = build_graph(&script_name(file), &source, &ScriptContext::default())
        .map_err(|e| format!("{}:{}", file.display(), e))?;
    println!(
        "{}: ok ({} nodes, {} scheduled)",
        file.display(),
        graph.node_count(),
        graph.schedule().len()
    );
    Ok(())
}
