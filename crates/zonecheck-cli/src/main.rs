//! Command-line interface for the zonecheck model checker.

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zonecheck_explore::{couvscc, covreach, Covering, Graph, SearchOrder};
use zonecheck_system::System;
use zonecheck_zg::{Extrapolation, Semantics, Ts, Zg};

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("{0}")]
    Decl(#[from] zonecheck_system::decl::DeclError),

    #[error("{0}")]
    System(#[from] zonecheck_system::SystemError),

    #[error("failed to write {path}: {message}")]
    Output { path: String, message: String },
}

type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "zonecheck", version)]
#[command(about = "Zone-based model checker for networks of timed processes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrderArg {
    Bfs,
    Dfs,
}

impl From<OrderArg> for SearchOrder {
    fn from(order: OrderArg) -> SearchOrder {
        match order {
            OrderArg::Bfs => SearchOrder::Bfs,
            OrderArg::Dfs => SearchOrder::Dfs,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CoveringArg {
    Full,
    Leaf,
}

impl From<CoveringArg> for Covering {
    fn from(covering: CoveringArg) -> Covering {
        match covering {
            CoveringArg::Full => Covering::Full,
            CoveringArg::Leaf => Covering::LeafNodes,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SemanticsArg {
    Standard,
    Elapsed,
}

impl From<SemanticsArg> for Semantics {
    fn from(semantics: SemanticsArg) -> Semantics {
        match semantics {
            SemanticsArg::Standard => Semantics::Standard,
            SemanticsArg::Elapsed => Semantics::Elapsed,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExtrapolationArg {
    K,
    Lu,
    LuLocal,
}

impl From<ExtrapolationArg> for Extrapolation {
    fn from(extrapolation: ExtrapolationArg) -> Extrapolation {
        match extrapolation {
            ExtrapolationArg::K => Extrapolation::K,
            ExtrapolationArg::Lu => Extrapolation::Lu,
            ExtrapolationArg::LuLocal => Extrapolation::LuLocal,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Subsumption-based reachability of labeled states
    Reach {
        /// System declaration file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Accepting labels, comma-separated
        #[arg(short, long, default_value = "")]
        labels: String,

        /// Waiting set policy
        #[arg(long, value_enum, default_value_t = OrderArg::Bfs)]
        search_order: OrderArg,

        /// Covering policy
        #[arg(long, value_enum, default_value_t = CoveringArg::Full)]
        covering: CoveringArg,

        /// Zone graph semantics
        #[arg(long, value_enum, default_value_t = SemanticsArg::Elapsed)]
        semantics: SemanticsArg,

        /// Extrapolation policy
        #[arg(long, value_enum, default_value_t = ExtrapolationArg::LuLocal)]
        extrapolation: ExtrapolationArg,

        /// Objects allocated per pool block
        #[arg(long, default_value = "10000")]
        block_size: usize,

        /// Initial capacity of the sharing tables
        #[arg(long, default_value = "65536")]
        table_size: usize,

        /// Write the reachability graph in dot format to this file
        #[arg(long, value_name = "PATH")]
        dot: Option<PathBuf>,
    },

    /// Couvreur's SCC search for an accepting cycle
    Liveness {
        /// System declaration file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Accepting labels, comma-separated
        #[arg(short, long, default_value = "")]
        labels: String,

        /// Zone graph semantics
        #[arg(long, value_enum, default_value_t = SemanticsArg::Elapsed)]
        semantics: SemanticsArg,

        /// Extrapolation policy
        #[arg(long, value_enum, default_value_t = ExtrapolationArg::LuLocal)]
        extrapolation: ExtrapolationArg,

        /// Objects allocated per pool block
        #[arg(long, default_value = "10000")]
        block_size: usize,

        /// Initial capacity of the sharing tables
        #[arg(long, default_value = "65536")]
        table_size: usize,

        /// Write the liveness graph in dot format to this file
        #[arg(long, value_name = "PATH")]
        dot: Option<PathBuf>,
    },
}

fn make_zg(
    file: &Path,
    labels: &str,
    semantics: SemanticsArg,
    extrapolation: ExtrapolationArg,
    block_size: usize,
    table_size: usize,
) -> CliResult<(Zg, u64)> {
    let text = fs::read_to_string(file).map_err(|e| CliError::Io {
        path: file.display().to_string(),
        message: e.to_string(),
    })?;
    let decl = zonecheck_system::decl::parse(&text)?;
    let system = Arc::new(System::new(&decl)?);
    let accepting = system.labels_mask(labels)?;
    let zg = Zg::new(
        system,
        semantics.into(),
        extrapolation.into(),
        block_size,
        table_size,
        true,
    );
    Ok((zg, accepting))
}

/// Dump the graph in dot format, nodes in the lexical state order of the
/// zone graph that produced them.
fn write_dot<T: Ts>(ts: &T, graph: &Graph, name: &str, path: &Path) -> CliResult<()> {
    let mut out = String::new();
    graph
        .dot_output(&mut out, name, |a, b| {
            ts.state_cmp(graph.node(a).state, graph.node(b).state)
        })
        .expect("write to String cannot fail");
    fs::write(path, out).map_err(|e| CliError::Output {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn graph_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().replace(['-', '.'], "_"))
        .unwrap_or_else(|| "system".to_string())
}

fn run(cli: Cli) -> CliResult<()> {
    match cli.command {
        Commands::Reach {
            file,
            labels,
            search_order,
            covering,
            semantics,
            extrapolation,
            block_size,
            table_size,
            dot,
        } => {
            info!(file = %file.display(), labels = %labels, "running reachability");
            let (mut zg, accepting) =
                make_zg(&file, &labels, semantics, extrapolation, block_size, table_size)?;
            let (stats, graph) =
                covreach(&mut zg, accepting, search_order.into(), covering.into());
            println!("{}", stats);
            if let Some(path) = dot {
                write_dot(&zg, &graph, &graph_name(&file), &path)?;
            }
        }
        Commands::Liveness {
            file,
            labels,
            semantics,
            extrapolation,
            block_size,
            table_size,
            dot,
        } => {
            info!(file = %file.display(), labels = %labels, "running liveness");
            let (mut zg, accepting) =
                make_zg(&file, &labels, semantics, extrapolation, block_size, table_size)?;
            let (stats, graph) = couvscc(&mut zg, accepting);
            println!("{}", stats);
            if let Some(path) = dot {
                write_dot(&zg, &graph, &graph_name(&file), &path)?;
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("zonecheck: {}", e);
            ExitCode::FAILURE
        }
    }
}
