//! CLI binary for rendering and checking Passthrough labels.

mod config;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use config::{InputArgs, Run};

#[derive(Parser)]
#[command(name = "pt", version, about = "Render PDS4 labels from annotated type templates")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a template against its sources and write the label
    Render {
        #[command(flatten)]
        inputs: InputArgs,

        /// Output directory (default: current directory)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Output filename (default: derived from the logical identifier)
        #[arg(long)]
        filename: Option<String>,
    },

    /// Run every export check without writing anything
    Check {
        #[command(flatten)]
        inputs: InputArgs,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Render {
            inputs,
            out,
            filename,
        } => {
            let mut run = Run::from_args(inputs)?;
            run.out = out.or(run.out);
            run.filename = filename.or(run.filename);
            cmd_render(&run)?;
        }
        Commands::Check { inputs } => {
            cmd_check(&Run::from_args(inputs)?)?;
        }
    }

    Ok(())
}

fn cmd_render(run: &Run) -> anyhow::Result<()> {
    let template = run
        .builder()
        .build()
        .with_context(|| format!("failed to resolve {}", run.template.display()))?;
    let out = run.out.clone().unwrap_or_else(|| PathBuf::from("."));
    let path = template
        .export(&out, run.filename.as_deref())
        .context("label export failed")?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn cmd_check(run: &Run) -> anyhow::Result<()> {
    let template = run
        .builder()
        .build()
        .with_context(|| format!("failed to resolve {}", run.template.display()))?;
    let label = template.finalize().context("label check failed")?;
    tracing::debug!(elements = label.element_paths().len(), "label finalized");
    println!("Label is valid");
    Ok(())
}
