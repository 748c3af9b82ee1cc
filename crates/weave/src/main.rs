//! weave CLI - Main entry point

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "weave")]
#[command(version)]
#[command(about = "Render block-structured text templates with embedded Lua", long_about = None)]
struct Cli {
    /// Template file (reads standard input when omitted)
    input: Option<PathBuf>,

    /// Write output to FILE, or into DIR under the template's name
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Variable binding (KEY:VALUE); VALUE is parsed as JSON when possible
    #[arg(short = 'M', long = "metadata", value_name = "KEY:VALUE")]
    metadata: Vec<String>,

    /// Strip leading whitespace from every non-blank output line
    #[arg(long)]
    eat_whitespaces: bool,

    /// Drop emitted text consisting only of a blank line
    #[arg(long)]
    eat_blanklines: bool,

    /// Disable colored diagnostics
    #[arg(long)]
    no_color: bool,

    /// Run the engine's self-checks and exit
    #[arg(short = 't', long)]
    test: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weave=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if cli.no_color {
        weave_template::set_color_enabled(false);
    }

    if cli.test {
        return commands::check::execute();
    }

    commands::render::execute(commands::render::RenderArgs {
        input: cli.input,
        output: cli.output,
        metadata: cli.metadata,
        eat_whitespaces: cli.eat_whitespaces,
        eat_blanklines: cli.eat_blanklines,
    })
}
