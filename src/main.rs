//! convfsm - Conversation protocol compiler
//!
//! Compiles multi-party conversation protocols into the automata runtime
//! monitors check message traffic against.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::{Config, OutputFormat, CONFIG_ENV};
use convfsm_core::RepeatMode;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "convfsm")]
#[command(about = "Compiles conversation protocols into monitor automata")]
#[command(version)]
struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a protocol and print the automaton
    Compile {
        /// Protocol JSON file ("-" reads stdin)
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, env = "CONVFSM_FORMAT")]
        format: Option<OutputFormat>,

        /// Repeat wiring: loop (back-edge) or once
        #[arg(short, long, env = "CONVFSM_REPEAT")]
        repeat: Option<RepeatMode>,

        /// Print the construction trace
        #[arg(short, long)]
        trace: bool,
    },

    /// Compile a protocol and print a structural summary
    Inspect {
        /// Protocol JSON file ("-" reads stdin)
        file: PathBuf,

        /// Repeat wiring: loop (back-edge) or once
        #[arg(short, long, env = "CONVFSM_REPEAT")]
        repeat: Option<RepeatMode>,
    },

    /// Print the effective configuration as YAML
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var(CONFIG_ENV) {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };

    colored::control::set_override(config.output.color && !cli.no_color);

    match commands::execute(cli.command, &config) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
