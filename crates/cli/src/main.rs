// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tapestream_cli::commands::{read, streams, tail, verify};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tape")]
#[command(about = "Inspect a tapestream store directory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List streams and their versions
    Streams {
        #[arg(long, short)]
        dir: PathBuf,
    },
    /// Show the records of one stream
    Read {
        #[arg(long, short)]
        dir: PathBuf,

        #[arg(long, short)]
        stream: String,

        /// Only records with a version above this one
        #[arg(long, default_value_t = 0)]
        after: u64,

        #[arg(long, default_value_t = usize::MAX)]
        max: usize,
    },
    /// Show the global log in append order
    Tail {
        #[arg(long, short)]
        dir: PathBuf,

        /// Only records after this global position
        #[arg(long, default_value_t = 0)]
        after: u64,

        #[arg(long, default_value_t = 20)]
        max: usize,
    },
    /// Scan every segment and report damaged tails
    Verify {
        #[arg(long, short)]
        dir: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "tapestream=info,tapestream_events=info,tapestream_cli=info,tape=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Streams { dir } => streams::run(&dir),
        Commands::Read {
            dir,
            stream,
            after,
            max,
        } => read::run(&dir, &stream, after, max),
        Commands::Tail { dir, after, max } => tail::run(&dir, after, max),
        Commands::Verify { dir } => verify::run(&dir),
    }
}
