// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use lmq_app::AppConfig;
use lmq_common_telemetry::{logging::init_global_logging, panic_hook::set_panic_hook};
use snafu::{ResultExt, Whatever};

mod build_info;

#[derive(Debug, Parser)]
#[clap(
name = "lmq",
about= "Lightweight message queue",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION,
long_version = build_info::LONG_VERSION)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Server(ServerArgs),
    Compact(CompactArgs),
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    /// Configuration file (TOML, JSON or YAML); `LMQ__*` variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl ConfigArgs {
    fn load(&self) -> Result<AppConfig, Whatever> {
        AppConfig::load(self.config.as_deref()).with_whatever_context(|_| {
            format!("Failed to load configuration {:?}", self.config)
        })
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Starts the lmq server: replays the recovery log, then serves the queue
routes until Ctrl+C or SIGTERM.
Examples:

lmq server --config lmq.toml

")]
struct ServerArgs {
    #[command(flatten)]
    config: ConfigArgs,
}

impl ServerArgs {
    async fn run(&self) -> Result<(), Whatever> {
        let config = self.config.load()?;
        let _guards = init_global_logging("lmq", &config.logging);
        set_panic_hook();

        config.open().run().await
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Compacts the recovery log. A running server may keep writing: the newest
segment is never touched.
Examples:

lmq compact --config lmq.toml

")]
struct CompactArgs {
    #[command(flatten)]
    config: ConfigArgs,
}

impl CompactArgs {
    fn run(&self) -> Result<(), Whatever> {
        let config = self.config.load()?;
        let _guards = init_global_logging("lmq", &config.logging);
        set_panic_hook();

        let report = config.compact()?;
        println!(
            "Compacted {} segments into {} baselines ({} records, {} malformed)",
            report.segments_compacted,
            report.baselines_written,
            report.records_written,
            report.malformed
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    match cli.commands {
        Commands::Server(args) => args.run().await,
        Commands::Compact(args) => args.run(),
    }
}
