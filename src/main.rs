use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use etl_engine::{RunRegistry, RunStatus, load_config, setup_logging};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Runs the configured ETL sources in the background and prints the final run record as JSON.
#[derive(Debug, Parser)]
#[command(name = "etl-engine", version)]
struct Cli {
    /// TOML configuration file, layered between the defaults and `ETL_ENGINE_*` env variables
    #[arg(short, long, env = "ETL_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    runs_dir: Option<PathBuf>,

    /// Batch size of chunked sources without their own
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Input files recorded on the run
    files: Vec<String>,
}

fn main() -> Result<()> {
    setup_logging()?;
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }
    if let Some(dir) = cli.runs_dir {
        config.runs_dir = dir;
    }
    if let Some(size) = cli.chunk_size {
        config.chunk_size = size;
    }

    let registry = RunRegistry::open(config)?;
    let run_id = registry.create(cli.files)?;
    // the registry keeps the record current; the handle itself is not needed
    drop(registry.start(&run_id)?);

    let record = loop {
        let record = registry.get(&run_id)?;
        if record.status.is_terminal() {
            break record;
        }
        thread::sleep(POLL_INTERVAL);
    };

    println!("{}", serde_json::to_string_pretty(&record)?);
    if record.status == RunStatus::Failed {
        bail!("run {run_id} failed");
    }
    Ok(())
}
