//! # Dataflow Pipeline Demo
//!
//! Drives every block kind of lib_dataflow end to end:
//!
//! ```text
//! numbers -> sqrt (parallel, ordered) -> batch --> broadcast --> printer
//!                      trigger timer ---^                   \
//! words -> length ------------------------------------------> join -> reporter
//! ```
//!
//! Configuration is layered: built-in defaults, then an optional JSON file,
//! then environment variables and CLI flags.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use lib_dataflow::{
    ActionBlock, BatchBlock, BatchOptions, Block, BroadcastBlock, BroadcastOptions, BufferBlock,
    ExecutionOptions, JoinBlock, JoinOptions, LinkOptions, Source, Target, TransformBlock,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const WORDS: &[&str] = &[
    "buffer", "transform", "batch", "join", "broadcast", "action", "link", "completion",
];

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "lib_dataflow pipeline demo", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "DATAFLOW_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "DATAFLOW_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "DATAFLOW_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "DATAFLOW_ITEMS", help = "How many numbers to push through the pipeline.")]
    pub items: Option<u64>,

    #[clap(long, env = "DATAFLOW_BATCH_SIZE", help = "Items per batch.")]
    pub batch_size: Option<usize>,

    #[clap(long, env = "DATAFLOW_TRIGGER_MS", help = "Interval in milliseconds between forced batch flushes.")]
    pub trigger_interval_ms: Option<u64>,

    #[clap(long, env = "DATAFLOW_PARALLELISM", help = "Degree of parallelism of the sqrt stage.")]
    pub parallelism: Option<usize>,

    #[clap(long, env = "DATAFLOW_CAPACITY", help = "Bounded capacity of the input buffer.")]
    pub capacity: Option<usize>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            items: other.items.or(self.items),
            batch_size: other.batch_size.or(self.batch_size),
            trigger_interval_ms: other.trigger_interval_ms.or(self.trigger_interval_ms),
            parallelism: other.parallelism.or(self.parallelism),
            capacity: other.capacity.or(self.capacity),
        }
    }
}

/// Defaults, then the config file, then env/CLI.
fn load_config() -> Config {
    let defaults = Config {
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        items: Some(100),
        batch_size: Some(10),
        trigger_interval_ms: Some(50),
        parallelism: Some(4),
        capacity: Some(16),
        ..Default::default()
    };

    let cli = Config::parse();
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("demo_pipeline.json"));

    let mut current = defaults;
    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path)
            .map_err(anyhow::Error::from)
            .and_then(|text| Ok(serde_json::from_str::<Config>(&text)?))
        {
            Ok(file_config) => current = current.merge(file_config),
            // Logging is not up yet at this point.
            Err(e) => eprintln!(
                "Ignoring config file {}: {}",
                config_file_path.display(),
                e
            ),
        }
    }

    current.merge(cli)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config();
    let log_dir = config.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"));
    let log_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    let log_path = lib_dataflow::loggers::setup_logging(&log_dir, &log_level)?;
    log::info!("Logging to {}", log_path.display());
    log::info!("Configuration: {:?}", config);

    let items = config.items.unwrap_or(100);
    let batch_size = config.batch_size.unwrap_or(10);
    let parallelism = config.parallelism.unwrap_or(4);
    let trigger_every = Duration::from_millis(config.trigger_interval_ms.unwrap_or(50));

    // --- Blocks ---
    let mut input_options = ExecutionOptions::default().with_name("numbers");
    input_options.bounded_capacity = config.capacity;
    let numbers = BufferBlock::<u64>::new(input_options)?;

    let sqrt = TransformBlock::new(
        ExecutionOptions::default()
            .with_name("sqrt")
            .with_parallelism(parallelism),
        |n: u64| async move {
            // Uneven work so the reorder buffer has something to do.
            tokio::time::sleep(Duration::from_millis(n % 5)).await;
            anyhow::Ok((n as f64).sqrt())
        },
    )?;
    let batch = BatchBlock::<f64>::new(BatchOptions::new(batch_size).with_name("batch"))?;
    let fan_out = BroadcastBlock::<Vec<f64>>::new(BroadcastOptions::default().with_name("fan-out"))?;
    let printer = ActionBlock::from_fn(ExecutionOptions::default().with_name("printer"), |b: Vec<f64>| {
        let sum: f64 = b.iter().sum();
        log::info!("batch of {:>2}: sum {:>10.3}", b.len(), sum);
        Ok(())
    })?;

    let words = TransformBlock::from_fn(ExecutionOptions::default().with_name("length"), |w: String| {
        Ok(w.chars().count())
    })?;
    let pair = JoinBlock::<usize, Vec<f64>>::new(JoinOptions::default().with_name("pair"))?;
    let reporter = ActionBlock::from_fn(
        ExecutionOptions::default().with_name("reporter"),
        |(len, b): (usize, Vec<f64>)| {
            log::info!("word of length {} paired with a batch of {}", len, b.len());
            Ok(())
        },
    )?;

    // --- Links ---
    numbers.link_to(sqrt.clone(), LinkOptions::propagate())?;
    sqrt.link_to(batch.clone(), LinkOptions::propagate())?;
    batch.link_to(fan_out.clone(), LinkOptions::propagate())?;
    fan_out.link_to(printer.clone(), LinkOptions::propagate())?;
    fan_out.link_to(pair.target2(), LinkOptions::propagate())?;
    words.link_to(pair.target1(), LinkOptions::propagate())?;
    pair.link_to(reporter.clone(), LinkOptions::propagate())?;

    // --- Timer: the engine has none, the caller drives partial flushes ---
    let stop = CancellationToken::new();
    let timer = {
        let batch = Arc::clone(&batch);
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(trigger_every);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {
                        let flushed = batch.trigger_batch();
                        if flushed > 0 {
                            log::debug!("Timer flushed a partial batch of {}", flushed);
                        }
                    }
                }
            }
        })
    };

    // --- Produce ---
    for n in 0..items {
        if !numbers.send(n).await {
            log::warn!("numbers stopped accepting at {}", n);
            break;
        }
    }
    for word in WORDS {
        words.send(word.to_string()).await;
    }
    numbers.complete();
    words.complete();

    for completion in [printer.completion(), reporter.completion()] {
        let name = completion.block_name().to_string();
        completion.await?;
        log::info!("Block '{}' completed", name);
    }
    stop.cancel();
    timer.await?;

    log::info!("Pipeline finished: {} numbers, {} words", items, WORDS.len());
    Ok(())
}
