//! `flatbatch` - import delimited files in chunks.
//!
//! Every input is read with the `type`/`value` message mapper and delivered
//! to the console or to a JSONL/CSV file. One JSON run report per input is
//! printed on stdout after all runs finish.

use anyhow::{Context, Result};
use clap::Parser;
use flatbatch::io::glob::resolve_inputs;
use flatbatch::logging::{LogConfig, LogFormat, LogLevel, init_logging};
use flatbatch::sink::{ConsoleSink, Sink};
use flatbatch::{ChunkedPipeline, Message, MessageMapper, PipelineConfig, RunCoordinator, TokenizerMode};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "flatbatch")]
#[command(author, version, about = "Chunked, restartable import of delimited files")]
struct Cli {
    /// Input files or glob patterns
    #[arg(required = true)]
    inputs: Vec<String>,

    /// JSON file with a base pipeline configuration
    #[arg(long, env = "FLATBATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Field delimiter
    #[arg(short, long)]
    delimiter: Option<String>,

    /// Records per chunk
    #[arg(short = 'c', long)]
    chunk_size: Option<usize>,

    /// Skip malformed rows instead of failing the run
    #[arg(long)]
    skip_malformed: bool,

    /// Pad short rows and truncate long ones instead of rejecting them
    #[arg(long)]
    lenient: bool,

    /// Treat quote characters in data rows literally
    #[arg(long)]
    no_quote: bool,

    /// Input encoding label (e.g. UTF-8, latin1)
    #[arg(short, long)]
    encoding: Option<String>,

    /// Lines to discard before the header
    #[arg(long)]
    skip_lines: Option<usize>,

    /// Stop after this many data rows
    #[arg(long)]
    max_items: Option<u64>,

    /// Comment prefix; repeat for several. Replaces the default `#`
    #[arg(long = "comment")]
    comments: Vec<String>,

    /// Fail the run after this many skipped rows
    #[arg(long)]
    skip_limit: Option<u64>,

    /// Do not checkpoint; every run starts from the top
    #[arg(long)]
    no_save_state: bool,

    /// Directory for restart checkpoints
    #[cfg(feature = "checkpointing")]
    #[arg(long, env = "FLATBATCH_CHECKPOINT_DIR")]
    checkpoint_dir: Option<PathBuf>,

    /// Write records to this file (.jsonl or .csv, optionally compressed) instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Worker threads for multiple inputs
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    #[arg(long, value_enum, env = "FLATBATCH_LOG_LEVEL", default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    #[arg(long, value_enum, env = "FLATBATCH_LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(d) = &self.delimiter {
            config = config.delimiter(d.clone());
        }
        if let Some(n) = self.chunk_size {
            config = config.chunk_size(n);
        }
        if self.skip_malformed {
            config = config.strict(false);
        }
        if self.lenient {
            config = config.tokenizer_mode(TokenizerMode::Lenient);
        }
        if self.no_quote {
            config = config.quote(None);
        }
        if let Some(e) = &self.encoding {
            config = config.encoding(e.clone());
        }
        if let Some(n) = self.skip_lines {
            config = config.lines_to_skip(n);
        }
        if self.max_items.is_some() {
            config = config.max_item_count(self.max_items);
        }
        if !self.comments.is_empty() {
            config = config.comment_prefixes(self.comments.clone());
        }
        if self.skip_limit.is_some() {
            config = config.skip_limit(self.skip_limit);
        }
        if self.no_save_state {
            config = config.save_state(false);
        }
        config.validate()?;
        Ok(config)
    }
}

enum Output {
    Console,
    #[cfg(feature = "io-jsonl")]
    Jsonl(Arc<flatbatch::sink::JsonlSink>),
    #[cfg(feature = "io-csv")]
    Csv(Arc<flatbatch::sink::CsvSink>),
}

impl Output {
    fn open(path: Option<&Path>, delimiter: &str) -> Result<Self> {
        match path {
            None => Ok(Output::Console),
            Some(path) if is_csv_path(path) => csv_output(path, delimiter),
            Some(path) => jsonl_output(path),
        }
    }

    fn sink(&self) -> Box<dyn Sink<Message>> {
        match self {
            Output::Console => Box::new(ConsoleSink::stdout()),
            #[cfg(feature = "io-jsonl")]
            Output::Jsonl(s) => Box::new(Arc::clone(s)),
            #[cfg(feature = "io-csv")]
            Output::Csv(s) => Box::new(Arc::clone(s)),
        }
    }

    fn finish(&self) -> Result<()> {
        match self {
            Output::Console => Ok(()),
            #[cfg(feature = "io-jsonl")]
            Output::Jsonl(s) => s.finish(),
            #[cfg(feature = "io-csv")]
            Output::Csv(s) => s.finish(),
        }
    }
}

#[cfg(feature = "io-csv")]
fn csv_output(path: &Path, delimiter: &str) -> Result<Output> {
    let delimiter = match delimiter.as_bytes() {
        [b] => *b,
        _ => b',',
    };
    let sink = flatbatch::sink::CsvSink::create(path, delimiter)?;
    Ok(Output::Csv(Arc::new(sink)))
}

#[cfg(not(feature = "io-csv"))]
fn csv_output(_path: &Path, _delimiter: &str) -> Result<Output> {
    anyhow::bail!("CSV output requires the io-csv feature")
}

#[cfg(feature = "io-jsonl")]
fn jsonl_output(path: &Path) -> Result<Output> {
    Ok(Output::Jsonl(Arc::new(flatbatch::sink::JsonlSink::create(path)?)))
}

#[cfg(not(feature = "io-jsonl"))]
fn jsonl_output(_path: &Path) -> Result<Output> {
    anyhow::bail!("JSONL output requires the io-jsonl feature")
}

type CliPipeline = ChunkedPipeline<MessageMapper, Box<dyn Sink<Message>>>;

#[cfg(feature = "checkpointing")]
fn with_checkpoints(pipeline: CliPipeline, cli: &Cli) -> Result<CliPipeline> {
    let Some(dir) = &cli.checkpoint_dir else {
        return Ok(pipeline);
    };
    let store = flatbatch::checkpoint::FileCheckpointStore::new(dir)?;
    Ok(pipeline.with_checkpoint_store(Arc::new(store)))
}

#[cfg(not(feature = "checkpointing"))]
fn with_checkpoints(pipeline: CliPipeline, _cli: &Cli) -> Result<CliPipeline> {
    Ok(pipeline)
}

/// `.csv`, possibly followed by a compression extension.
fn is_csv_path(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let stem = [".gz", ".gzip", ".zst", ".zstd", ".bz2", ".bzip2", ".xz"]
        .iter()
        .find_map(|ext| name.strip_suffix(ext))
        .unwrap_or(&name);
    stem.ends_with(".csv")
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_config = LogConfig {
        level: cli.log_level,
        format: cli.log_format,
        ..LogConfig::from_env()?
    };
    init_logging(&log_config)?;

    let config = cli.pipeline_config()?;
    let inputs = resolve_inputs(&cli.inputs)?;
    let output = Output::open(cli.output.as_deref(), &config.delimiter)?;

    let pipeline = ChunkedPipeline::new(config, MessageMapper, output.sink())?;
    let pipeline = with_checkpoints(pipeline, &cli)?;
    let coordinator = RunCoordinator::new(pipeline);

    info!(inputs = inputs.len(), "starting import");
    let results = coordinator.execute_all(&inputs, cli.threads)?;
    output.finish()?;

    let mut all_completed = true;
    for (path, result) in inputs.iter().zip(results) {
        match result {
            Ok(report) => {
                all_completed &= report.is_completed();
                let json = serde_json::to_string(&report).context("serialize run report")?;
                println!("{json}");
            }
            Err(err) => {
                all_completed = false;
                error!(path = %path.display(), error = %err, "run not started");
            }
        }
    }

    Ok(if all_completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
