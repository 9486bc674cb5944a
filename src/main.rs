//! Command-line entry point.
//!
//! Builds the immutable experiment configuration from the CLI, installs the
//! Ctrl-C stop handler and hands over to `AnalyzeRunner`. With `--replay`
//! it instead re-derives per-second results from a persisted event DB.
//!
//! Exit codes: 0 on a graceful stop (signal or max runtime), 2 on a
//! rejected configuration, 1 on a runtime fault.

use clap::Parser;
use log::error;
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pubsub_perf::config::{
    Durability, ExperimentConfig, HistoryKind, OutputSpec, QosProfile, Reliability, RoundTripMode,
};
use pubsub_perf::error::PerfError;
use pubsub_perf::events::db::DbEventSource;
use pubsub_perf::events::replay::replay_windows;
use pubsub_perf::msg;
use pubsub_perf::output::build_outputs;
use pubsub_perf::runner::AnalyzeRunner;

#[derive(Parser, Debug)]
#[command(name = "pubsub_perf", version, about = "Pub/sub performance measurement harness")]
struct Args {
    /// Logical topic name.
    #[arg(long, default_value = "perf_topic")]
    topic: String,

    /// Message type selecting the payload schema.
    #[arg(long = "msg", default_value = "Array1k")]
    msg_name: String,

    /// Publications per second per publisher; 0 = as fast as possible.
    #[arg(long, default_value_t = 1000)]
    rate: u32,

    #[arg(short = 'p', long, default_value_t = 1)]
    num_publishers: u32,

    #[arg(short = 's', long, default_value_t = 1)]
    num_subscribers: u32,

    /// Runtime in seconds; 0 = run until interrupted.
    #[arg(long, default_value_t = 0)]
    max_runtime: u64,

    /// Suppress the first N one-second result rows.
    #[arg(long, default_value_t = 0)]
    rows_to_ignore: u64,

    #[arg(long, value_enum, default_value = "none")]
    roundtrip_mode: RoundTripMode,

    #[arg(long, value_enum, default_value = "reliable")]
    reliability: Reliability,

    #[arg(long, value_enum, default_value = "volatile")]
    durability: Durability,

    #[arg(long, value_enum, default_value = "keep-last")]
    history_kind: HistoryKind,

    #[arg(long, default_value_t = 1024)]
    history_depth: usize,

    /// Persist every event to a per-run <uuid>.db file.
    #[arg(long)]
    output_event_db: bool,

    /// Result destination: stdout, csv:<path> or json:<path>. Repeatable;
    /// defaults to stdout.
    #[arg(long = "output", value_parser = OutputSpec::from_str)]
    outputs: Vec<OutputSpec>,

    /// Pin driver threads to this core.
    #[arg(long)]
    pin_core: Option<usize>,

    /// Cross-platform thread priority (0..=99) for driver threads.
    #[arg(long)]
    rt_priority: Option<u8>,

    /// Re-derive per-second results from a persisted event DB and exit.
    #[arg(long, value_name = "DB_FILE")]
    replay: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let code = match execute(args) {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            e.exit_code()
        }
    };
    process::exit(code);
}

fn execute(args: Args) -> Result<(), PerfError> {
    if let Some(db_file) = args.replay.clone() {
        return replay_from_db(&db_file, &args);
    }

    let config = build_config(args)?;
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.store(true, Ordering::Relaxed))
        .map_err(|e| PerfError::Config(format!("failed to install signal handler: {}", e)))?;

    AnalyzeRunner::new(config, stop)?.run()
}

fn build_config(args: Args) -> Result<ExperimentConfig, PerfError> {
    let msg = msg::lookup(&args.msg_name)?;
    let outputs = if args.outputs.is_empty() {
        vec![OutputSpec::Stdout]
    } else {
        args.outputs
    };
    Ok(ExperimentConfig {
        topic: args.topic,
        msg,
        rate: args.rate,
        num_publishers: args.num_publishers,
        num_subscribers: args.num_subscribers,
        max_runtime: args.max_runtime,
        rows_to_ignore: args.rows_to_ignore,
        roundtrip_mode: args.roundtrip_mode,
        qos: QosProfile {
            reliability: args.reliability,
            durability: args.durability,
            history_kind: args.history_kind,
            history_depth: args.history_depth,
        },
        output_event_db: args.output_event_db,
        outputs,
        pin_core: args.pin_core,
        rt_priority: args.rt_priority,
    })
}

fn replay_from_db(db_file: &Path, args: &Args) -> Result<(), PerfError> {
    let source = DbEventSource::open(db_file)?;
    let results = replay_windows(&source, &args.topic, Duration::from_secs(1))?;

    let specs = if args.outputs.is_empty() {
        vec![OutputSpec::Stdout]
    } else {
        args.outputs.clone()
    };
    let mut outputs = build_outputs(&specs);
    for output in outputs.iter_mut() {
        output.open()?;
    }
    for (index, result) in results.iter().enumerate() {
        if (index as u64) < args.rows_to_ignore {
            continue;
        }
        for output in outputs.iter_mut() {
            output.update(result);
        }
    }
    for output in outputs.iter_mut() {
        output.close();
    }
    Ok(())
}
