//! Stampede CLI - dispatch a burst of tasks and measure how fast they come back.
//!
//! The task store is simulated in process: every created task completes
//! after a random latency, and a share of them can be made to fail.

mod json_output;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stampede::{Config, InMemoryTaskStore, LogNotifier, Notifier, NoopNotifier, RunReport, Stampede};
use stampede_core::{Action, RunAction, TaskTemplate};

/// Where run start/stop notifications go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum NotifyTarget {
    /// Drop notifications.
    None,
    /// Write notifications to the log.
    Log,
}

/// Stampede - bulk task dispatch and completion reconciliation
#[derive(Parser, Debug)]
#[command(name = "stampede")]
#[command(about = "Dispatch a stampede of tasks and reconcile their completions", long_about = None)]
struct Args {
    /// Number of tasks to dispatch
    #[arg(short = 'n', long, default_value = "10")]
    count: usize,

    /// Task template (JSON); defaults to a single `sleep 1` run action
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// Absolute run ceiling in seconds
    #[arg(long, default_value = "6000")]
    hard_ceiling_secs: u64,

    /// Grace period after every task was seen, in seconds
    #[arg(long, default_value = "30")]
    quiescence_secs: u64,

    /// Timeout of the identifying echo action, in seconds
    #[arg(long, default_value = "10")]
    marker_timeout_secs: u64,

    /// Bound on concurrent resolve calls (unbounded if omitted)
    #[arg(long)]
    max_cleanups: Option<usize>,

    /// Notification target
    #[arg(long, value_enum, default_value = "none")]
    notify: NotifyTarget,

    /// Emit results and the final report as JSON lines on stdout
    #[arg(long)]
    json: bool,

    /// Minimum simulated task latency in milliseconds
    #[arg(long, default_value = "50")]
    latency_ms_min: u64,

    /// Maximum simulated task latency in milliseconds
    #[arg(long, default_value = "2000")]
    latency_ms_max: u64,

    /// Share of simulated tasks that fail (0.0 - 1.0)
    #[arg(long, default_value = "0.0", value_parser = parse_failure_rate)]
    failure_rate: f64,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            hard_ceiling: Duration::from_secs(self.hard_ceiling_secs),
            quiescence_window: Duration::from_secs(self.quiescence_secs),
            marker_timeout: Duration::from_secs(self.marker_timeout_secs),
            max_concurrent_cleanups: self.max_cleanups,
        }
    }

    fn notifier(&self) -> Arc<dyn Notifier> {
        match self.notify {
            NotifyTarget::None => Arc::new(NoopNotifier),
            NotifyTarget::Log => Arc::new(LogNotifier),
        }
    }

    fn store(&self) -> InMemoryTaskStore {
        let min = Duration::from_millis(self.latency_ms_min);
        let max = Duration::from_millis(self.latency_ms_max.max(self.latency_ms_min));
        InMemoryTaskStore::new().with_auto_complete(min..=max, self.failure_rate)
    }
}

fn parse_failure_rate(s: &str) -> Result<f64, String> {
    let rate: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("{} is not a rate between 0.0 and 1.0", s))
    }
}

fn load_template(path: Option<&PathBuf>) -> Result<TaskTemplate, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path).map_err(|e| {
                format!("Failed to read template from '{}': {}", path.display(), e)
            })?;
            Ok(TaskTemplate::from_json(&json)?)
        }
        None => Ok(TaskTemplate::new(vec![Action::Run(RunAction::new(
            "sleep 1",
            Duration::from_secs(30),
        ))])),
    }
}

fn print_report(report: &RunReport) {
    println!("Stampede finished ({}):", report.exit);
    println!("  Requested:        {}", report.requested);
    println!("  Dispatched:       {}", report.dispatched);
    println!("  Seen:             {}", report.seen);
    println!("  Failed:           {}", report.failed);
    println!("  Unmatched:        {}", report.unmatched);
    println!("  Still pending:    {}", report.still_pending);
    println!("  Cleanup failures: {}", report.cleanup_failures);
    println!("  Watch errors:     {}", report.watch_errors);
    println!("  Elapsed:          {:?}", report.elapsed);
    if let Some(mean) = report.mean_duration() {
        println!("  Mean latency:     {:?}", mean);
    }
    if let Some(max) = report.max_duration() {
        println!("  Max latency:      {:?}", max);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays clean for --json
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("stampede=info".parse()?))
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let template = load_template(args.template.as_ref())?;

    info!(
        count = args.count,
        hard_ceiling_secs = args.hard_ceiling_secs,
        quiescence_secs = args.quiescence_secs,
        "Starting stampede CLI"
    );

    let stampede = Stampede::new(Arc::new(args.store()))
        .with_config(args.config())
        .with_notifier(args.notifier());

    let report = match stampede.run(template, args.count).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Stampede aborted");
            if args.json {
                json_output::error(&e.to_string()).emit();
            }
            return Err(e.into());
        }
    };

    if args.json {
        for result in &report.results {
            json_output::task_result(result).emit();
        }
        json_output::run_report(&report).emit();
    } else {
        print_report(&report);
    }

    Ok(())
}
