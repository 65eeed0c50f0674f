use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use batch_harness::{Job, JobError, JobOptions, WorkerPool};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use env_logger::Env;
use log::error;

#[derive(Debug)]
enum WorkloadError {
    Failed(u64),
    Output(String),
}

impl fmt::Display for WorkloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadError::Failed(item) => write!(f, "synthetic failure at item {}", item),
            WorkloadError::Output(message) => write!(f, "cannot write output: {}", message),
        }
    }
}

impl std::error::Error for WorkloadError {}

fn cli() -> Command {
    Command::new("batch_harness")
        .about("Runs a synthetic workload through the batch job harness")
        .arg(Arg::new("name").long("name").default_value("SyntheticJob"))
        .arg(
            Arg::new("items")
                .long("items")
                .value_parser(value_parser!(u64))
                .default_value("100"),
        )
        .arg(Arg::new("expected").long("expected").value_parser(value_parser!(u64)))
        .arg(
            Arg::new("progress-interval")
                .long("progress-interval")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("show-progress")
                .long("show-progress")
                .action(ArgAction::SetTrue),
        )
        .arg(Arg::new("user").long("user"))
        .arg(Arg::new("report-directory").long("report-directory"))
        .arg(
            Arg::new("root")
                .long("root")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(Arg::new("namespace").long("namespace").action(ArgAction::SetTrue))
        .arg(Arg::new("log-level").long("log-level"))
        .arg(
            Arg::new("workers")
                .long("workers")
                .value_parser(value_parser!(usize)),
        )
        .arg(Arg::new("fail-at").long("fail-at").value_parser(value_parser!(u64)))
        .arg(
            Arg::new("delay-ms")
                .long("delay-ms")
                .value_parser(value_parser!(u64))
                .default_value("0"),
        )
        .arg(
            Arg::new("options")
                .long("options")
                .value_parser(value_parser!(PathBuf))
                .help("JSON file of job options; flags override its values"),
        )
}

fn load_options(matches: &ArgMatches) -> Result<JobOptions, String> {
    let mut options = match matches.get_one::<PathBuf>("options") {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
            serde_json::from_str(&content)
                .map_err(|e| format!("Invalid options in {}: {}", path.display(), e))?
        }
        None => JobOptions::default(),
    };

    if let Some(user) = matches.get_one::<String>("user") {
        options.user_name = Some(user.clone());
    }
    if let Some(dir) = matches.get_one::<String>("report-directory") {
        options.report_directory = Some(dir.clone());
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        options.log_level = Some(level.clone());
    }
    if matches.get_flag("show-progress") {
        options.show_progress = true;
    }
    if let Some(expected) = matches.get_one::<u64>("expected") {
        options.expected = Some(*expected);
    }
    if let Some(interval) = matches.get_one::<f64>("progress-interval") {
        options.progress_interval = Some(*interval);
    }
    if let Some(root) = matches.get_one::<PathBuf>("root") {
        options.storage_root = Some(root.clone());
    }
    if matches.get_flag("namespace") {
        options.namespace_by_user = true;
    }
    if let Some(workers) = matches.get_one::<usize>("workers") {
        options.workers = Some(*workers);
    }
    Ok(options)
}

fn work(item: u64, fail_at: Option<u64>, delay: Duration) -> Result<(), WorkloadError> {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
    if fail_at == Some(item) {
        return Err(WorkloadError::Failed(item));
    }
    Ok(())
}

fn run_single(
    name: &str,
    options: JobOptions,
    items: u64,
    fail_at: Option<u64>,
    delay: Duration,
) -> Result<(), JobError<WorkloadError>> {
    let mut job = Job::new(name, options)?;
    job.perform(|job| {
        let out = job
            .output_file("items.csv")
            .map_err(|e| WorkloadError::Output(e.to_string()))?;
        for item in 1..=items {
            job.process_item(|| {
                work(item, fail_at, delay)?;
                writeln!(&out, "{}", item).map_err(|e| WorkloadError::Output(e.to_string()))
            })?;
        }
        Ok::<_, WorkloadError>(())
    })
}

fn run_pool(
    name: &str,
    options: JobOptions,
    items: u64,
    fail_at: Option<u64>,
    delay: Duration,
) -> Result<bool, JobError<WorkloadError>> {
    let all: Vec<u64> = (1..=items).collect();
    let report = WorkerPool::new(name, options).run(&all, |_, item| work(*item, fail_at, delay))?;
    println!(
        "{} items processed by {} workers",
        report.total_processed(),
        report.outcomes.len()
    );
    for failed in report.failures() {
        if let Err(e) = &failed.result {
            error!("worker {}: {}", failed.index, e);
        }
    }
    Ok(report.is_success())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let matches = cli().get_matches();

    let options = match load_options(&matches) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };
    let name = matches
        .get_one::<String>("name")
        .cloned()
        .unwrap_or_else(|| "SyntheticJob".to_string());
    let items = matches.get_one::<u64>("items").copied().unwrap_or(100);
    let fail_at = matches.get_one::<u64>("fail-at").copied();
    let delay = Duration::from_millis(matches.get_one::<u64>("delay-ms").copied().unwrap_or(0));

    let result = if options.workers.is_some() {
        run_pool(&name, options, items, fail_at, delay)
    } else {
        run_single(&name, options, items, fail_at, delay).map(|()| true)
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e @ JobError::Configuration(_)) => {
            eprintln!("{}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::from(1)
        }
    }
}
