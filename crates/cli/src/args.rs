use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "jobwatch", version, about = "Watch and control background jobs", long_about = None)]
pub struct Cli {
    /// Tracker config file (TOML). Defaults to the user config dir if present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Job server base URL; overrides config and environment.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Follow active jobs until they finish.
    Watch(WatchArgs),
    /// Trigger a job.
    Start(StartArgs),
    /// Request cancellation of a job.
    Cancel(JobArgs),
    /// Show one job's current snapshot.
    Status(StatusArgs),
    /// List finished jobs.
    History(HistoryArgs),
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Extra job ids to follow besides the restored active set.
    pub job_ids: Vec<String>,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Job kind, e.g. `price-update`.
    pub kind: String,
    /// Job parameter as key=value; repeatable.
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
    /// Follow the job after starting it.
    #[arg(long)]
    pub watch: bool,
}

#[derive(Args, Debug)]
pub struct JobArgs {
    pub job_id: String,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    pub job_id: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Skip the cache and re-fetch.
    #[arg(long)]
    pub refresh: bool,
    #[arg(long)]
    pub json: bool,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

/// Parameters as a JSON object. Values that parse as JSON (numbers,
/// booleans, quoted strings) keep their type; anything else is a string.
pub fn params_json(params: &[(String, String)]) -> serde_json::Value {
    let map = params
        .iter()
        .map(|(key, value)| {
            let value = serde_json::from_str(value)
                .unwrap_or_else(|_| serde_json::Value::String(value.clone()));
            (key.clone(), value)
        })
        .collect();
    serde_json::Value::Object(map)
}
