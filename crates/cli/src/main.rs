// crates/cli/src/main.rs
//! jobwatch: terminal surface over the job-tracking core.

mod args;
mod render;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar};
use tokio::task::JoinSet;
use tracing::{debug, info};

use jobwatch_core::registry::UNKNOWN_KIND;
use jobwatch_core::{
    ActiveJobRecord, CancelOutcome, JobTracker, Subscription, TrackerConfig,
};
use jobwatch_observability::{init_tracing, LogOptions};
use jobwatch_types::{ChannelState, JobId, JobKind};

use args::{Cli, Cmd, HistoryArgs, StartArgs, StatusArgs, WatchArgs};

/// Directory for rolling log files; file logging is off when unset.
const LOG_DIR_ENV: &str = "JOBWATCH_LOG_DIR";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(&LogOptions {
        json: cli.log_json,
        verbose: cli.verbose,
        log_dir: std::env::var_os(LOG_DIR_ENV).map(PathBuf::from),
    })?;

    let config = load_config(&cli)?;
    debug!(api = %config.api_base_url, feed = %config.feed_base(), "config loaded");
    let tracker = JobTracker::new(&config).context("building job tracker")?;

    match cli.cmd {
        Cmd::Watch(args) => watch(&tracker, args).await,
        Cmd::Start(args) => start(&tracker, args).await,
        Cmd::Cancel(args) => cancel(&tracker, JobId::new(args.job_id)).await,
        Cmd::Status(args) => status(&tracker, args).await,
        Cmd::History(args) => history(&tracker, args).await,
    }
}

fn load_config(cli: &Cli) -> Result<TrackerConfig> {
    let path = cli.config.clone().or_else(default_config_path);
    let mut config = match &path {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::from_env()?,
    };
    if let Some(url) = &cli.api_url {
        config.api_base_url = url.clone();
        config.validate()?;
    }
    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    let path = dirs::config_dir()?.join("jobwatch").join("config.toml");
    path.exists().then_some(path)
}

async fn watch(tracker: &JobTracker, args: WatchArgs) -> Result<()> {
    let restored = tracker.registry().restore().await;
    info!(restored, "active jobs restored");
    for job_id in args.job_ids {
        tracker
            .registry()
            .add(JobId::new(job_id), JobKind::from(UNKNOWN_KIND));
    }
    follow(tracker, tracker.registry().active()).await
}

async fn start(tracker: &JobTracker, args: StartArgs) -> Result<()> {
    let kind = JobKind::new(args.kind);
    let params = args::params_json(&args.params);
    let job_id = tracker
        .start(kind.clone(), params)
        .await
        .with_context(|| format!("starting {kind} job"))?;
    println!("{job_id}");

    if args.watch {
        let records = tracker.registry().get(&job_id).into_iter().collect();
        follow(tracker, records).await?;
    }
    Ok(())
}

async fn cancel(tracker: &JobTracker, job_id: JobId) -> Result<()> {
    match tracker.cancellation().cancel(&job_id).await? {
        CancelOutcome::Requested(response) => {
            let detail = response.message.unwrap_or(response.status);
            println!("Cancellation requested for {job_id}: {detail}");
        }
        CancelOutcome::AlreadyRequested => println!("Cancellation already requested for {job_id}"),
        CancelOutcome::AlreadyTerminal => println!("{job_id} has already finished"),
    }
    Ok(())
}

async fn status(tracker: &JobTracker, args: StatusArgs) -> Result<()> {
    let job_id = JobId::new(args.job_id);
    let snapshot = tracker
        .api()
        .get_job(&job_id)
        .await
        .with_context(|| format!("fetching status of {job_id}"))?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("{}", render::snapshot_text(&snapshot));
    }
    Ok(())
}

async fn history(tracker: &JobTracker, args: HistoryArgs) -> Result<()> {
    let entries = tracker.history().list(args.refresh).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        println!("{}", render::history_table(&entries));
    }
    Ok(())
}

/// One progress bar per job until every job is terminal or unreachable,
/// or until Ctrl-C.
async fn follow(tracker: &JobTracker, records: Vec<ActiveJobRecord>) -> Result<()> {
    if records.is_empty() {
        println!("No active jobs.");
        return Ok(());
    }

    let multi = MultiProgress::new();
    let style = render::bar_style()?;
    let mut followers = JoinSet::new();
    for record in records {
        let bar = multi.add(ProgressBar::new(0));
        bar.set_style(style.clone());
        bar.set_prefix(format!("{} {}", record.kind, record.job_id));
        let (initial, subscription) = tracker.channel().observe(&record.job_id);
        render::update_bar(&bar, &initial);
        followers.spawn(follow_one(bar, subscription));
    }

    let mut finished = Vec::new();
    loop {
        tokio::select! {
            joined = followers.join_next() => match joined {
                Some(result) => finished.push(result.context("job follower panicked")?),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted; closing live feeds");
                followers.shutdown().await;
                return Ok(());
            }
        }
    }

    for (job_id, state) in finished {
        debug!(%job_id, phase = %state.phase, "job follow ended");
    }
    Ok(())
}

async fn follow_one(bar: ProgressBar, mut subscription: Subscription) -> (JobId, ChannelState) {
    while let Some(state) = subscription.changed().await {
        render::update_bar(&bar, &state);
    }
    let last = subscription.current();
    render::finish_bar(&bar, &last);
    (subscription.job_id().clone(), last)
}
