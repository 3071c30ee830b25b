//! Subcommand runners
//!
//! Each runner connects, drives one run with a progress bar, prints the
//! summary table and maps the run status to a process exit code.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::connection::{ConnectionManager, redact};
use crate::datasource::DataSource;
use crate::error::Result;
use crate::executor::{
    ConflictPolicy, ExportOptions, Exporter, ImportPolicy, ImportSource, Importer,
    OperationContext, ProgressSink, ProgressTracker, RunOutcome, RunReport, RunStatus,
    WorkerHandle, spawn_export, spawn_import,
};
use crate::schema::{infer_database, render};

use super::{CliInterface, Commands, ConnectionArgs};

/// Exit code for a run that was interrupted.
pub const EXIT_CANCELLED: i32 = 130;

/// Map a run status to the process exit code.
pub fn exit_code(status: RunStatus) -> i32 {
    match status {
        RunStatus::Completed => 0,
        RunStatus::Failed => 1,
        RunStatus::CompletedWithFailures(_) => 2,
        RunStatus::Cancelled => EXIT_CANCELLED,
    }
}

/// Run the parsed subcommand.
///
/// # Arguments
/// * `cli` - Parsed arguments and effective configuration
/// * `shutdown` - Cancelled on Ctrl+C; forwarded to the running operation
///
/// # Returns
/// * `Result<i32>` - Exit code; `Err` only for failures before a run starts
pub async fn execute(cli: &CliInterface, shutdown: CancellationToken) -> Result<i32> {
    let config = cli.config();
    let show_progress = cli.show_progress();

    match &cli.args().command {
        Commands::Export {
            connection,
            collections,
            out,
            ..
        } => run_export(config, connection, collections, out, show_progress, shutdown).await,
        Commands::Import {
            connection,
            source,
            policies,
            default_policy,
            ..
        } => {
            let policy = build_policy(policies, *default_policy);
            run_import(config, connection, source, policy, show_progress, shutdown).await
        }
        Commands::Schema {
            connection,
            out,
            collections,
            ..
        } => {
            run_schema(
                config,
                connection,
                out.as_deref(),
                collections,
                show_progress,
                shutdown,
            )
            .await
        }
        Commands::Config => {
            if let Some(path) = cli.config_path() {
                println!("# {}", path.display());
            }
            print!("{}", config.to_toml()?);
            Ok(0)
        }
    }
}

fn build_policy(overrides: &[(String, ConflictPolicy)], default: ConflictPolicy) -> ImportPolicy {
    overrides
        .iter()
        .fold(ImportPolicy::uniform(default), |policy, (name, p)| {
            policy.with(name.clone(), *p)
        })
}

async fn open(config: &Config, args: &ConnectionArgs) -> Result<(ConnectionManager, Arc<dyn DataSource>)> {
    info!(
        "Connecting to {} (database {})",
        redact(&config.connection.uri),
        args.database
    );
    let mut manager = ConnectionManager::new(config.connection.clone());
    manager.connect().await?;
    let source: Arc<dyn DataSource> = Arc::new(manager.data_source(&args.database)?);
    Ok((manager, source))
}

async fn run_export(
    config: &Config,
    args: &ConnectionArgs,
    collections: &[String],
    out: &Path,
    show_progress: bool,
    shutdown: CancellationToken,
) -> Result<i32> {
    let (mut manager, source) = open(config, args).await?;
    let options = ExportOptions {
        form: config.transfer.form,
        compress: config.transfer.compress,
        max_depth: config.transfer.max_depth,
    };

    let handle = spawn_export(
        Exporter::new(source, options),
        collections.to_vec(),
        out.to_path_buf(),
        config.transfer.batch_size,
    );
    let outcome = drive(handle, show_progress, &shutdown).await;
    manager.disconnect().await;

    let outcome = outcome?;
    println!("{}", outcome.report.summary());
    Ok(finish(&outcome))
}

async fn run_import(
    config: &Config,
    args: &ConnectionArgs,
    source: &Path,
    policy: ImportPolicy,
    show_progress: bool,
    shutdown: CancellationToken,
) -> Result<i32> {
    let source = ImportSource::detect(source)?;
    let (mut manager, target) = open(config, args).await?;

    let importer = Importer::new(target).with_max_depth(config.transfer.max_depth);
    let handle = spawn_import(importer, source, policy, config.transfer.batch_size);
    let outcome = drive(handle, show_progress, &shutdown).await;
    manager.disconnect().await;

    let outcome = outcome?;
    println!("{}", outcome.report.summary());
    Ok(finish(&outcome))
}

async fn run_schema(
    config: &Config,
    args: &ConnectionArgs,
    out: Option<&Path>,
    collections: &[String],
    show_progress: bool,
    shutdown: CancellationToken,
) -> Result<i32> {
    let (mut manager, source) = open(config, args).await?;

    let tracker = Arc::new(ProgressTracker::new(show_progress));
    let ctx = OperationContext::new(config.transfer.batch_size)
        .with_progress(tracker.clone())
        .with_cancellation(shutdown);
    let outcome = infer_database(
        &*source,
        collections,
        config.schema.sample_size,
        config.transfer.max_depth,
        &ctx,
    )
    .await;
    tracker.finish();
    manager.disconnect().await;

    if outcome.error.is_none() {
        let report = &outcome.report;
        let rendered = render(&report.database, &report.collections, config.schema.format)?;
        match out {
            Some(path) => {
                write_output(path, &rendered).await?;
                println!(
                    "Schema of {} collection(s) written to {}",
                    report.collections.len(),
                    path.display()
                );
            }
            None => print!("{rendered}"),
        }
    }
    Ok(finish(&outcome))
}

async fn write_output(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

/// Feed worker progress into a progress bar until the run ends, cancelling
/// it when `shutdown` fires.
async fn drive<T: Send + 'static>(
    mut handle: WorkerHandle<T>,
    show_progress: bool,
    shutdown: &CancellationToken,
) -> Result<RunOutcome<T>> {
    let tracker = ProgressTracker::new(show_progress);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = handle.next_progress() => match event {
                Some(event) => tracker.on_progress(&event),
                None => break,
            },
            _ = shutdown.cancelled(), if !interrupted => {
                warn!("Interrupted, stopping after the current batch");
                interrupted = true;
                handle.cancel();
            }
        }
    }

    tracker.finish();
    handle.join().await
}

/// Report the run's fatal error, if any, and pick the exit code.
fn finish<T: RunReport>(outcome: &RunOutcome<T>) -> i32 {
    let status = outcome.status();
    match (&outcome.error, status) {
        (Some(e), _) => eprintln!("Error: {e}"),
        (None, RunStatus::CompletedWithFailures(n)) => {
            eprintln!("Completed with {n} failure(s)")
        }
        (None, RunStatus::Cancelled) => eprintln!("Cancelled"),
        _ => {}
    }
    exit_code(status)
}
