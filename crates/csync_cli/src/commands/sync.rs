//! Sync command implementation.

use csync_core::ConfigDir;
use csync_engine::{
    AuthCallback, Credentials, DirectoryConnector, LocalReplica, RemoteReplica, RunReport, RunStatus,
    SyncConfig, SyncContext,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Runs one sync and prints its report.
pub fn run(
    config_dir: &ConfigDir,
    local: &Path,
    remote: &Path,
    excludes: &[PathBuf],
    format: &str,
) -> Result<RunStatus, Box<dyn std::error::Error>> {
    // Replicas exist before the context reads csync.conf, so the symlink
    // policy has to be resolved here.
    let mut config = SyncConfig::new().with_config_dir(config_dir.path());
    config.apply_file(&config_dir.load_config()?);

    let local_replica = LocalReplica::new(local).with_symlinks(config.symlinks);
    let auth: AuthCallback = Arc::new(credentials_from_env);
    let remote_replica =
        RemoteReplica::new(DirectoryConnector::new(remote).with_symlinks(config.symlinks), auth);

    let mut context = SyncContext::create(Arc::new(local_replica), Arc::new(remote_replica), config)?;
    for list in excludes {
        context.add_exclude_list(list)?;
    }

    let report = context.run();
    context.destroy()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text_output(&report),
    }
    Ok(report.status)
}

fn credentials_from_env(remote: &str) -> Option<Credentials> {
    let user = std::env::var("CSYNC_USER")
        .or_else(|_| std::env::var("USER"))
        .ok()?;
    let password = std::env::var("CSYNC_PASSWORD").unwrap_or_default();
    tracing::debug!(remote, user = %user, "using credentials from the environment");
    Some(Credentials::new(user, password))
}

fn print_text_output(report: &RunReport) {
    let stats = &report.stats;
    println!("Sync {} in {:.2?}", report.status, report.duration);
    println!("================");
    println!("Journal:       {}", report.journal_state);
    println!("Entries:       {} local, {} remote", stats.local_entries, stats.remote_entries);
    println!("Actions:       {}", stats.actions);
    println!("Copied:        {} ({} bytes)", stats.copied, stats.bytes_copied);
    println!("Directories:   {}", stats.directories_created);
    println!("Renamed:       {}", stats.renamed);
    println!("Deleted:       {}", stats.deleted);
    println!("Restamped:     {}", stats.restamped);
    println!("Retries:       {}", stats.retries);

    if let Some(fatal) = &report.fatal {
        println!();
        println!("✗ {fatal}");
    }
    if report.cancelled {
        println!();
        println!("Run was cancelled before all actions completed");
    }

    if !report.conflicts.is_empty() {
        println!();
        println!("Conflicts ({}):", report.conflicts.len());
        for conflict in &report.conflicts {
            match &conflict.aside {
                Some(aside) => println!("  {} ({}), other version kept as {}", conflict.path, conflict.kind, aside),
                None => println!("  {} ({})", conflict.path, conflict.kind),
            }
        }
    }

    if !report.errors.is_empty() {
        println!();
        println!("Errors ({}):", report.errors.len());
        for error in &report.errors {
            println!("  {} [{}]: {}", error.path, error.operation, error.message);
        }
    }
}
