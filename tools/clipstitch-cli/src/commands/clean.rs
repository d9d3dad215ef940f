//! Apply a retention policy to the cache directory.

use std::process::ExitCode;

use clap::ValueEnum;
use clipstitch_common::{AppConfig, RetentionPolicy};
use clipstitch_engine::{CacheLayout, Finalizer};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Policy {
    /// Remove working files, keep normalized bumpers
    Default,
    /// Keep everything
    KeepAll,
    /// Remove everything, normalized bumpers included
    PurgeAll,
}

impl From<Policy> for RetentionPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Default => RetentionPolicy::Default,
            Policy::KeepAll => RetentionPolicy::KeepAll,
            Policy::PurgeAll => RetentionPolicy::PurgeAll,
        }
    }
}

pub async fn run(config: &AppConfig, policy: Option<Policy>) -> anyhow::Result<ExitCode> {
    let policy = policy.map(RetentionPolicy::from).unwrap_or(config.behavior.retention);
    let layout = CacheLayout::new(&config.paths.cache);

    let removed = Finalizer::cleanup(&layout, policy).await?;
    println!(
        "Cleaned {} ({policy:?}): {removed} entries removed",
        layout.root().display()
    );
    Ok(ExitCode::SUCCESS)
}
