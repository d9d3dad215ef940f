//! Build compilations from a clip list.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clipstitch_common::AppConfig;
use clipstitch_engine::progress::format_clock;
use clipstitch_engine::{load_clip_list, Pipeline, ProgressUpdate, ShutdownController, Stage};
use clipstitch_model::RunSummary;

/// Command-line values that replace config entries for this run.
#[derive(Debug, Default)]
pub struct Overrides {
    pub compilations: Option<usize>,
    pub per: Option<usize>,
    pub output: Option<PathBuf>,
    pub cache: Option<PathBuf>,
    pub transitions_dir: Option<PathBuf>,
    pub seed: Option<u64>,
    pub no_overlay: bool,
    pub rebuild: bool,
    pub transitions_rebuild: bool,
    pub overwrite: bool,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut AppConfig) {
        if let Some(n) = self.compilations {
            config.selection.compilations = n;
        }
        if let Some(n) = self.per {
            config.selection.clips_per_compilation = n;
        }
        if let Some(dir) = self.output {
            config.paths.output = dir;
        }
        if let Some(dir) = self.cache {
            config.paths.cache = dir;
        }
        if let Some(dir) = self.transitions_dir {
            config.paths.transitions_dir = Some(dir);
        }
        if self.seed.is_some() {
            config.sequencing.seed = self.seed;
        }
        if self.no_overlay {
            config.behavior.enable_overlay = false;
        }
        config.behavior.rebuild |= self.rebuild;
        config.behavior.transitions_rebuild |= self.transitions_rebuild;
        config.behavior.overwrite_output |= self.overwrite;
    }
}

pub async fn run(
    mut config: AppConfig,
    clips: PathBuf,
    overrides: Overrides,
    summary_json: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    let start = overrides.start.clone();
    let end = overrides.end.clone();
    overrides.apply(&mut config);
    config.validate()?;

    let mut list = load_clip_list(&clips)?;
    if start.is_some() || end.is_some() {
        list.window.start = start.or(list.window.start);
        list.window.end = end.or(list.window.end);
    }

    println!("Compiling clips from: {}", clips.display());
    println!("  Identity: {}", list.identity);
    println!("  Clips listed: {}", list.clips.len());
    println!(
        "  Compilations: {} x {} clips",
        config.selection.compilations, config.selection.clips_per_compilation
    );
    println!("  Output: {}", config.paths.output.display());

    let grace = Duration::from_secs_f64(config.behavior.shutdown_grace_secs.max(0.0));
    let shutdown = ShutdownController::new(grace);

    let signal = shutdown.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return None;
        }
        println!("\nInterrupted, stopping workers...");
        tracing::warn!("Shutdown requested by interrupt");
        signal.request_shutdown();
        Some(signal.drain(signal.grace()).await)
    });

    let pipeline = Pipeline::new(config, shutdown.clone()).with_progress(Arc::new(render_progress));
    let result = pipeline.run(list).await;

    if shutdown.is_shutdown_requested() {
        if let Ok(Some(killed)) = interrupt.await {
            if killed > 0 {
                tracing::warn!(killed, "Child processes were force-killed");
            }
        }
    } else {
        interrupt.abort();
    }

    let summary = result?;
    println!();
    print_summary(&summary);

    if let Some(path) = summary_json {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(&path, json)?;
        println!("Summary written to {}", path.display());
    }

    let code = if summary.cancelled {
        130
    } else if summary.all_succeeded() {
        0
    } else {
        1
    };
    Ok(ExitCode::from(code))
}

fn render_progress(update: ProgressUpdate) {
    let line = match update.stage {
        Stage::Concat if !update.complete => {
            let eta = update
                .eta_secs
                .map(|s| format!(", ETA {}", format_clock(s)))
                .unwrap_or_default();
            format!(
                "{}: {:.1}% ({}{eta})",
                update.subject,
                update.fraction * 100.0,
                format_clock(update.out_time_secs)
            )
        }
        stage if update.complete => format!("{}: {stage} done", update.subject),
        stage => format!("{}: {stage}", update.subject),
    };
    print!("\r  {line:<72}");
    let _ = std::io::stdout().flush();
}

fn print_summary(summary: &RunSummary) {
    if summary.cancelled {
        println!("Run cancelled. No further output was written.");
    }

    println!(
        "Compilations: {} succeeded, {} failed",
        summary.succeeded_count(),
        summary.failed().count()
    );
    for job in &summary.compilations {
        match (&job.final_path, &job.failure) {
            (Some(path), _) => println!("  [OK] #{} {}", job.index, path.display()),
            (None, Some(reason)) => {
                println!("  [FAILED] #{} {}: {reason}", job.index, job.output_name)
            }
            (None, None) => println!("  [{:?}] #{} {}", job.state, job.index, job.output_name),
        }
    }

    if !summary.shortfalls.is_empty() {
        println!("Short compilations:");
        for s in &summary.shortfalls {
            println!("  #{}: {} of {} clips", s.index, s.assigned, s.requested);
        }
    }
    if !summary.skipped_clips.is_empty() {
        println!("Skipped clips:");
        for clip in &summary.skipped_clips {
            println!("  {}: {}", clip.id, clip.reason);
        }
    }
    if !summary.dropped_assets.is_empty() {
        println!("Dropped assets:");
        for asset in &summary.dropped_assets {
            println!("  {}: {}", asset.id, asset.reason);
        }
    }
}
