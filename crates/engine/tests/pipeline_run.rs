//! End-to-end runs with fake collaborators.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use clipstitch_common::{AppConfig, RetentionPolicy, StitchError};
use clipstitch_engine::{ManifestStore, MemoryManifestStore, Pipeline, ShutdownController};
use clipstitch_model::{AssetKind, ClipList, CompilationState, WindowSpec};
use common::{clip, FakeFetcher, FakeProber, FakeTranscoder, Workspace};

const NAME_0: &str = "channela_2024-01-01_to_2024-01-07_compilation.mp4";
const NAME_1: &str = "channela_2024-01-01_to_2024-01-07_compilation_1.mp4";
const PART_1: &str = "channela_2024-01-01_to_2024-01-07_part1.mp4";
const PART_2: &str = "channela_2024-01-01_to_2024-01-07_part2.mp4";

fn clip_list(n: usize) -> ClipList {
    ClipList {
        identity: "channelA".to_string(),
        window: WindowSpec {
            start: Some("2024-01-01".to_string()),
            end: Some("2024-01-07".to_string()),
        },
        clips: (0..n).map(|i| clip(&format!("c{i}"))).collect(),
    }
}

fn pipeline(
    config: AppConfig,
    transcoder: Arc<FakeTranscoder>,
    fetcher: Arc<FakeFetcher>,
) -> Pipeline {
    Pipeline::new(config, ShutdownController::default())
        .with_transcoder(transcoder)
        .with_prober(Arc::new(FakeProber))
        .with_fetcher(fetcher)
        .with_now(Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap())
}

#[tokio::test]
async fn two_compilations_are_written_to_the_output_dir() {
    let ws = Workspace::new(&["static.mp4", "transition_01.mp4", "transition_02.mp4"]);
    let mut config = ws.config();
    config.selection.compilations = 2;
    config.selection.clips_per_compilation = 3;
    config.sequencing.transition_probability = 1.0;

    let transcoder = FakeTranscoder::new();
    let fetcher = FakeFetcher::new();
    let summary = pipeline(config, Arc::clone(&transcoder), Arc::clone(&fetcher))
        .run(clip_list(6))
        .await
        .unwrap();

    assert!(summary.all_succeeded(), "{summary:?}");
    assert_eq!(fetcher.fetches(), 6);
    assert!(ws.output().join(PART_1).is_file());
    assert!(ws.output().join(PART_2).is_file());

    for job in &summary.compilations {
        let sequence = job.sequence.as_ref().unwrap();
        sequence.validate().unwrap();
        assert_eq!(sequence.clip_count(), 3);
    }

    // Default retention keeps only the bumper cache.
    assert!(ws.cache().join("_trans").is_dir());
    assert!(!ws.cache().join("clips").exists());
    assert!(!ws.cache().join("0").exists());
}

#[tokio::test]
async fn second_run_gets_a_suffix_and_leaves_the_first_file_alone() {
    let ws = Workspace::new(&["static.mp4"]);
    let mut config = ws.config();
    config.selection.compilations = 1;
    config.selection.clips_per_compilation = 2;

    let first = pipeline(config.clone(), FakeTranscoder::new(), FakeFetcher::new())
        .run(clip_list(2))
        .await
        .unwrap();
    let first_path = first.compilations[0].final_path.clone().unwrap();
    assert_eq!(first_path, ws.output().join(NAME_0));
    std::fs::write(&first_path, b"published").unwrap();

    let second = pipeline(config, FakeTranscoder::new(), FakeFetcher::new())
        .run(clip_list(2))
        .await
        .unwrap();
    assert_eq!(second.compilations[0].final_path, Some(ws.output().join(NAME_1)));
    assert_eq!(std::fs::read(&first_path).unwrap(), b"published");
}

#[tokio::test]
async fn repeated_multi_part_runs_suffix_each_part() {
    let ws = Workspace::new(&["static.mp4"]);
    let mut config = ws.config();
    config.selection.compilations = 2;
    config.selection.clips_per_compilation = 1;

    let first = pipeline(config.clone(), FakeTranscoder::new(), FakeFetcher::new())
        .run(clip_list(2))
        .await
        .unwrap();
    let first_paths: Vec<_> = first
        .compilations
        .iter()
        .map(|job| job.final_path.clone().unwrap())
        .collect();
    assert_eq!(first_paths, vec![ws.output().join(PART_1), ws.output().join(PART_2)]);
    for path in &first_paths {
        std::fs::write(path, b"published").unwrap();
    }

    let second = pipeline(config, FakeTranscoder::new(), FakeFetcher::new())
        .run(clip_list(2))
        .await
        .unwrap();
    let second_paths: Vec<_> = second
        .compilations
        .iter()
        .map(|job| job.final_path.clone().unwrap())
        .collect();
    assert_eq!(
        second_paths,
        vec![
            ws.output().join("channela_2024-01-01_to_2024-01-07_part1_1.mp4"),
            ws.output().join("channela_2024-01-01_to_2024-01-07_part2_1.mp4"),
        ]
    );
    for path in &first_paths {
        assert_eq!(std::fs::read(path).unwrap(), b"published");
    }
}

#[tokio::test]
async fn bumper_cache_is_reused_by_the_next_run() {
    let ws = Workspace::new(&["static.mp4", "transition_01.mp4"]);
    let mut config = ws.config();
    config.selection.compilations = 1;
    config.selection.clips_per_compilation = 1;

    let first = FakeTranscoder::new();
    pipeline(config.clone(), Arc::clone(&first), FakeFetcher::new())
        .run(clip_list(1))
        .await
        .unwrap();
    let bumper_encodes = |t: &FakeTranscoder| {
        t.requests()
            .iter()
            .filter(|r| r.output.starts_with(ws.cache().join("_trans")))
            .count()
    };
    assert_eq!(bumper_encodes(&first), 2);

    let second = FakeTranscoder::new();
    pipeline(config, Arc::clone(&second), FakeFetcher::new())
        .run(clip_list(1))
        .await
        .unwrap();
    assert_eq!(bumper_encodes(&second), 0);
}

#[tokio::test]
async fn missing_static_fails_before_any_clip_work() {
    let ws = Workspace::new(&["transition_01.mp4"]);
    let transcoder = FakeTranscoder::new();
    let fetcher = FakeFetcher::new();

    let err = pipeline(ws.config(), Arc::clone(&transcoder), Arc::clone(&fetcher))
        .run(clip_list(4))
        .await
        .unwrap_err();
    assert!(matches!(err, StitchError::Configuration { .. }));
    assert!(err.to_string().contains("TRANSITIONS_DIR"));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(fetcher.fetches(), 0);
    assert_eq!(transcoder.calls(), 0);
}

#[tokio::test]
async fn bad_clips_are_skipped_and_reported() {
    let ws = Workspace::new(&["static.mp4"]);
    let mut config = ws.config();
    config.selection.compilations = 1;
    config.selection.clips_per_compilation = 3;

    let fetcher = FakeFetcher::with_broken(&["c1"]);
    let summary = pipeline(config, FakeTranscoder::new(), Arc::clone(&fetcher))
        .run(clip_list(3))
        .await
        .unwrap();

    assert_eq!(summary.succeeded_count(), 1);
    assert_eq!(summary.skipped_clips.len(), 1);
    assert_eq!(summary.skipped_clips[0].id, "c1");
    assert_eq!(summary.shortfalls.len(), 1);
    assert_eq!(summary.shortfalls[0].assigned, 2);
    // Two attempts for the broken clip, one each for the others.
    assert_eq!(fetcher.fetches(), 4);
}

#[tokio::test]
async fn bad_clip_aborts_when_skipping_is_disabled() {
    let ws = Workspace::new(&["static.mp4"]);
    let mut config = ws.config();
    config.selection.compilations = 1;
    config.selection.clips_per_compilation = 3;
    config.behavior.skip_bad_clip = false;

    let err = pipeline(config, FakeTranscoder::new(), FakeFetcher::with_broken(&["c2"]))
        .run(clip_list(3))
        .await
        .unwrap_err();
    assert!(matches!(err, StitchError::AssetUnavailable { .. }));
    assert!(std::fs::read_dir(ws.output()).map(|d| d.count() == 0).unwrap_or(true));
}

#[tokio::test]
async fn more_compilations_than_clips_degrades_gracefully() {
    let ws = Workspace::new(&["static.mp4"]);
    let mut config = ws.config();
    config.selection.compilations = 3;
    config.selection.clips_per_compilation = 2;
    config.behavior.retention = RetentionPolicy::KeepAll;

    let summary = pipeline(config, FakeTranscoder::new(), FakeFetcher::new())
        .run(clip_list(3))
        .await
        .unwrap();

    assert_eq!(summary.compilations.len(), 3);
    assert_eq!(summary.compilations[0].state, CompilationState::Finalized);
    assert_eq!(summary.compilations[1].state, CompilationState::Finalized);
    assert_eq!(summary.compilations[2].state, CompilationState::Failed);
    assert_eq!(summary.shortfalls.len(), 2);
    assert!(!summary.all_succeeded());
    assert!(ws.cache().join("clips").is_dir());
}

#[tokio::test]
async fn low_view_clips_are_filtered() {
    let ws = Workspace::new(&["static.mp4"]);
    let mut config = ws.config();
    config.selection.compilations = 1;
    config.selection.clips_per_compilation = 5;
    config.selection.min_views = 5;

    let mut list = clip_list(3);
    list.clips[0].views = 1;
    let fetcher = FakeFetcher::new();
    let summary = pipeline(config, FakeTranscoder::new(), Arc::clone(&fetcher))
        .run(list)
        .await
        .unwrap();

    assert_eq!(fetcher.fetches(), 2);
    assert_eq!(summary.skipped_clips[0].id, "c0");
    let sequence = summary.compilations[0].sequence.as_ref().unwrap();
    assert_eq!(sequence.count(AssetKind::Clip), 2);
}

#[tokio::test]
async fn repeated_clip_ids_are_processed_once() {
    let ws = Workspace::new(&["static.mp4"]);
    let mut config = ws.config();
    config.selection.compilations = 2;
    config.selection.clips_per_compilation = 2;

    let mut list = clip_list(2);
    list.clips.push(clip("c0"));
    list.clips.push(clip("c1"));
    let fetcher = FakeFetcher::new();
    let summary = pipeline(config, FakeTranscoder::new(), Arc::clone(&fetcher))
        .run(list)
        .await
        .unwrap();

    assert_eq!(fetcher.fetches(), 2);
    let duplicates: Vec<&str> = summary
        .skipped_clips
        .iter()
        .filter(|s| s.reason == "duplicate clip id")
        .map(|s| s.id.as_str())
        .collect();
    assert_eq!(duplicates, vec!["c0", "c1"]);

    let mut placed: Vec<String> = summary
        .compilations
        .iter()
        .filter_map(|job| job.sequence.as_ref())
        .flat_map(|seq| seq.clip_names().into_iter().map(str::to_string))
        .collect();
    let total = placed.len();
    placed.sort();
    placed.dedup();
    assert_eq!(placed.len(), total);
}

#[tokio::test]
async fn injected_manifest_is_used() {
    let ws = Workspace::new(&["static.mp4"]);
    let mut config = ws.config();
    config.selection.compilations = 1;
    config.selection.clips_per_compilation = 1;

    let manifest = Arc::new(MemoryManifestStore::new());
    pipeline(config, FakeTranscoder::new(), FakeFetcher::new())
        .with_manifest(manifest.clone())
        .run(clip_list(1))
        .await
        .unwrap();
    assert_eq!(manifest.len().await, 1);
    assert!(!ws.cache().join("_trans").join("_manifest.json").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn cancellation_mid_download_leaves_no_output() {
    use clipstitch_engine::ProcessRunner;
    use common::HangingFetcher;
    use tokio::sync::Notify;

    let ws = Workspace::new(&["static.mp4"]);
    let mut config = ws.config();
    config.selection.compilations = 1;
    config.selection.clips_per_compilation = 2;

    let shutdown = ShutdownController::new(Duration::from_millis(500));
    let started = Arc::new(Notify::new());
    let fetcher = Arc::new(HangingFetcher {
        runner: ProcessRunner::new(shutdown.clone()),
        started: Arc::clone(&started),
    });
    let pipeline = Pipeline::new(config, shutdown.clone())
        .with_transcoder(FakeTranscoder::new())
        .with_prober(Arc::new(FakeProber))
        .with_fetcher(fetcher)
        .with_manifest(Arc::new(MemoryManifestStore::new()));

    let run = tokio::spawn(async move { pipeline.run(clip_list(2)).await });
    started.notified().await;
    assert!(!shutdown.active_pids().is_empty());

    let interrupted = Instant::now();
    shutdown.request_shutdown();
    let summary = run.await.unwrap().unwrap();
    let leftover = shutdown.drain(Duration::from_millis(500)).await;

    assert!(summary.cancelled);
    assert_eq!(leftover, 0);
    assert!(shutdown.active_pids().is_empty());
    assert!(interrupted.elapsed() < Duration::from_secs(5));
    assert!(std::fs::read_dir(ws.output()).map(|d| d.count() == 0).unwrap_or(true));
    assert!(!ws.cache().join("clips/c0/source.partial.mp4").exists());
    assert!(!ws.cache().join("clips/c1/source.partial.mp4").exists());
}
