//! Fake collaborators shared by the engine integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clipstitch_common::{AppConfig, StitchError, StitchResult};
use clipstitch_engine::{Fetcher, ProcessRunner, ProgressSink, Prober, TranscodeRequest, Transcoder};
use clipstitch_model::ClipRef;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Writes a small file to the request output and records every request.
#[derive(Default)]
pub struct FakeTranscoder {
    calls: AtomicUsize,
    requests: Mutex<Vec<TranscodeRequest>>,
    /// Requests whose argument list contains this string fail.
    fail_when_arg: Mutex<Option<String>>,
}

impl FakeTranscoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_when(arg: &str) -> Arc<Self> {
        let fake = Self::default();
        *fake.fail_when_arg.lock().unwrap() = Some(arg.to_string());
        Arc::new(fake)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TranscodeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(
        &self,
        request: &TranscodeRequest,
        _progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> StitchResult<()> {
        if cancel.is_cancelled() {
            return Err(StitchError::cancelled("fake transcode"));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let fail_arg = self.fail_when_arg.lock().unwrap().clone();
        if let Some(arg) = fail_arg {
            if request.to_args().iter().any(|a| a.contains(&arg)) {
                return Err(StitchError::transcode(format!("fake failure on {arg}")));
            }
        }

        // Let concurrent callers interleave.
        tokio::task::yield_now().await;
        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&request.output, request.label.as_bytes()).await?;
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Every existing file is two seconds long with audio.
pub struct FakeProber;

#[async_trait]
impl Prober for FakeProber {
    async fn probe_duration(&self, path: &Path) -> StitchResult<f64> {
        if path.is_file() {
            Ok(2.0)
        } else {
            Err(StitchError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
    }

    async fn probe_has_audio(&self, path: &Path) -> StitchResult<bool> {
        self.probe_duration(path).await.map(|_| true)
    }
}

/// Writes the clip id to the destination.
#[derive(Default)]
pub struct FakeFetcher {
    pub fetches: AtomicUsize,
    /// Clip ids that always fail to download.
    pub broken: Vec<String>,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_broken(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            broken: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, clip: &ClipRef, dest: &Path, cancel: &CancellationToken) -> StitchResult<()> {
        if cancel.is_cancelled() {
            return Err(StitchError::cancelled("fake fetch"));
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.broken.contains(&clip.id) {
            return Err(StitchError::fetch(format!("clip {} is gone", clip.id)));
        }
        tokio::fs::write(dest, clip.id.as_bytes()).await?;
        Ok(())
    }

    async fn fetch_avatar(&self, _url: &str, _dest: &Path, _cancel: &CancellationToken) -> StitchResult<()> {
        Err(StitchError::fetch("no avatars in tests"))
    }
}

/// Runs a long-lived child process per download, like a real downloader.
pub struct HangingFetcher {
    pub runner: ProcessRunner,
    pub started: Arc<Notify>,
}

#[async_trait]
impl Fetcher for HangingFetcher {
    async fn fetch(&self, _clip: &ClipRef, dest: &Path, cancel: &CancellationToken) -> StitchResult<()> {
        let args = vec![
            "-c".to_string(),
            format!("echo partial > '{}'; exec sleep 30", dest.display()),
        ];
        let sh = PathBuf::from("/bin/sh");
        let started = Arc::clone(&self.started);
        let mut notified = false;
        let run = self.runner.run(&sh, &args, cancel, |_| {});
        // The child is registered before the first line is read; give it a
        // moment to start, then signal the test.
        tokio::pin!(run);
        loop {
            tokio::select! {
                result = &mut run => return result.map(|_| ()),
                _ = tokio::time::sleep(std::time::Duration::from_millis(100)), if !notified => {
                    notified = true;
                    started.notify_one();
                }
            }
        }
    }

    async fn fetch_avatar(&self, _url: &str, _dest: &Path, _cancel: &CancellationToken) -> StitchResult<()> {
        Err(StitchError::fetch("no avatars in tests"))
    }
}

pub fn clip(id: &str) -> ClipRef {
    ClipRef {
        id: id.to_string(),
        url: format!("https://clips.example/{id}"),
        author: "Some Streamer".to_string(),
        avatar_url: None,
        views: 10,
        created_at: None,
        title: None,
    }
}

/// Temporary workspace with a transitions directory holding `files`.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new(bumpers: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let transitions = dir.path().join("transitions");
        std::fs::create_dir_all(&transitions).unwrap();
        for name in bumpers {
            std::fs::write(transitions.join(name), name.as_bytes()).unwrap();
        }
        Self { dir }
    }

    pub fn transitions(&self) -> PathBuf {
        self.dir.path().join("transitions")
    }

    pub fn cache(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    pub fn output(&self) -> PathBuf {
        self.dir.path().join("output")
    }

    /// Config pointing at this workspace, with fast retries and no overlay.
    pub fn config(&self) -> AppConfig {
        let mut config = AppConfig::default();
        config.paths.cache = self.cache();
        config.paths.output = self.output();
        config.paths.transitions_dir = Some(self.transitions());
        config.behavior.backoff_secs = 0.0;
        config.behavior.retries = 2;
        config.behavior.enable_overlay = false;
        config.sequencing.seed = Some(7);
        config
    }
}
