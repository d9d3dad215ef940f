//! Environment checks run before a compile.
//!
//! Verifies the external tools, the transitions directory with its static
//! bumper, the overlay font, and that the cache and output directories are
//! writable.

use std::path::Path;

use clipstitch_common::{AppConfig, TRANSITIONS_DIR_ENV};

use crate::process::command_exists;

/// One checked prerequisite.
#[derive(Debug, Clone)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub available: bool,
    pub required: bool,
    pub fix_instructions: Option<String>,
}

impl Capability {
    fn new(name: &str, description: String, available: bool, required: bool) -> Self {
        Self {
            name: name.to_string(),
            description,
            available,
            required,
            fix_instructions: None,
        }
    }

    fn fix_unless_available(mut self, fix: impl Into<String>) -> Self {
        if !self.available {
            self.fix_instructions = Some(fix.into());
        }
        self
    }
}

/// Check every prerequisite for `config`.
pub fn check_capabilities(config: &AppConfig) -> Vec<Capability> {
    let tools = &config.tools;
    let transitions = config.transitions_dir();
    let static_path = transitions.join(&config.assets.static_asset);

    let mut checks = vec![
        check_tool("ffmpeg", &tools.ffmpeg, "encoder used for every transcode"),
        check_tool("ffprobe", &tools.ffprobe, "duration and audio-stream probing"),
        check_tool("yt-dlp", &tools.ytdlp, "clip downloads"),
        Capability::new(
            "Transitions directory",
            transitions.display().to_string(),
            transitions.is_dir(),
            true,
        )
        .fix_unless_available(format!(
            "Create the directory or point {TRANSITIONS_DIR_ENV} at your bumper folder"
        )),
        Capability::new(
            "Static asset",
            static_path.display().to_string(),
            static_path.is_file(),
            true,
        )
        .fix_unless_available(format!(
            "Place {} in the transitions directory",
            config.assets.static_asset
        )),
        check_writable("Cache directory", &config.paths.cache),
        check_writable("Output directory", &config.paths.output),
    ];

    let font = &config.paths.fontfile;
    checks.push(
        Capability::new(
            "Overlay font",
            font.display().to_string(),
            font.is_file(),
            config.behavior.enable_overlay,
        )
        .fix_unless_available("Set paths.fontfile or disable behavior.enable_overlay"),
    );
    checks
}

/// Whether every required capability is available.
pub fn all_required_available(capabilities: &[Capability]) -> bool {
    capabilities
        .iter()
        .filter(|c| c.required)
        .all(|c| c.available)
}

/// Print a human-readable capability report to stdout.
pub fn print_capability_report(capabilities: &[Capability]) {
    println!("clipstitch prerequisites:");
    println!("{}", "-".repeat(60));

    for cap in capabilities {
        let status = if cap.available {
            "[OK]"
        } else if cap.required {
            "[MISSING - REQUIRED]"
        } else {
            "[MISSING - OPTIONAL]"
        };

        println!("  {} {}: {}", status, cap.name, cap.description);

        if let Some(ref fix) = cap.fix_instructions {
            println!("    Fix: {fix}");
        }
    }
}

fn check_tool(name: &str, binary: &Path, purpose: &str) -> Capability {
    Capability::new(
        name,
        format!("{} ({purpose})", binary.display()),
        command_exists(binary),
        true,
    )
    .fix_unless_available(format!("Install {name} or set tools.{} in the config", name.replace('-', "")))
}

fn check_writable(name: &str, dir: &Path) -> Capability {
    let available = std::fs::create_dir_all(dir).is_ok() && {
        let probe = dir.join(".clipstitch-write-test");
        let ok = std::fs::write(&probe, b"ok").is_ok();
        let _ = std::fs::remove_file(&probe);
        ok
    };
    Capability::new(name, dir.display().to_string(), available, true)
        .fix_unless_available(format!("Make {} writable", dir.display()))
}
