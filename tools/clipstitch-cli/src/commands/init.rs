//! Write the default config file.

use std::path::Path;
use std::process::ExitCode;

use clipstitch_common::{config_file_path, AppConfig};

pub fn run(path: Option<&Path>, force: bool) -> anyhow::Result<ExitCode> {
    let target = path.map(Path::to_path_buf).unwrap_or_else(config_file_path);

    if target.exists() && !force {
        anyhow::bail!(
            "Config already exists at {} (use --force to replace it)",
            target.display()
        );
    }

    AppConfig::default()
        .save_to(&target)
        .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", target.display()))?;

    println!("Wrote default config: {}", target.display());
    println!("  Edit paths.transitions_dir or set TRANSITIONS_DIR to point at your bumpers.");
    Ok(ExitCode::SUCCESS)
}
