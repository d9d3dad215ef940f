pub mod check;
pub mod clean;
pub mod compile;
pub mod init;

use std::path::Path;

use clipstitch_common::AppConfig;

/// Load the config for a command and start logging.
///
/// An explicit `--config` path must exist and parse; otherwise the standard
/// location is tried and defaults are used when it is absent.
pub fn prepare(path: Option<&Path>, verbose: bool) -> anyhow::Result<AppConfig> {
    let mut config = match path {
        Some(path) => AppConfig::load_from(path)?.with_env_overrides(),
        None => AppConfig::load(),
    };
    if verbose {
        config.logging.level = "debug".to_string();
    }
    clipstitch_common::logging::init_logging(&config.logging);
    Ok(config)
}
