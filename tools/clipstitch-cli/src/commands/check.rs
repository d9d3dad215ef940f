//! Check external tools and asset directories.

use std::process::ExitCode;

use clipstitch_common::AppConfig;
use clipstitch_engine::health::{all_required_available, check_capabilities, print_capability_report};

pub fn run(config: &AppConfig) -> anyhow::Result<ExitCode> {
    println!("clipstitch System Check");
    println!("{}", "=".repeat(50));

    let capabilities = check_capabilities(config);
    print_capability_report(&capabilities);

    println!();
    if all_required_available(&capabilities) {
        println!("All required capabilities are available. clipstitch is ready.");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Some required capabilities are missing. See above for fixes.");
        Ok(ExitCode::FAILURE)
    }
}
