//! Startup banner

use std::path::Path;

use super::config::AppConfig;
use super::constants::APP_NAME;

/// Print the startup banner with where data lives and what is listening
pub fn print_banner(config: &AppConfig, data_dir: &Path, sidecar_socket: Option<&Path>) {
    // Label width, pad to align values
    const W: usize = 16;

    println!();
    println!(
        "  \x1b[1m\x1b[36m{}\x1b[0m \x1b[90mv{}\x1b[0m",
        APP_NAME,
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!(
        "  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}",
        "Data:",
        data_dir.display()
    );
    println!(
        "  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m v{} \x1b[90m({} project overrides)\x1b[0m",
        "Call storage:",
        config.router.default_version,
        config.router.projects.len()
    );

    match sidecar_socket {
        Some(path) => println!(
            "  \x1b[33m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}",
            "Sidecar:",
            path.display()
        ),
        None => println!(
            "  \x1b[90m➜  {:<W$} disabled, use --sidecar true to enable\x1b[0m",
            "Sidecar:"
        ),
    }

    if !config.cache.enabled {
        println!("  \x1b[90m➜  {:<W$} disabled\x1b[0m", "Read cache:");
    }
    println!();
}
