//! previewd - Entry Point
//!
//! Keeps one preview container per project environment alive on the managed
//! scheduler or as a local process, and answers the containers' webhooks.

use std::collections::HashMap;
use std::env;

use previewd::app::options::{AppOptions, Secrets};
use previewd::app::run::run;
use previewd::filesys::file::File;
use previewd::logs::{init_logging, LogOptions};
use previewd::storage::layout::StorageLayout;
use previewd::storage::settings::Settings;
use previewd::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = match cli_args.get("data-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file
    let settings_file = match cli_args.get("config") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let settings = match settings_file.read_json_or_default::<Settings>().await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {}", e);
            return;
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        task_output: !settings.mute_task_output,
        json_format: settings.json_logs,
    };
    if let Err(e) = init_logging(log_options) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let options = AppOptions::from_settings(layout, &settings, Secrets::from_env());

    info!(
        "Running previewd {} ({}) with data dir {}",
        version.version,
        version.git_hash,
        options.layout.base_dir.display()
    );
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run previewd: {e}");
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
