use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

/// Sets up the global `tracing` subscriber from the CLI's debug count and
/// log destination. `RUST_LOG` always wins over `-d`/`-dd` if set, so
/// operators can reach for finer-grained filtering without a rebuild.
pub fn init(cli: &Cli) -> anyhow::Result<()> {
    let default_level = match cli.debug {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &cli.log {
        Some(path) => {
            let file = open_log_file(path)?;
            builder.with_writer(Mutex::new(file)).init();
        }
        None => {
            builder.init();
        }
    }

    if cli.syslog {
        tracing::warn!("syslog logging was requested but is not available in this build; logging to stderr instead");
    }
    Ok(())
}

fn open_log_file(path: &Path) -> anyhow::Result<std::fs::File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}
