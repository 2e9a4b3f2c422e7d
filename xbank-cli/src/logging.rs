//! Tracing subscriber setup
//!
//! Log output goes to stderr so stdout carries only command output.
//! `RUST_LOG` overrides the default level when set.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use xbank_core::config::{Config, LogFormat};

use crate::commands::get_data_dir;

pub fn init(verbose: bool) {
    let default_level = if verbose {
        "xbank=debug,xbank_core=debug"
    } else {
        "warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // A broken settings file is reported by the command itself
    let format = Config::load(&get_data_dir())
        .map(|config| config.log_format)
        .unwrap_or_default();

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_thread_ids(false),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(true),
                )
                .init();
        }
    }
}
