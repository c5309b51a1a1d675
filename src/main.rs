//! Binary entry point.

use std::process::ExitCode;

use pulsekeys::{config::KeyConfig, daemon::Daemon, tracing_config};
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    if let Err(e) = tracing_config::init() {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let daemon = match Daemon::start(KeyConfig::default()).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    match daemon.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("daemon exited: {e}");
            ExitCode::FAILURE
        }
    }
}
