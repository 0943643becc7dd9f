use std::process::ExitCode;

use parley::settings::SettingsStore;
use tracing_subscriber::EnvFilter;

/// Application entry point.
///
/// `parley --init` writes the effective settings to the settings file and exits; otherwise the
/// terminal chat runs until `/quit` or end of input.
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings_store = SettingsStore::load();

    if std::env::args().nth(1).as_deref() == Some("--init") {
        return match settings_store.persist() {
            Ok(()) => {
                println!("{}", settings_store.config_path().display());
                ExitCode::SUCCESS
            }
            Err(error) => {
                tracing::error!("failed to write settings: {}", error);
                ExitCode::FAILURE
            }
        };
    }

    match parley::terminal::run(settings_store.settings().clone()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("parley stopped: {}", error);
            ExitCode::FAILURE
        }
    }
}
