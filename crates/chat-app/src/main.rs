use clap::Parser;
use parley::settings::SettingsStore;
use parley::{ChatApp, Cli};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(SettingsStore::default_config_path);
    let settings = SettingsStore::new(config_path, &cli.overrides());

    let result = match ChatApp::new(settings) {
        Ok(app) => app.run().await,
        Err(error) => Err(error),
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "parley exited with an error");
            eprintln!("error: {error}");
            std::process::ExitCode::FAILURE
        }
    }
}
