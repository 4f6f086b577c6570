mod cmd;

use clap::Parser;
use cmd::config::{Effective, ReporterArgs};

#[derive(Parser)]
#[command(name = "status-reporter", about = "Репортер статуса: регистрация в агрегаторе и периодическая публикация")]
struct Cli {
    #[command(flatten)]
    args: ReporterArgs,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let eff = match Effective::new(&cli.args) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cmd::run::run(&eff).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
