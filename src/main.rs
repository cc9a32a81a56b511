use brickwatch::app::App;
use brickwatch::cli::{Args, Command};
use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    match args.command {
        Some(Command::Ops { base_url, op }) => brickwatch::cli::run_ops(&base_url, op).await,
        Some(Command::Serve) | None => match App::new(args.tracing).await {
            Ok(app) => app.run().await,
            Err(e) => {
                eprintln!("failed to start: {e:#}");
                ExitCode::from(1)
            }
        },
    }
}
