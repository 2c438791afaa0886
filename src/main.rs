use clap::Parser;

use archive_repacker::cli::{self, Cli};

fn main() {
    let cli = Cli::parse();

    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    rt.block_on(async {
        let filter = if cli.verbose { "debug" } else { "info" };
        tracing_subscriber::fmt().with_env_filter(filter).init();

        if let Err(e) = cli::dispatch(&cli).await {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    });
}
