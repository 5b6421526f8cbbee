use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use throughput_perf::{console, run};

#[derive(Parser)]
#[clap(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run throughput tests over a simulated link and print the results
    Run(run::Opt),
    /// Serve the text console on stdin and stdout
    Console(console::Opt),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let opt = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new("warn"))
                .unwrap(),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let r = match opt.command {
        Commands::Run(opt) => run::run(opt).await,
        Commands::Console(opt) => console::run(opt).await,
    };
    if let Err(e) = r {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
