use clap::Parser;
use tracing_subscriber::EnvFilter;

use jobvisor::cli::{Cli, Command, run_command, run_config_command};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobvisor=info"));
    let json = std::env::var("JOBVISOR_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => {
            let code = run_command(args).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Command::Config(cmd) => run_config_command(cmd),
    }
}
