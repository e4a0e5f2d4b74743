/*!

`k3sprov` provisions a small self-managed k3s cluster on EC2: one public
bastion host plus a main node and workers in the caller's subnets. The
join token and kubeconfig are pulled off the main node through the bastion
once it is running. `delete` rediscovers everything by tag and tears it
down behind two confirmation prompts.

!*/

mod aws;
mod config;
mod create;
mod delete;
mod error;
mod network;
mod provision;
mod readiness;
mod ssh;
mod tags;
mod teardown;

use clap::Parser;
use config::ProvisionConfig;
use env_logger::Builder;
use error::Result;
use log::LevelFilter;

/// Provision and tear down small self-managed k3s clusters on EC2.
#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Args {
    /// Set logging verbosity [trace|debug|info|warn|error]. If the environment variable `RUST_LOG`
    /// is present, it overrides the default logging behavior. See https://docs.rs/env_logger/latest
    #[clap(long = "log-level", default_value = "info")]
    log_level: LevelFilter,
    /// The region to create cluster resources in.
    #[clap(long, env = "AWS_REGION", default_value = "us-east-1")]
    region: String,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
enum Command {
    /// Create a cluster: bastion, main node, and workers.
    Create(create::Create),
    /// Destroy a cluster and its bastion by name.
    Delete(delete::Delete),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(args.log_level);
    if let Err(e) = run(args).await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = ProvisionConfig::new(args.region);
    let sdk_config = aws::sdk_config(&config.region).await;
    let client = aws_sdk_ec2::Client::new(&sdk_config);
    match args.command {
        Command::Create(create) => create.run(&client, &config).await,
        Command::Delete(delete) => delete.run(&client, &config).await,
    }
}

/// Initialize the logger with the value passed by `--log-level` (or its default) when the
/// `RUST_LOG` environment variable is not present. If present, the `RUST_LOG` environment variable
/// overrides `--log-level`/`level`.
fn init_logger(level: LevelFilter) {
    match std::env::var(env_logger::DEFAULT_FILTER_ENV).ok() {
        Some(_) => {
            // RUST_LOG exists; env_logger will use it.
            Builder::from_default_env().init();
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate only.
            Builder::new()
                .filter(Some(env!("CARGO_CRATE_NAME")), level)
                .init();
        }
    }
}
