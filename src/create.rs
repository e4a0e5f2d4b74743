use crate::config::{ClusterSpec, ProvisionConfig};
use crate::error::Result;
use crate::{provision, ssh};
use clap::Parser;
use std::path::PathBuf;

/// Provision a bastion plus a k3s main node and workers.
#[derive(Debug, Parser)]
pub(crate) struct Create {
    /// The number of k3s cluster instances.
    #[clap(short = 'c', long, env = "K3S_COUNT")]
    count: i32,

    /// The name of the k3s cluster.
    #[clap(short = 'n', long, env = "K3S_NAME")]
    name: String,

    /// The full path to the ssh key to use when provisioning instances.
    #[clap(short = 'k', long, env = "K3S_KEY")]
    key: PathBuf,

    /// Comma separated list of subnet ids to place instances in.
    #[clap(short = 's', long, env = "K3S_SUBNETS", use_value_delimiter = true)]
    subnets: Vec<String>,
}

impl Create {
    pub(crate) async fn run(
        self,
        client: &aws_sdk_ec2::Client,
        config: &ProvisionConfig,
    ) -> Result<()> {
        let spec = ClusterSpec::new(self.count, self.name, self.key, self.subnets)?;
        // The agent must hold the key before the first remote command.
        ssh::register_key(&spec.key_path, config.agent_timeout).await?;
        provision::create_cluster(client, config, &spec).await
    }
}
