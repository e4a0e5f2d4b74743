use crate::config::ProvisionConfig;
use crate::error::Result;
use crate::teardown;
use clap::Parser;

/// Discover and destroy everything tagged for a cluster name.
#[derive(Debug, Parser)]
pub(crate) struct Delete {
    /// The name of the cluster to terminate.
    #[clap(short = 'n', long)]
    name: String,
}

impl Delete {
    pub(crate) async fn run(
        self,
        client: &aws_sdk_ec2::Client,
        config: &ProvisionConfig,
    ) -> Result<()> {
        teardown::run(client, config, &self.name).await
    }
}
