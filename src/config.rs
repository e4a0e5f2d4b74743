use crate::error::{self, Result};
use crate::tags::TagScheme;
use aws_sdk_ec2::model::InstanceType;
use snafu::{ensure, OptionExt};
use std::path::PathBuf;
use std::time::Duration;

/// A bounded wait: how many times to poll and how long to sleep between
/// polls. Scoped to a single wait operation, never persisted.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryBudget {
    /// True for the last attempt of this budget. Callers skip the
    /// inter-attempt sleep after it; the interval paces retries, it is not
    /// a tax on the failure path.
    pub fn final_attempt(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

/// Immutable settings for one provisioning run. Built once in `main` and
/// passed by reference into every component; nothing reads ambient state.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// The region all resources are created in.
    pub region: String,
    /// The AMI every instance (bastion included) is launched from.
    pub ami_id: String,
    pub instance_type: InstanceType,
    /// The tag scheme that marks resources as owned by this tool.
    pub tags: TagScheme,
    /// Budget for instance state polling (running and terminated waits).
    pub readiness: RetryBudget,
    /// Budget for ssh connectivity/remote-command retries.
    pub ssh_retry: RetryBudget,
    /// Ceiling for a single remote command so a hung connection cannot
    /// block the run.
    pub command_timeout: Duration,
    /// Ceiling for the whole secret-extraction step, independent of the
    /// per-attempt retry budget.
    pub extraction_timeout: Duration,
    /// Ceiling for registering the key with the ssh agent.
    pub agent_timeout: Duration,
    /// Where the extracted kubeconfig is written, overwritten per run.
    pub kubeconfig_path: PathBuf,
}

impl ProvisionConfig {
    pub fn new(region: String) -> Self {
        Self {
            region,
            ami_id: "ami-0233c2d874b811deb".to_string(),
            instance_type: InstanceType::T2Micro,
            tags: TagScheme::default(),
            readiness: RetryBudget {
                max_attempts: 45,
                interval: Duration::from_secs(2),
            },
            ssh_retry: RetryBudget {
                max_attempts: 10,
                interval: Duration::from_secs(2),
            },
            command_timeout: Duration::from_secs(15),
            extraction_timeout: Duration::from_secs(60),
            agent_timeout: Duration::from_secs(3),
            kubeconfig_path: PathBuf::from("./k3s_kubeconfig"),
        }
    }
}

/// The desired cluster for one creation run.
#[derive(Debug, Clone)]
pub struct ClusterSpec {
    /// Total number of cluster instances, main node included.
    pub count: i32,
    pub cluster_name: String,
    /// The EC2 key pair name, derived from the key file's stem.
    pub key_name: String,
    /// Local path to the key material registered with the ssh agent.
    pub key_path: PathBuf,
    /// Candidate subnets; instances are spread over these round-robin.
    pub subnets: Vec<String>,
}

impl ClusterSpec {
    pub fn new(count: i32, cluster_name: String, key: PathBuf, subnets: Vec<String>) -> Result<Self> {
        ensure!(count > 0, error::InvalidCountSnafu { count });
        ensure!(
            !subnets.is_empty(),
            error::MissingSnafu {
                what: "subnet ids",
                from: "the command line or K3S_SUBNETS",
            }
        );
        let key_name = key
            .file_stem()
            .and_then(|stem| stem.to_str())
            .context(error::KeyNameSnafu { path: key.clone() })?
            .to_string();
        Ok(Self {
            count,
            cluster_name,
            key_name,
            key_path: key,
            subnets,
        })
    }
}

#[cfg(test)]
mod test {
    use super::{ClusterSpec, RetryBudget};
    use std::path::PathBuf;
    use std::time::Duration;

    fn subnets() -> Vec<String> {
        vec!["subnet-aaa".to_string(), "subnet-bbb".to_string()]
    }

    #[test]
    fn key_name_is_file_stem() {
        let spec = ClusterSpec::new(
            3,
            "demo".to_string(),
            PathBuf::from("/home/op/.ssh/cluster-key.pem"),
            subnets(),
        )
        .unwrap();
        assert_eq!(spec.key_name, "cluster-key");
    }

    #[test]
    fn zero_count_is_rejected() {
        assert!(ClusterSpec::new(
            0,
            "demo".to_string(),
            PathBuf::from("key.pem"),
            subnets()
        )
        .is_err());
    }

    #[test]
    fn only_the_last_attempt_is_final() {
        let budget = RetryBudget {
            max_attempts: 3,
            interval: Duration::from_secs(2),
        };
        assert!(!budget.final_attempt(1));
        assert!(!budget.final_attempt(2));
        assert!(budget.final_attempt(3));
    }

    #[test]
    fn empty_subnets_are_rejected() {
        assert!(
            ClusterSpec::new(1, "demo".to_string(), PathBuf::from("key.pem"), Vec::new()).is_err()
        );
    }
}
