//! The cross-host secret extraction protocol. All remote access goes
//! through the system `ssh` with agent forwarding and a jump proxy via the
//! bastion; strict host key checking is off because every host is freshly
//! created. Every command carries an explicit timeout so a hung connection
//! cannot block the run.

use crate::config::ProvisionConfig;
use crate::error::{self, Result};
use log::{debug, info};
use snafu::{ensure, ResultExt};
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

const SSH_USER: &str = "ec2-user";
const TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/node-token";
const KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";

/// Real tokens and kubeconfigs are always longer than this; anything
/// shorter means the read raced the k3s install or captured garbage.
const MIN_SECRET_LEN: usize = 50;

/// Register the key with the ssh agent and wait for it. This must complete
/// before any remote command is issued; agent forwarding through the
/// bastion depends on it.
pub async fn register_key(key_path: &Path, timeout: Duration) -> Result<()> {
    ensure!(
        key_path.exists(),
        error::KeyFileSnafu { path: key_path }
    );
    let status = tokio::time::timeout(
        timeout,
        Command::new("ssh-add").arg(key_path).status(),
    )
    .await
    .context(error::CommandTimeoutSnafu { what: "ssh-add" })?
    .context(error::ProcessSnafu { what: "ssh-add" })?;
    ensure!(status.success(), error::SshAgentSnafu { path: key_path });
    info!("Added key '{}' to the ssh agent", key_path.display());
    Ok(())
}

async fn run_ssh(config: &ProvisionConfig, args: &[String]) -> Result<Option<Output>> {
    let output = tokio::time::timeout(
        config.command_timeout,
        Command::new("ssh")
            .arg("-A")
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .args(args)
            .stdin(Stdio::null())
            .output(),
    )
    .await;
    match output {
        Ok(output) => Ok(Some(output.context(error::ProcessSnafu { what: "ssh" })?)),
        // A timed-out attempt is retried by the caller, not fatal.
        Err(_) => Ok(None),
    }
}

/// Probe raw connectivity to the bastion with an argument-less session.
/// stdin is closed, so the remote shell exits on EOF; a success exit proves
/// the host is reachable and the first-contact key exchange completed.
async fn probe_bastion(config: &ProvisionConfig, bastion_ip: &str) -> Result<()> {
    let budget = &config.ssh_retry;
    let host = format!("{}@{}", SSH_USER, bastion_ip);
    for attempt in 1..=budget.max_attempts {
        match run_ssh(config, &[host.clone()]).await? {
            Some(output) if output.status.success() => {
                debug!("Bastion '{}' reachable on attempt {}", bastion_ip, attempt);
                return Ok(());
            }
            Some(output) => debug!(
                "Bastion probe attempt {}/{} exited with {}",
                attempt, budget.max_attempts, output.status
            ),
            None => debug!(
                "Bastion probe attempt {}/{} timed out",
                attempt, budget.max_attempts
            ),
        }
        if !budget.final_attempt(attempt) {
            tokio::time::sleep(budget.interval).await;
        }
    }
    error::BastionUnreachableSnafu {
        host: bastion_ip,
        attempts: budget.max_attempts,
    }
    .fail()
}

/// Run a command on a private host, jump-proxied through the bastion,
/// retrying connectivity failures within the ssh budget.
async fn jump_command(
    config: &ProvisionConfig,
    bastion_ip: &str,
    target_ip: &str,
    remote_command: &str,
) -> Result<Vec<u8>> {
    let budget = &config.ssh_retry;
    let args = vec![
        "-J".to_string(),
        format!("{}@{}", SSH_USER, bastion_ip),
        format!("{}@{}", SSH_USER, target_ip),
        remote_command.to_string(),
    ];
    for attempt in 1..=budget.max_attempts {
        match run_ssh(config, &args).await? {
            Some(output) if output.status.success() => return Ok(output.stdout),
            Some(output) => debug!(
                "Remote command attempt {}/{} on '{}' failed: {}",
                attempt,
                budget.max_attempts,
                target_ip,
                String::from_utf8_lossy(&output.stderr).trim_end()
            ),
            None => debug!(
                "Remote command attempt {}/{} on '{}' timed out",
                attempt, budget.max_attempts, target_ip
            ),
        }
        if !budget.final_attempt(attempt) {
            tokio::time::sleep(budget.interval).await;
        }
    }
    error::RemoteCommandSnafu {
        target: target_ip,
        via: bastion_ip,
        attempts: budget.max_attempts,
    }
    .fail()
}

fn validate_secret(secret: &[u8]) -> Result<()> {
    ensure!(
        secret.len() >= MIN_SECRET_LEN,
        error::SecretTooShortSnafu { len: secret.len() }
    );
    Ok(())
}

/// Probe the bastion, then pull the join token and the kubeconfig off the
/// main node. The whole step is capped by `extraction_timeout` independent
/// of the per-attempt budgets, so an unreachable host cannot hang the run.
/// Returns the join token.
pub async fn extract_cluster_secrets(
    config: &ProvisionConfig,
    cluster_name: &str,
    bastion_ip: &str,
    main_ip: &str,
) -> Result<String> {
    tokio::time::timeout(config.extraction_timeout, async {
        probe_bastion(config, bastion_ip).await?;
        let token = extract_join_token(config, bastion_ip, main_ip).await?;
        extract_kubeconfig(config, cluster_name, bastion_ip, main_ip).await?;
        Ok(token)
    })
    .await
    .context(error::CommandTimeoutSnafu {
        what: "secret extraction",
    })?
}

/// Read the cluster join token from the main node through the bastion.
async fn extract_join_token(
    config: &ProvisionConfig,
    bastion_ip: &str,
    main_ip: &str,
) -> Result<String> {
    info!("Getting the k3s join token from '{}'", main_ip);
    let output = jump_command(
        config,
        bastion_ip,
        main_ip,
        &format!("sudo cat {}", TOKEN_PATH),
    )
    .await?;
    validate_secret(&output)?;
    Ok(String::from_utf8_lossy(&output).trim_end().to_string())
}

/// The extracted kubeconfig names its cluster, context, and user `default`;
/// rewrite those values to the real cluster name.
fn rename_cluster(kubeconfig: &str, cluster_name: &str) -> String {
    kubeconfig.replace(": default", &format!(": {}", cluster_name))
}

/// Read the kubeconfig from the main node through the bastion, rewrite its
/// placeholder cluster identifier, and persist it locally. The written file
/// is the one durable local artifact of a run.
async fn extract_kubeconfig(
    config: &ProvisionConfig,
    cluster_name: &str,
    bastion_ip: &str,
    main_ip: &str,
) -> Result<()> {
    info!("Getting the k3s kubeconfig from '{}'", main_ip);
    let output = jump_command(
        config,
        bastion_ip,
        main_ip,
        &format!("sudo cat {}", KUBECONFIG_PATH),
    )
    .await?;
    validate_secret(&output)?;
    let kubeconfig = rename_cluster(&String::from_utf8_lossy(&output), cluster_name);
    tokio::fs::write(&config.kubeconfig_path, kubeconfig)
        .await
        .context(error::WriteFileSnafu {
            path: config.kubeconfig_path.clone(),
        })?;
    info!("Wrote kubeconfig to '{}'", config.kubeconfig_path.display());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{rename_cluster, validate_secret};

    #[test]
    fn secret_length_floor() {
        // 49 bytes is corrupt, 50 is plausible.
        assert!(validate_secret(&[b'a'; 49]).is_err());
        assert!(validate_secret(&[b'a'; 50]).is_ok());
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(validate_secret(b"").is_err());
    }

    #[test]
    fn kubeconfig_cluster_is_renamed() {
        let kubeconfig = "\
clusters:
- cluster:
    server: https://127.0.0.1:6443
  name: default
contexts:
- context:
    cluster: default
    user: default
  name: default
current-context: default
";
        let renamed = rename_cluster(kubeconfig, "demo");
        assert!(!renamed.contains(": default"));
        assert!(renamed.contains("name: demo"));
        assert!(renamed.contains("cluster: demo"));
        assert!(renamed.contains("current-context: demo"));
        // Unrelated values are untouched.
        assert!(renamed.contains("server: https://127.0.0.1:6443"));
    }
}
