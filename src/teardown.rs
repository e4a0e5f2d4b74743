//! Teardown: rediscover everything tagged for a cluster name, walk the
//! operator through two destructive confirmation gates, then delete in
//! dependency order (instances before security groups, since a group still
//! referenced by a live attachment cannot be deleted).

use crate::config::ProvisionConfig;
use crate::error::{self, Result};
use crate::readiness::{self, RUNNING, TERMINATED};
use log::{info, warn};
use snafu::ResultExt;
use std::io::BufRead;

/// What discovery found for a cluster name.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DiscoveryOutcome {
    /// No owned resources remain: report, exit cleanly, and never reach
    /// the final confirmation.
    NothingToDo,
    /// Something remains; render it and ask for the final confirmation.
    Proceed,
}

fn discovery_outcome(instance_ids: &[String], group_ids: &[String]) -> DiscoveryOutcome {
    if instance_ids.is_empty() && group_ids.is_empty() {
        DiscoveryOutcome::NothingToDo
    } else {
        DiscoveryOutcome::Proceed
    }
}

/// Read one line and require an exact literal `YES`. Anything else, an
/// empty line and a closed stream included, is a rejection.
fn confirmed<R: BufRead>(input: &mut R) -> bool {
    let mut line = String::new();
    if input.read_line(&mut line).is_err() {
        return false;
    }
    line.trim_end_matches(&['\r', '\n'][..]) == "YES"
}

/// Ids of running instances tagged for the cluster.
async fn discover_instances(
    client: &aws_sdk_ec2::Client,
    config: &ProvisionConfig,
    cluster_name: &str,
) -> Result<Vec<String>> {
    let records =
        readiness::fetch_records(client, &config.tags, cluster_name, None, None).await?;
    Ok(records
        .into_iter()
        .filter(|record| record.state_code == RUNNING)
        .map(|record| record.id)
        .collect())
}

/// Ids of security groups tagged for the cluster.
async fn discover_security_groups(
    client: &aws_sdk_ec2::Client,
    config: &ProvisionConfig,
    cluster_name: &str,
) -> Result<Vec<String>> {
    let output = client
        .describe_security_groups()
        .set_filters(Some(config.tags.discovery_filters(cluster_name)))
        .send()
        .await
        .context(error::DescribeSecurityGroupsSnafu)?;
    Ok(output
        .security_groups()
        .unwrap_or_default()
        .iter()
        .filter_map(|group| group.group_id().map(str::to_string))
        .collect())
}

async fn terminate_instance(client: &aws_sdk_ec2::Client, id: &str) -> Result<()> {
    client
        .terminate_instances()
        .instance_ids(id)
        .send()
        .await
        .context(error::TerminateInstancesSnafu { id })?;
    info!("Terminated instance '{}'", id);
    Ok(())
}

async fn delete_security_group(client: &aws_sdk_ec2::Client, group_id: &str) -> Result<()> {
    client
        .delete_security_group()
        .group_id(group_id)
        .send()
        .await
        .context(error::DeleteSecurityGroupSnafu { group_id })?;
    info!("Deleted security group '{}'", group_id);
    Ok(())
}

fn cancel() -> ! {
    println!("Cancelling.");
    std::process::exit(1);
}

/// The teardown sequence. Exits the process with 1 on a rejected
/// confirmation; returns Ok for both a completed teardown and a
/// nothing-to-do run.
pub async fn run(
    client: &aws_sdk_ec2::Client,
    config: &ProvisionConfig,
    cluster_name: &str,
) -> Result<()> {
    println!("\n{}", "#".repeat(72));
    println!("\nThis DESTROYS the '{}' cluster and its bastion.", cluster_name);
    println!("Are you sure you want to continue? Only 'YES' will be accepted.");
    print!("CONTINUE DESTROY?: ");
    flush_stdout();
    if !confirmed(&mut std::io::stdin().lock()) {
        cancel();
    }

    let instance_ids = discover_instances(client, config, cluster_name).await?;
    let group_ids = discover_security_groups(client, config, cluster_name).await?;

    if discovery_outcome(&instance_ids, &group_ids) == DiscoveryOutcome::NothingToDo {
        println!(
            "\nNo resources found associated with the '{}' cluster. Exiting.",
            cluster_name
        );
        return Ok(());
    }

    println!(
        "\nThe following resources belong to the '{}' cluster.",
        cluster_name
    );
    println!("\nInstances that will be DESTROYED:");
    for id in &instance_ids {
        println!("   {}", id);
    }
    println!("\nSecurity groups that will also be DESTROYED:");
    for group_id in &group_ids {
        println!("   {}", group_id);
    }
    println!("\nThere is no going back. Only 'YES' will be accepted.");
    print!("FINALIZE DESTROY?: ");
    flush_stdout();
    if !confirmed(&mut std::io::stdin().lock()) {
        cancel();
    }

    info!("Destroying cluster '{}'", cluster_name);
    for id in &instance_ids {
        terminate_instance(client, id).await?;
    }

    // Give each instance its bounded wait to reach terminated before
    // deleting groups. The bound is advisory pacing: a straggler is logged
    // and group deletion is attempted anyway.
    for id in &instance_ids {
        if let Err(e) = readiness::wait_for_state(
            client,
            &config.tags,
            cluster_name,
            None,
            Some(id),
            TERMINATED,
            &config.readiness,
        )
        .await
        {
            warn!(
                "Instance '{}' did not reach terminated within the wait bound: {}",
                id, e
            );
        }
    }

    for group_id in &group_ids {
        delete_security_group(client, group_id).await?;
    }

    Ok(())
}

fn flush_stdout() {
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

#[cfg(test)]
mod test {
    use super::{confirmed, discovery_outcome, DiscoveryOutcome};

    fn check(input: &str) -> bool {
        confirmed(&mut input.as_bytes())
    }

    #[test]
    fn only_exact_uppercase_yes_is_accepted() {
        assert!(check("YES\n"));
        assert!(check("YES"));
        assert!(!check("yes\n"));
        assert!(!check("Yes\n"));
        assert!(!check("YES \n"));
        assert!(!check(" YES\n"));
        assert!(!check("Y\n"));
    }

    #[test]
    fn empty_or_closed_input_is_a_rejection() {
        assert!(!check("\n"));
        assert!(!check(""));
    }

    #[test]
    fn windows_line_endings_are_tolerated() {
        assert!(check("YES\r\n"));
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn empty_discovery_short_circuits_before_the_final_prompt() {
        assert_eq!(
            discovery_outcome(&[], &[]),
            DiscoveryOutcome::NothingToDo
        );
    }

    #[test]
    fn any_remaining_resource_proceeds_to_the_final_prompt() {
        let instances = ids(&["i-0abc"]);
        let groups = ids(&["sg-0def"]);
        assert_eq!(
            discovery_outcome(&instances, &[]),
            DiscoveryOutcome::Proceed
        );
        assert_eq!(discovery_outcome(&[], &groups), DiscoveryOutcome::Proceed);
        assert_eq!(
            discovery_outcome(&instances, &groups),
            DiscoveryOutcome::Proceed
        );
    }
}
