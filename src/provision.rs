//! Instance provisioning: one bastion in a public subnet, then the main
//! node and workers spread round-robin over the supplied subnets. Strictly
//! ordered: bastion before main, main's token extraction before any worker
//! launch, because worker user data embeds the extracted token.

use crate::config::{ClusterSpec, ProvisionConfig};
use crate::error::{self, Result};
use crate::readiness;
use crate::tags::{self, display_name};
use crate::{network, ssh};
use aws_sdk_ec2::model::Filter;
use log::info;
use snafu::{ensure, OptionExt, ResultExt};

const K3S_INSTALL: &str = "#!/usr/bin/env bash\ncurl -sfL https://get.k3s.io";

pub const BASTION_SUFFIX: &str = "-bastion";
pub const MAIN_SUFFIX: &str = "-main";

/// One planned cluster instance: its role suffix and target subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePlan {
    pub suffix: String,
    pub subnet: String,
}

/// Lay out `count` instances over the subnets. The first instance is the
/// main node; workers wrap around the subnet list when count exceeds it.
pub fn plan_instances(count: i32, subnets: &[String]) -> Vec<InstancePlan> {
    (0..count as usize)
        .map(|index| InstancePlan {
            suffix: role_suffix(index),
            subnet: subnets[index % subnets.len()].clone(),
        })
        .collect()
}

fn role_suffix(index: usize) -> String {
    if index == 0 {
        MAIN_SUFFIX.to_string()
    } else {
        format!("-worker-{:02}", index - 1)
    }
}

fn server_user_data() -> String {
    base64::encode(format!("{} | sh -", K3S_INSTALL))
}

/// Worker user data: the install script joins the cluster formed by the
/// main node, so no further orchestration is needed after launch.
fn agent_user_data(main_ip: &str, token: &str) -> String {
    base64::encode(format!(
        "{} | K3S_URL=https://{}:6443 K3S_TOKEN={} sh -",
        K3S_INSTALL, main_ip, token
    ))
}

/// Check that every supplied subnet exists and that they all share one VPC;
/// return that VPC's id.
pub async fn validate_subnets(client: &aws_sdk_ec2::Client, subnets: &[String]) -> Result<String> {
    let output = client
        .describe_subnets()
        .set_subnet_ids(Some(subnets.to_vec()))
        .send()
        .await
        .context(error::DescribeSubnetsSnafu)?;
    let vpc_ids: Vec<String> = output
        .subnets()
        .unwrap_or_default()
        .iter()
        .filter_map(|subnet| subnet.vpc_id().map(str::to_string))
        .collect();
    ensure!(
        !vpc_ids.is_empty(),
        error::MissingSnafu {
            what: "subnets",
            from: "DescribeSubnets response",
        }
    );
    shared_vpc(&vpc_ids)
        .map(str::to_string)
        .context(error::SubnetVpcMismatchSnafu {
            subnets: subnets.to_vec(),
        })
}

/// The single VPC id shared by all entries, if there is one.
fn shared_vpc(vpc_ids: &[String]) -> Option<&str> {
    let first = vpc_ids.first()?;
    vpc_ids
        .iter()
        .all(|vpc_id| vpc_id == first)
        .then(|| first.as_str())
}

/// Find a subnet in the VPC that auto-assigns public addresses and still
/// has at least one free address. The bastion must land in one of these to
/// be reachable from the operator's machine.
pub async fn public_subnet(client: &aws_sdk_ec2::Client, vpc_id: &str) -> Result<String> {
    let output = client
        .describe_subnets()
        .filters(Filter::builder().name("state").values("available").build())
        .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
        .send()
        .await
        .context(error::DescribeSubnetsSnafu)?;
    output
        .subnets()
        .unwrap_or_default()
        .iter()
        .find(|subnet| {
            subnet.map_public_ip_on_launch().unwrap_or(false)
                && subnet.available_ip_address_count().unwrap_or(0) >= 1
        })
        .and_then(|subnet| subnet.subnet_id().map(str::to_string))
        .context(error::NoPublicSubnetSnafu { vpc: vpc_id })
}

async fn run_instance(
    client: &aws_sdk_ec2::Client,
    config: &ProvisionConfig,
    spec: &ClusterSpec,
    group_id: &str,
    subnet_id: &str,
    user_data: Option<String>,
) -> Result<String> {
    let call = client
        .run_instances()
        .image_id(&config.ami_id)
        .instance_type(config.instance_type.clone())
        .key_name(&spec.key_name)
        .min_count(1)
        .max_count(1)
        .security_group_ids(group_id)
        .subnet_id(subnet_id)
        .set_user_data(user_data);
    let output = call.send().await.context(error::RunInstancesSnafu)?;
    output
        .instances()
        .unwrap_or_default()
        .first()
        .and_then(|instance| instance.instance_id().map(str::to_string))
        .context(error::MissingSnafu {
            what: "instance id",
            from: "RunInstances response",
        })
}

/// Launch the bastion: pick a public subnet, create and rule its security
/// group (ingress scoped to the operator's current address), run one
/// instance, tag it. Returns the bastion's instance id.
pub async fn create_bastion(
    client: &aws_sdk_ec2::Client,
    config: &ProvisionConfig,
    spec: &ClusterSpec,
    vpc_id: &str,
) -> Result<String> {
    let name = display_name(&spec.cluster_name, BASTION_SUFFIX);
    info!(
        "Creating bastion node '{}' for cluster '{}'",
        name, spec.cluster_name
    );

    let subnet_id = public_subnet(client, vpc_id).await?;
    let group_id =
        network::create_security_group(client, &config.tags, &spec.cluster_name, &name, vpc_id)
            .await?;
    let operator_ip = network::operator_public_ip().await?;
    network::authorize_ingress(client, &group_id, &network::bastion_ingress(&operator_ip)).await?;
    network::authorize_egress(client, &group_id, &network::egress_all()).await?;

    let instance_id = run_instance(client, config, spec, &group_id, &subnet_id, None).await?;
    tags::tag_resource(client, &config.tags, &spec.cluster_name, &name, &instance_id).await?;
    info!("Created bastion instance '{}'", instance_id);
    Ok(instance_id)
}

/// The full creation pipeline: validate subnets, bastion, cluster security
/// group, then the main node and workers one at a time.
pub async fn create_cluster(
    client: &aws_sdk_ec2::Client,
    config: &ProvisionConfig,
    spec: &ClusterSpec,
) -> Result<()> {
    info!(
        "Deploying cluster '{}' with {} instances",
        spec.cluster_name, spec.count
    );

    let vpc_id = validate_subnets(client, &spec.subnets).await?;
    let bastion_id = create_bastion(client, config, spec, &vpc_id).await?;

    let group_id = network::create_security_group(
        client,
        &config.tags,
        &spec.cluster_name,
        &spec.cluster_name,
        &vpc_id,
    )
    .await?;
    network::authorize_ingress(client, &group_id, &network::cluster_ingress()).await?;
    network::authorize_egress(client, &group_id, &network::egress_all()).await?;
    info!("Authorized ingress and egress rules on '{}'", group_id);

    let mut bastion_ip = String::new();
    let mut main_ip = String::new();
    let mut token = String::new();

    for (index, plan) in plan_instances(spec.count, &spec.subnets).iter().enumerate() {
        let name = display_name(&spec.cluster_name, &plan.suffix);
        let user_data = if index == 0 {
            server_user_data()
        } else {
            agent_user_data(&main_ip, &token)
        };
        let instance_id = run_instance(
            client,
            config,
            spec,
            &group_id,
            &plan.subnet,
            Some(user_data),
        )
        .await?;
        tags::tag_resource(client, &config.tags, &spec.cluster_name, &name, &instance_id).await?;
        info!("Created instance '{}' ({})", instance_id, name);

        // The join token comes off the main node before any worker can be
        // launched, since worker user data embeds it.
        if index == 0 {
            let bastion_name = display_name(&spec.cluster_name, BASTION_SUFFIX);
            let bastion = readiness::wait_for_running(
                client,
                &config.tags,
                &spec.cluster_name,
                &bastion_name,
                Some(&bastion_id),
                &config.readiness,
            )
            .await?;
            bastion_ip = bastion.public_ip.context(error::MissingSnafu {
                what: "public IP address",
                from: format!("bastion instance '{}'", bastion.id),
            })?;

            let main = readiness::wait_for_running(
                client,
                &config.tags,
                &spec.cluster_name,
                &name,
                Some(&instance_id),
                &config.readiness,
            )
            .await?;
            // The poller guarantees a running record carries a private IP.
            main_ip = main.private_ip.unwrap_or_default();

            token = ssh::extract_cluster_secrets(config, &spec.cluster_name, &bastion_ip, &main_ip)
                .await?;
        }
    }

    println!("\n ssh -NT -L 6443:{}:6443 ec2-user@{}", main_ip, bastion_ip);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{agent_user_data, plan_instances, role_suffix, server_user_data, shared_vpc};
    use std::collections::HashSet;

    fn subnets(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn one_main_and_distinct_workers() {
        let plans = plan_instances(5, &subnets(&["sub-a"]));
        assert_eq!(plans[0].suffix, "-main");
        let workers: HashSet<&str> = plans[1..].iter().map(|plan| plan.suffix.as_str()).collect();
        assert_eq!(
            workers,
            HashSet::from(["-worker-00", "-worker-01", "-worker-02", "-worker-03"])
        );
    }

    #[test]
    fn round_robin_wraps_over_subnets() {
        // count=3 over two subnets: main in sub-a, worker-00 in sub-b,
        // worker-01 wraps back to sub-a.
        let plans = plan_instances(3, &subnets(&["sub-a", "sub-b"]));
        assert_eq!(plans[0].subnet, "sub-a");
        assert_eq!(plans[0].suffix, "-main");
        assert_eq!(plans[1].subnet, "sub-b");
        assert_eq!(plans[1].suffix, "-worker-00");
        assert_eq!(plans[2].subnet, "sub-a");
        assert_eq!(plans[2].suffix, "-worker-01");
    }

    #[test]
    fn placement_is_index_mod_subnet_count() {
        let list = subnets(&["s0", "s1", "s2"]);
        let plans = plan_instances(7, &list);
        for (index, plan) in plans.iter().enumerate() {
            assert_eq!(plan.subnet, list[index % list.len()]);
        }
    }

    #[test]
    fn single_instance_cluster_is_just_a_main() {
        let plans = plan_instances(1, &subnets(&["sub-a"]));
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].suffix, "-main");
    }

    #[test]
    fn worker_suffixes_are_zero_indexed() {
        assert_eq!(role_suffix(1), "-worker-00");
        assert_eq!(role_suffix(2), "-worker-01");
    }

    #[test]
    fn shared_vpc_requires_agreement() {
        let same = vec!["vpc-1".to_string(), "vpc-1".to_string()];
        assert_eq!(shared_vpc(&same), Some("vpc-1"));
        let mixed = vec!["vpc-1".to_string(), "vpc-2".to_string()];
        assert_eq!(shared_vpc(&mixed), None);
    }

    #[test]
    fn worker_user_data_embeds_token_and_main_address() {
        let encoded = agent_user_data("10.0.0.7", "K10abc::server:deadbeef");
        let decoded = String::from_utf8(base64::decode(encoded).unwrap()).unwrap();
        assert!(decoded.contains("K3S_URL=https://10.0.0.7:6443"));
        assert!(decoded.contains("K3S_TOKEN=K10abc::server:deadbeef"));
        assert!(decoded.starts_with("#!/usr/bin/env bash"));
    }

    #[test]
    fn server_user_data_has_no_join_settings() {
        let decoded = String::from_utf8(base64::decode(server_user_data()).unwrap()).unwrap();
        assert!(!decoded.contains("K3S_URL"));
        assert!(decoded.ends_with("| sh -"));
    }
}
