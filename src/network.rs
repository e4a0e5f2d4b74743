//! Security group provisioning. Groups are created, tagged, and fully
//! ruled before any instance launches into them, so an instance never
//! exists in a window without its intended firewall.

use crate::error::{self, Result};
use crate::tags::TagScheme;
use aws_sdk_ec2::model::{IpPermission, IpRange, ResourceType};
use log::info;
use serde::Deserialize;
use snafu::{OptionExt, ResultExt};

const IP_LOOKUP_URL: &str = "http://ip-api.com/json/";

/// One TCP rule on a security group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SgRule {
    pub protocol: &'static str,
    pub from_port: i32,
    pub to_port: i32,
    pub cidr: String,
}

impl SgRule {
    fn tcp(from_port: i32, to_port: i32, cidr: impl Into<String>) -> Self {
        Self {
            protocol: "tcp",
            from_port,
            to_port,
            cidr: cidr.into(),
        }
    }
}

/// Bastion ingress: ssh only, and only from the operator's current address.
pub fn bastion_ingress(operator_ip: &str) -> Vec<SgRule> {
    vec![SgRule::tcp(22, 22, format!("{}/32", operator_ip))]
}

/// Cluster ingress: the k3s API, embedded etcd, and kubelet ports from the
/// private network range, plus ssh for administration.
/// https://rancher.com/docs/k3s/latest/en/installation/installation-requirements/#networking
pub fn cluster_ingress() -> Vec<SgRule> {
    vec![
        SgRule::tcp(6443, 6443, "10.0.0.0/8"),
        SgRule::tcp(2379, 2380, "10.0.0.0/8"),
        SgRule::tcp(10250, 10250, "10.0.0.0/8"),
        SgRule::tcp(22, 22, "0.0.0.0/0"),
    ]
}

/// Unrestricted egress, used by both groups.
pub fn egress_all() -> Vec<SgRule> {
    vec![SgRule::tcp(0, 65535, "0.0.0.0/0")]
}

/// Create an empty security group named `<name>-sg` in the VPC, tagged at
/// creation, and return its id.
pub async fn create_security_group(
    client: &aws_sdk_ec2::Client,
    scheme: &TagScheme,
    cluster_name: &str,
    name: &str,
    vpc_id: &str,
) -> Result<String> {
    let sg_name = format!("{}-sg", name);
    let group_id = client
        .create_security_group()
        .group_name(&sg_name)
        .description(&sg_name)
        .vpc_id(vpc_id)
        .tag_specifications(scheme.tag_specification(
            ResourceType::SecurityGroup,
            cluster_name,
            &sg_name,
        ))
        .send()
        .await
        .context(error::CreateSecurityGroupSnafu { name: &sg_name })?
        .group_id()
        .map(str::to_string)
        .context(error::MissingSnafu {
            what: "group id",
            from: "CreateSecurityGroup response",
        })?;
    info!("Created security group '{}' with id '{}'", sg_name, group_id);
    Ok(group_id)
}

pub async fn authorize_ingress(
    client: &aws_sdk_ec2::Client,
    group_id: &str,
    rules: &[SgRule],
) -> Result<()> {
    for rule in rules {
        client
            .authorize_security_group_ingress()
            .group_id(group_id)
            .ip_protocol(rule.protocol)
            .from_port(rule.from_port)
            .to_port(rule.to_port)
            .cidr_ip(&rule.cidr)
            .send()
            .await
            .context(error::AuthorizeIngressSnafu { group_id })?;
    }
    Ok(())
}

pub async fn authorize_egress(
    client: &aws_sdk_ec2::Client,
    group_id: &str,
    rules: &[SgRule],
) -> Result<()> {
    for rule in rules {
        client
            .authorize_security_group_egress()
            .group_id(group_id)
            .ip_permissions(
                IpPermission::builder()
                    .ip_protocol(rule.protocol)
                    .from_port(rule.from_port)
                    .to_port(rule.to_port)
                    .ip_ranges(IpRange::builder().cidr_ip(&rule.cidr).build())
                    .build(),
            )
            .send()
            .await
            .context(error::AuthorizeEgressSnafu { group_id })?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct IpLookup {
    query: String,
}

/// The operator's current public address, resolved through an external
/// lookup service. A hard dependency: without it the bastion rule cannot
/// be scoped and the run must not proceed.
pub async fn operator_public_ip() -> Result<String> {
    let body = reqwest::get(IP_LOOKUP_URL)
        .await
        .context(error::IpLookupSnafu)?
        .text()
        .await
        .context(error::IpLookupSnafu)?;
    let lookup: IpLookup = serde_json::from_str(&body).context(error::IpResponseSnafu)?;
    Ok(lookup.query)
}

#[cfg(test)]
mod test {
    use super::{bastion_ingress, cluster_ingress, egress_all, SgRule};

    #[test]
    fn bastion_ingress_is_ssh_from_operator_only() {
        assert_eq!(
            bastion_ingress("203.0.113.9"),
            vec![SgRule::tcp(22, 22, "203.0.113.9/32")]
        );
    }

    #[test]
    fn cluster_ingress_rule_set() {
        assert_eq!(
            cluster_ingress(),
            vec![
                SgRule::tcp(6443, 6443, "10.0.0.0/8"),
                SgRule::tcp(2379, 2380, "10.0.0.0/8"),
                SgRule::tcp(10250, 10250, "10.0.0.0/8"),
                SgRule::tcp(22, 22, "0.0.0.0/0"),
            ]
        );
    }

    #[test]
    fn egress_is_wide_open() {
        assert_eq!(egress_all(), vec![SgRule::tcp(0, 65535, "0.0.0.0/0")]);
    }
}
