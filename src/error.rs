use aws_sdk_ec2::error::{
    AuthorizeSecurityGroupEgressError, AuthorizeSecurityGroupIngressError,
    CreateSecurityGroupError, CreateTagsError, DeleteSecurityGroupError, DescribeInstancesError,
    DescribeSecurityGroupsError, DescribeSubnetsError, RunInstancesError, TerminateInstancesError,
};
use aws_sdk_ec2::types::SdkError;
use snafu::Snafu;
use std::path::PathBuf;
use tokio::time::error::Elapsed;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[allow(clippy::large_enum_variant)]
pub enum Error {
    #[snafu(display(
        "Failed to authorize egress rule on security group '{}': {}",
        group_id,
        source
    ))]
    AuthorizeEgress {
        group_id: String,
        source: SdkError<AuthorizeSecurityGroupEgressError>,
    },

    #[snafu(display(
        "Failed to authorize ingress rule on security group '{}': {}",
        group_id,
        source
    ))]
    AuthorizeIngress {
        group_id: String,
        source: SdkError<AuthorizeSecurityGroupIngressError>,
    },

    #[snafu(display(
        "Bastion '{}' was not reachable over ssh after {} attempts",
        host,
        attempts
    ))]
    BastionUnreachable { host: String, attempts: u32 },

    #[snafu(display("The '{}' command timed out: {}", what, source))]
    CommandTimeout { what: String, source: Elapsed },

    #[snafu(display("Failed to create security group '{}': {}", name, source))]
    CreateSecurityGroup {
        name: String,
        source: SdkError<CreateSecurityGroupError>,
    },

    #[snafu(display("Failed to delete security group '{}': {}", group_id, source))]
    DeleteSecurityGroup {
        group_id: String,
        source: SdkError<DeleteSecurityGroupError>,
    },

    #[snafu(display("Failed to describe instances: {}", source))]
    DescribeInstances {
        source: SdkError<DescribeInstancesError>,
    },

    #[snafu(display("Failed to describe security groups: {}", source))]
    DescribeSecurityGroups {
        source: SdkError<DescribeSecurityGroupsError>,
    },

    #[snafu(display("Failed to describe subnets: {}", source))]
    DescribeSubnets {
        source: SdkError<DescribeSubnetsError>,
    },

    #[snafu(display("Instance count must be greater than zero, got {}", count))]
    InvalidCount { count: i32 },

    #[snafu(display("Failed to look up the operator's public IP address: {}", source))]
    IpLookup { source: reqwest::Error },

    #[snafu(display("Failed to parse the IP lookup response: {}", source))]
    IpResponse { source: serde_json::Error },

    #[snafu(display("The key file '{}' does not exist", path.display()))]
    KeyFile { path: PathBuf },

    #[snafu(display("The key path '{}' has no file name", path.display()))]
    KeyName { path: PathBuf },

    #[snafu(display("{} was missing from {}", what, from))]
    Missing { what: String, from: String },

    #[snafu(display(
        "Instance '{}' is reported running but has no private IP address",
        id
    ))]
    MissingAddress { id: String },

    #[snafu(display("No instance matching '{}' was found", name))]
    NoMatchingInstance { name: String },

    #[snafu(display("No public subnet with a free address was found in VPC '{}'", vpc))]
    NoPublicSubnet { vpc: String },

    #[snafu(display("Failed to run '{}' process: {}", what, source))]
    Process {
        what: String,
        source: std::io::Error,
    },

    #[snafu(display(
        "Remote command on '{}' via bastion '{}' failed after {} attempts",
        target,
        via,
        attempts
    ))]
    RemoteCommand {
        target: String,
        via: String,
        attempts: u32,
    },

    #[snafu(display("Failed to run instance: {}", source))]
    RunInstances {
        source: SdkError<RunInstancesError>,
    },

    #[snafu(display(
        "Extracted secret is only {} bytes, expected a longer token/credential",
        len
    ))]
    SecretTooShort { len: usize },

    #[snafu(display("Failed to add key '{}' to the ssh agent", path.display()))]
    SshAgent { path: PathBuf },

    #[snafu(display(
        "'{}' did not reach state code {} within {} attempts",
        what,
        target,
        attempts
    ))]
    StateTimeout {
        what: String,
        target: i32,
        attempts: u32,
    },

    #[snafu(display("The specified subnets are not all in the same VPC: {:?}", subnets))]
    SubnetVpcMismatch { subnets: Vec<String> },

    #[snafu(display("Failed to tag resource '{}': {}", id, source))]
    TagResource {
        id: String,
        source: SdkError<CreateTagsError>,
    },

    #[snafu(display("Failed to terminate instance '{}': {}", id, source))]
    TerminateInstances {
        id: String,
        source: SdkError<TerminateInstancesError>,
    },

    #[snafu(display("Failed to write file at '{}': {}", path.display(), source))]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
