use crate::error::{self, Result};
use aws_sdk_ec2::model::{Filter, ResourceType, Tag, TagSpecification};
use log::info;
use snafu::ResultExt;

/// The tag keys and marker values that identify resources created by this
/// tool. Every created instance and security group carries the full set;
/// every discovery query filters on the ownership marker so the tool never
/// touches resources it did not create.
#[derive(Debug, Clone)]
pub struct TagScheme {
    /// Key for the per-resource display name.
    pub name_key: String,
    /// Key carrying the logical cluster name.
    pub cluster_key: String,
    /// Key/value recording where the resource came from.
    pub source_key: String,
    pub source_value: String,
    /// The ownership marker.
    pub owned_key: String,
    pub owned_value: String,
}

impl Default for TagScheme {
    fn default() -> Self {
        Self {
            name_key: "Name".to_string(),
            cluster_key: "k3sprovcluster".to_string(),
            source_key: "source".to_string(),
            source_value: "k3sprov".to_string(),
            owned_key: "k3sprov".to_string(),
            owned_value: "true".to_string(),
        }
    }
}

impl TagScheme {
    /// The full tag set for one resource.
    pub fn tags(&self, cluster_name: &str, name: &str) -> Vec<Tag> {
        vec![
            Tag::builder().key(&self.name_key).value(name).build(),
            Tag::builder()
                .key(&self.cluster_key)
                .value(cluster_name)
                .build(),
            Tag::builder()
                .key(&self.source_key)
                .value(&self.source_value)
                .build(),
            Tag::builder()
                .key(&self.owned_key)
                .value(&self.owned_value)
                .build(),
        ]
    }

    /// Tags applied at creation time, for resource types that support
    /// tag-on-create (security groups).
    pub fn tag_specification(
        &self,
        resource_type: ResourceType,
        cluster_name: &str,
        name: &str,
    ) -> TagSpecification {
        TagSpecification::builder()
            .resource_type(resource_type)
            .set_tags(Some(self.tags(cluster_name, name)))
            .build()
    }

    /// Filters matching every resource this tool created for one cluster.
    pub fn discovery_filters(&self, cluster_name: &str) -> Vec<Filter> {
        vec![
            Filter::builder()
                .name(format!("tag:{}", self.cluster_key))
                .values(cluster_name)
                .build(),
            Filter::builder()
                .name(format!("tag:{}", self.owned_key))
                .values(&self.owned_value)
                .build(),
        ]
    }

    /// Discovery filters optionally narrowed to one display name and/or one
    /// instance id.
    pub fn instance_filters(
        &self,
        cluster_name: &str,
        name: Option<&str>,
        instance_id: Option<&str>,
    ) -> Vec<Filter> {
        let mut filters = self.discovery_filters(cluster_name);
        if let Some(name) = name {
            filters.push(
                Filter::builder()
                    .name(format!("tag:{}", self.name_key))
                    .values(name)
                    .build(),
            );
        }
        if let Some(instance_id) = instance_id {
            filters.push(
                Filter::builder()
                    .name("instance-id")
                    .values(instance_id)
                    .build(),
            );
        }
        filters
    }
}

/// The stable display name of one resource in a cluster, e.g.
/// `display_name("demo", "-bastion")` is `demo-bastion`.
pub fn display_name(cluster_name: &str, suffix: &str) -> String {
    format!("{}{}", cluster_name, suffix)
}

/// Apply the full tag set to an already created resource. Failing to tag is
/// fatal: an untagged resource could never be rediscovered for teardown.
pub async fn tag_resource(
    client: &aws_sdk_ec2::Client,
    scheme: &TagScheme,
    cluster_name: &str,
    name: &str,
    id: &str,
) -> Result<()> {
    client
        .create_tags()
        .resources(id)
        .set_tags(Some(scheme.tags(cluster_name, name)))
        .send()
        .await
        .context(error::TagResourceSnafu { id })?;
    info!("Tagged resource '{}' as '{}'", id, name);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{display_name, TagScheme};

    #[test]
    fn display_names() {
        assert_eq!(display_name("demo", "-bastion"), "demo-bastion");
        assert_eq!(display_name("demo", "-worker-00"), "demo-worker-00");
    }

    #[test]
    fn every_resource_carries_the_ownership_marker() {
        let scheme = TagScheme::default();
        let tags = scheme.tags("demo", "demo-main");
        let owned = tags
            .iter()
            .find(|tag| tag.key() == Some(scheme.owned_key.as_str()))
            .expect("ownership tag missing");
        assert_eq!(owned.value(), Some("true"));
    }

    #[test]
    fn discovery_filters_on_the_ownership_marker() {
        let scheme = TagScheme::default();
        let filters = scheme.discovery_filters("demo");
        assert!(filters
            .iter()
            .any(|filter| filter.name() == Some("tag:k3sprov")
                && filter.values() == Some(["true".to_string()].as_slice())));
        assert!(filters
            .iter()
            .any(|filter| filter.name() == Some("tag:k3sprovcluster")
                && filter.values() == Some(["demo".to_string()].as_slice())));
    }

    #[test]
    fn narrowing_adds_name_and_id_filters() {
        let scheme = TagScheme::default();
        let filters = scheme.instance_filters("demo", Some("demo-main"), Some("i-123"));
        assert_eq!(filters.len(), 4);
        assert!(filters
            .iter()
            .any(|filter| filter.name() == Some("instance-id")));
        assert!(filters.iter().any(|filter| filter.name() == Some("tag:Name")));
    }
}
