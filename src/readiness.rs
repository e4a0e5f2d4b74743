//! Bounded-retry polling for instance lifecycle states. The same primitive
//! backs the creation path (wait for `running`) and the teardown path (wait
//! for `terminated`); only the target state code differs.

use crate::config::RetryBudget;
use crate::error::{self, Result};
use crate::tags::TagScheme;
use log::debug;
use snafu::{ensure, OptionExt, ResultExt};

/// EC2 instance state codes.
pub const PENDING: i32 = 0;
pub const RUNNING: i32 = 16;
pub const TERMINATED: i32 = 48;

/// One instance as observed through a describe call. Never transitioned
/// locally; the provider's state machine is the only writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub id: String,
    pub state_code: i32,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
}

/// The result of inspecting one batch of polled records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A live record has reached the target state.
    Ready(InstanceRecord),
    /// Target was `terminated` and no live record remains.
    Gone,
    NotYet,
}

/// Decide whether a batch of records satisfies the target state. Records
/// already terminated are never returned as a readiness match, even if they
/// appear first in the results, so a stale entry from an earlier cluster
/// of the same name cannot be mistaken for a fresh instance.
pub fn poll_outcome(records: &[InstanceRecord], target_code: i32) -> PollOutcome {
    if target_code == TERMINATED {
        if records
            .iter()
            .all(|record| record.state_code == TERMINATED)
        {
            return PollOutcome::Gone;
        }
        return PollOutcome::NotYet;
    }
    for record in records {
        if record.state_code == TERMINATED {
            continue;
        }
        if record.state_code == target_code {
            return PollOutcome::Ready(record.clone());
        }
    }
    PollOutcome::NotYet
}

/// The single canonical describe-instances call: fetch all records matching
/// a tag filter, optionally narrowed by display name and/or instance id.
pub async fn fetch_records(
    client: &aws_sdk_ec2::Client,
    scheme: &TagScheme,
    cluster_name: &str,
    name: Option<&str>,
    instance_id: Option<&str>,
) -> Result<Vec<InstanceRecord>> {
    let output = client
        .describe_instances()
        .set_filters(Some(scheme.instance_filters(cluster_name, name, instance_id)))
        .send()
        .await
        .context(error::DescribeInstancesSnafu)?;
    let mut records = Vec::new();
    for reservation in output.reservations().unwrap_or_default() {
        for instance in reservation.instances().unwrap_or_default() {
            records.push(InstanceRecord {
                id: instance.instance_id().unwrap_or_default().to_string(),
                state_code: instance
                    .state()
                    .and_then(|state| state.code())
                    .unwrap_or(PENDING),
                private_ip: instance.private_ip_address().map(str::to_string),
                public_ip: instance.public_ip_address().map(str::to_string),
            });
        }
    }
    Ok(records)
}

/// Poll until a matching instance reaches the target state or the budget
/// is exhausted. Returns the matching record, or `None` when the target is
/// `terminated` (there is no live record left to return). A record that is
/// reported running without a private address indicates a logically broken
/// resource and is fatal.
pub async fn wait_for_state(
    client: &aws_sdk_ec2::Client,
    scheme: &TagScheme,
    cluster_name: &str,
    name: Option<&str>,
    instance_id: Option<&str>,
    target_code: i32,
    budget: &RetryBudget,
) -> Result<Option<InstanceRecord>> {
    let what = name
        .or(instance_id)
        .unwrap_or(cluster_name)
        .to_string();
    for attempt in 1..=budget.max_attempts {
        let records = fetch_records(client, scheme, cluster_name, name, instance_id).await?;
        match poll_outcome(&records, target_code) {
            PollOutcome::Ready(record) => {
                if record.state_code == RUNNING {
                    ensure!(
                        record
                            .private_ip
                            .as_ref()
                            .map_or(false, |ip| !ip.is_empty()),
                        error::MissingAddressSnafu { id: record.id }
                    );
                }
                return Ok(Some(record));
            }
            PollOutcome::Gone => return Ok(None),
            PollOutcome::NotYet => {
                debug!(
                    "'{}' not yet in state {} (attempt {}/{})",
                    what, target_code, attempt, budget.max_attempts
                );
                if !budget.final_attempt(attempt) {
                    tokio::time::sleep(budget.interval).await;
                }
            }
        }
    }
    error::StateTimeoutSnafu {
        what,
        target: target_code,
        attempts: budget.max_attempts,
    }
    .fail()
}

/// Creation-path wrapper: wait until the matching instance is running and
/// return its record (addresses included).
pub async fn wait_for_running(
    client: &aws_sdk_ec2::Client,
    scheme: &TagScheme,
    cluster_name: &str,
    name: &str,
    instance_id: Option<&str>,
    budget: &RetryBudget,
) -> Result<InstanceRecord> {
    wait_for_state(
        client,
        scheme,
        cluster_name,
        Some(name),
        instance_id,
        RUNNING,
        budget,
    )
    .await?
    .context(error::NoMatchingInstanceSnafu { name })
}

#[cfg(test)]
mod test {
    use super::{poll_outcome, InstanceRecord, PollOutcome, PENDING, RUNNING, TERMINATED};

    fn record(id: &str, state_code: i32) -> InstanceRecord {
        InstanceRecord {
            id: id.to_string(),
            state_code,
            private_ip: Some("10.0.0.5".to_string()),
            public_ip: None,
        }
    }

    #[test]
    fn terminated_records_are_never_a_readiness_match() {
        // A stale terminated record appears first in the results.
        let records = vec![record("i-old", TERMINATED), record("i-new", RUNNING)];
        match poll_outcome(&records, RUNNING) {
            PollOutcome::Ready(found) => assert_eq!(found.id, "i-new"),
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn only_terminated_records_is_not_ready() {
        let records = vec![record("i-old", TERMINATED)];
        assert_eq!(poll_outcome(&records, RUNNING), PollOutcome::NotYet);
    }

    #[test]
    fn pending_is_not_running() {
        let records = vec![record("i-1", PENDING)];
        assert_eq!(poll_outcome(&records, RUNNING), PollOutcome::NotYet);
    }

    #[test]
    fn terminated_target_waits_for_all_records() {
        let records = vec![record("i-1", TERMINATED), record("i-2", RUNNING)];
        assert_eq!(poll_outcome(&records, TERMINATED), PollOutcome::NotYet);

        let records = vec![record("i-1", TERMINATED), record("i-2", TERMINATED)];
        assert_eq!(poll_outcome(&records, TERMINATED), PollOutcome::Gone);
    }

    #[test]
    fn no_records_left_counts_as_gone() {
        assert_eq!(poll_outcome(&[], TERMINATED), PollOutcome::Gone);
    }
}
