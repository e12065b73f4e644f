//! DNS record manipulation for a universe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{OperationSubTask, TaskBuilder, TaskPlan, require_universe};
use crate::core::group::SubTaskGroup;
use crate::core::infra::{Collaborators, Infrastructure, OpRequest, UniverseRepository};
use crate::core::params::{TaskParams, ValidationError};
use crate::core::subtask::{SubTask, SubTaskContext, SubTaskError};

pub(crate) const DNS_OP: &str = "dns.manipulate_record";

/// What to do with the universe's DNS records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsCommand {
    Create,
    Edit,
    Delete,
}

/// Body of a `ManipulateDnsRecord` submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManipulateDnsRecordParams {
    pub universe_uuid: Uuid,
    pub provider_uuid: Uuid,
    pub command: DnsCommand,
    /// May be empty; the provider decides whether that is acceptable.
    #[serde(default)]
    pub hosted_zone_id: String,
    #[serde(default)]
    pub domain_name_prefix: String,
    /// Node addresses the record points to. Read from the universe when
    /// omitted.
    #[serde(default)]
    pub node_ips: Vec<String>,
}

fn dns_request(params: &ManipulateDnsRecordParams, node_ips: &[String]) -> OpRequest {
    OpRequest::new(
        DNS_OP,
        json!({
            "universe_uuid": params.universe_uuid,
            "provider_uuid": params.provider_uuid,
            "command": params.command,
            "hosted_zone_id": params.hosted_zone_id,
            "domain_name_prefix": params.domain_name_prefix,
            "node_ips": node_ips,
        }),
    )
}

/// The single subtask that applies a DNS command.
///
/// Node addresses omitted from a create or edit are read from the universe
/// repository when the subtask runs.
pub(crate) fn dns_record_subtask(
    params: &ManipulateDnsRecordParams,
    collaborators: &Collaborators,
) -> Arc<dyn SubTask> {
    if params.node_ips.is_empty() && params.command != DnsCommand::Delete {
        return Arc::new(ResolvingDnsSubTask {
            params: params.clone(),
            infrastructure: Arc::clone(&collaborators.infrastructure),
            universes: Arc::clone(&collaborators.universes),
        });
    }
    Arc::new(
        OperationSubTask::new(
            DNS_OP,
            dns_request(params, &params.node_ips),
            Arc::clone(&collaborators.infrastructure),
        )
        .retryable(true),
    )
}

/// DNS subtask whose node addresses come from the universe.
struct ResolvingDnsSubTask {
    params: ManipulateDnsRecordParams,
    infrastructure: Arc<dyn Infrastructure>,
    universes: Arc<dyn UniverseRepository>,
}

#[async_trait]
impl SubTask for ResolvingDnsSubTask {
    fn name(&self) -> &str {
        DNS_OP
    }

    async fn execute(&self, ctx: &SubTaskContext) -> Result<(), SubTaskError> {
        let node_ips = self.universes.node_ips(&self.params.universe_uuid).await?;
        if node_ips.is_empty() {
            return Err(SubTaskError::Permanent(format!(
                "universe {} has no node addresses",
                self.params.universe_uuid
            )));
        }
        debug!(
            universe_uuid = %self.params.universe_uuid,
            nodes = node_ips.len(),
            "resolved node addresses for DNS record"
        );
        OperationSubTask::new(
            DNS_OP,
            dns_request(&self.params, &node_ips),
            Arc::clone(&self.infrastructure),
        )
        .execute(ctx)
        .await
    }

    fn retryable(&self) -> bool {
        true
    }
}

/// Builder for `ManipulateDnsRecord` tasks.
pub struct ManipulateDnsRecord;

#[async_trait]
impl TaskBuilder for ManipulateDnsRecord {
    async fn validate(
        &self,
        params: &TaskParams,
        collaborators: &Collaborators,
    ) -> Result<(), ValidationError> {
        let body: ManipulateDnsRecordParams = params.body_as()?;
        require_universe(collaborators, &body.universe_uuid).await?;
        if body.command != DnsCommand::Delete && body.node_ips.is_empty() {
            let known = collaborators
                .universes
                .node_ips(&body.universe_uuid)
                .await
                .map_err(|e| ValidationError::Lookup(e.to_string()))?;
            if known.is_empty() {
                return Err(ValidationError::MissingField("node_ips".to_string()));
            }
        }
        Ok(())
    }

    fn build(
        &self,
        params: &TaskParams,
        collaborators: &Collaborators,
    ) -> Result<TaskPlan, ValidationError> {
        let body: ManipulateDnsRecordParams = params.body_as()?;
        let group = SubTaskGroup::sequential("ManipulateDnsRecord")
            .add(dns_record_subtask(&body, collaborators));
        Ok(TaskPlan::new(vec![group]))
    }
}
