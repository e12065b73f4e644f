//! Universe creation and upgrade.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use super::dns::{DnsCommand, ManipulateDnsRecordParams, dns_record_subtask};
use super::{TaskBuilder, TaskPlan, operation, require_universe};
use crate::core::group::SubTaskGroup;
use crate::core::infra::{Collaborators, Infrastructure};
use crate::core::params::{TaskParams, ValidationError};

/// One node of a universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    #[serde(default)]
    pub private_ip: Option<String>,
}

/// DNS entry to create for a new universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsSettings {
    pub provider_uuid: Uuid,
    #[serde(default)]
    pub hosted_zone_id: String,
    #[serde(default)]
    pub domain_name_prefix: String,
}

/// Body of a `CreateUniverse` submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateUniverseParams {
    pub universe_uuid: Uuid,
    pub nodes: Vec<NodeSpec>,
    pub software_version: String,
    /// Machine image to provision from. Chosen by the caller (the
    /// provider's default bundle for the node architecture).
    #[serde(default)]
    pub image_bundle_uuid: Option<Uuid>,
    #[serde(default)]
    pub dns: Option<DnsSettings>,
}

impl CreateUniverseParams {
    fn check(&self) -> Result<(), ValidationError> {
        if self.nodes.is_empty() {
            return Err(ValidationError::MissingField("nodes".to_string()));
        }
        if self.software_version.trim().is_empty() {
            return Err(ValidationError::MissingField("software_version".to_string()));
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.name.trim().is_empty() {
                return Err(ValidationError::Invalid("node name is empty".to_string()));
            }
            if !seen.insert(node.name.as_str()) {
                return Err(ValidationError::Invalid(format!(
                    "duplicate node name: {}",
                    node.name
                )));
            }
        }
        if self.dns.is_some() && self.nodes.iter().any(|n| n.private_ip.is_none()) {
            return Err(ValidationError::Invalid(
                "every node needs a private_ip when dns is requested".to_string(),
            ));
        }
        Ok(())
    }

    fn node_ips(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter_map(|n| n.private_ip.clone())
            .collect()
    }
}

/// Builder for `CreateUniverse` tasks.
///
/// Groups: provision and configure every node concurrently, start masters
/// then tservers in order, optionally create the DNS entry, and finally
/// mark the universe ready.
pub struct CreateUniverse;

#[async_trait]
impl TaskBuilder for CreateUniverse {
    async fn validate(
        &self,
        params: &TaskParams,
        collaborators: &Collaborators,
    ) -> Result<(), ValidationError> {
        let body: CreateUniverseParams = params.body_as()?;
        body.check()?;
        require_universe(collaborators, &body.universe_uuid).await
    }

    fn build(
        &self,
        params: &TaskParams,
        collaborators: &Collaborators,
    ) -> Result<TaskPlan, ValidationError> {
        let body: CreateUniverseParams = params.body_as()?;
        body.check()?;
        let infra = &collaborators.infrastructure;
        let universe_uuid = body.universe_uuid;

        let per_node = |group: SubTaskGroup, op: &str| {
            body.nodes.iter().fold(group, |group, node| {
                group.add(operation(
                    format!("{op}:{}", node.name),
                    op,
                    json!({
                        "universe_uuid": universe_uuid,
                        "node": node.name,
                        "private_ip": node.private_ip,
                        "software_version": body.software_version,
                        "image_bundle_uuid": body.image_bundle_uuid,
                    }),
                    infra,
                ))
            })
        };

        let mut groups = vec![
            per_node(SubTaskGroup::concurrent("ProvisionNodes"), "node.provision"),
            per_node(SubTaskGroup::concurrent("ConfigureServers"), "node.configure"),
            per_node(
                per_node(SubTaskGroup::sequential("StartServers"), "node.start_master"),
                "node.start_tserver",
            ),
        ];

        if let Some(dns) = &body.dns {
            let dns_params = ManipulateDnsRecordParams {
                universe_uuid,
                provider_uuid: dns.provider_uuid,
                command: DnsCommand::Create,
                hosted_zone_id: dns.hosted_zone_id.clone(),
                domain_name_prefix: dns.domain_name_prefix.clone(),
                node_ips: body.node_ips(),
            };
            groups.push(
                SubTaskGroup::sequential("CreateDnsEntry")
                    .add(dns_record_subtask(&dns_params, collaborators)),
            );
        }

        groups.push(SubTaskGroup::sequential("MarkUniverseReady").add(operation(
            "universe.mark_ready",
            "universe.mark_ready",
            json!({
                "universe_uuid": universe_uuid,
                "software_version": body.software_version,
            }),
            infra,
        )));

        Ok(TaskPlan::new(groups))
    }
}

/// What an upgrade changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeKind {
    Software,
    Gflags,
}

fn default_rolling() -> bool {
    true
}

/// Body of an `UpgradeUniverse` submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeUniverseParams {
    pub universe_uuid: Uuid,
    pub kind: UpgradeKind,
    #[serde(default)]
    pub target_version: Option<String>,
    #[serde(default)]
    pub gflags: BTreeMap<String, String>,
    pub nodes: Vec<String>,
    /// Upgrade one node at a time, keeping the universe available.
    #[serde(default = "default_rolling")]
    pub rolling: bool,
}

impl UpgradeUniverseParams {
    fn check(&self) -> Result<(), ValidationError> {
        if self.nodes.is_empty() {
            return Err(ValidationError::MissingField("nodes".to_string()));
        }
        match self.kind {
            UpgradeKind::Software => {
                let version = self.target_version.as_deref().unwrap_or("").trim();
                if version.is_empty() {
                    return Err(ValidationError::MissingField("target_version".to_string()));
                }
            }
            UpgradeKind::Gflags => {
                if self.gflags.is_empty() {
                    return Err(ValidationError::MissingField("gflags".to_string()));
                }
            }
        }
        Ok(())
    }

    fn upgrade_op(&self) -> &'static str {
        match self.kind {
            UpgradeKind::Software => "node.upgrade_software",
            UpgradeKind::Gflags => "node.update_gflags",
        }
    }

    fn node_args(&self, node: &str) -> serde_json::Value {
        json!({
            "universe_uuid": self.universe_uuid,
            "node": node,
            "target_version": self.target_version,
            "gflags": self.gflags,
        })
    }
}

/// Builder for `UpgradeUniverse` tasks.
pub struct UpgradeUniverse;

#[async_trait]
impl TaskBuilder for UpgradeUniverse {
    async fn validate(
        &self,
        params: &TaskParams,
        collaborators: &Collaborators,
    ) -> Result<(), ValidationError> {
        let body: UpgradeUniverseParams = params.body_as()?;
        body.check()?;
        require_universe(collaborators, &body.universe_uuid).await
    }

    fn build(
        &self,
        params: &TaskParams,
        collaborators: &Collaborators,
    ) -> Result<TaskPlan, ValidationError> {
        let body: UpgradeUniverseParams = params.body_as()?;
        body.check()?;
        let infra = &collaborators.infrastructure;
        let ops = ["node.stop_processes", body.upgrade_op(), "node.start_processes"];

        let groups = if body.rolling {
            body.nodes
                .iter()
                .map(|node| {
                    ops.iter().fold(
                        SubTaskGroup::sequential(format!("Upgrade {node}")),
                        |group, op| group.add(node_op(infra, op, node, &body)),
                    )
                })
                .collect()
        } else {
            let names = ["StopServers", upgrade_group_name(body.kind), "StartServers"];
            names
                .iter()
                .zip(ops.iter())
                .map(|(name, op)| {
                    body.nodes.iter().fold(SubTaskGroup::concurrent(*name), |group, node| {
                        group.add(node_op(infra, op, node, &body))
                    })
                })
                .collect()
        };

        Ok(TaskPlan::new(groups))
    }
}

fn upgrade_group_name(kind: UpgradeKind) -> &'static str {
    match kind {
        UpgradeKind::Software => "UpgradeSoftware",
        UpgradeKind::Gflags => "UpdateGflags",
    }
}

fn node_op(
    infra: &Arc<dyn Infrastructure>,
    op: &str,
    node: &str,
    body: &UpgradeUniverseParams,
) -> Arc<dyn crate::core::subtask::SubTask> {
    operation(format!("{op}:{node}"), op, body.node_args(node), infra)
}
