//! Scheduled backups of the shared filesystem with a cross-region copy.

use shipyard_core::{AttrValue, NodeHandle, ResourceKind, Result};

use crate::components::filesystem::SharedFilesystem;
use crate::components::providers::{self, SECONDARY_ALIAS};
use crate::components::assume_role_policy;
use crate::graph::ResourceGraph;
use crate::naming::Naming;
use crate::subsystems::BackupParams;

pub const BACKUP_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AWSBackupServiceRolePolicyForBackup";

#[derive(Debug, Clone)]
pub struct Backup {
    pub role: NodeHandle,
    pub vault: NodeHandle,
    pub secondary_provider: NodeHandle,
    pub secondary_vault: NodeHandle,
    pub plan: NodeHandle,
    pub selection: NodeHandle,
}

pub fn declare(
    graph: &mut ResourceGraph,
    naming: &Naming,
    params: &BackupParams,
    filesystem: &SharedFilesystem,
) -> Result<Backup> {
    let role = graph
        .declare(ResourceKind::IamRole, "backup-role")
        .attr("name", naming.name("backup-role"))
        .attr("assume_role_policy", assume_role_policy("backup.amazonaws.com"))
        .finish()?;

    graph
        .declare(ResourceKind::IamPolicyAttachment, "backup-policy")
        .attr("name", naming.name("backup-policy"))
        .attr("roles", AttrValue::list([role.name_ref()]))
        .attr("policy_arn", BACKUP_POLICY_ARN)
        .finish()?;

    let vault = graph
        .declare(ResourceKind::BackupVault, "backup-vault")
        .attr("name", naming.name("backup-vault"))
        .finish()?;

    let secondary_provider =
        providers::declare_secondary(graph, naming, &params.secondary_region)?;
    let secondary_vault = graph
        .declare(ResourceKind::BackupVault, "backup-vault-secondary")
        .attr("name", naming.name("backup-vault-secondary"))
        .attr("provider", SECONDARY_ALIAS)
        .depends_on(&secondary_provider)
        .finish()?;

    let plan = graph
        .declare(ResourceKind::BackupPlan, "backup-plan")
        .attr("name", naming.name("backup-plan"))
        .attr(
            "rule",
            AttrValue::list([AttrValue::map([
                ("rule_name", AttrValue::from("daily")),
                ("target_vault_name", vault.name_ref()),
                ("schedule", AttrValue::from(params.schedule.as_str())),
                ("start_window", AttrValue::from(params.start_window_minutes)),
                (
                    "completion_window",
                    AttrValue::from(params.completion_window_minutes),
                ),
                (
                    "copy_action",
                    AttrValue::list([AttrValue::map([(
                        "destination_vault_arn",
                        secondary_vault.arn(),
                    )])]),
                ),
            ])]),
        )
        .finish()?;

    // Only the shared filesystem is backed up.
    let selection = graph
        .declare(ResourceKind::BackupSelection, "backup-selection")
        .attr("name", "resources")
        .attr("iam_role_arn", role.arn())
        .attr("plan_id", plan.id_ref())
        .attr("resources", AttrValue::list([filesystem.file_system.arn()]))
        .finish()?;

    Ok(Backup {
        role,
        vault,
        secondary_provider,
        secondary_vault,
        plan,
        selection,
    })
}
