// src/bot/permissions.rs - Role resolution and authorization of privileged actions

use chrono::Duration;
use log::debug;
use std::collections::HashSet;

use crate::error::{ModerationError, Result};
use crate::types::{DurationSpec, MemberStatus, Permission, UserRole};

const MEMBER_PERMISSIONS: &[Permission] = &[
    Permission::ViewChannel,
    Permission::CreateMessage,
    Permission::DeleteMessage,
];

const ADMIN_PERMISSIONS: &[Permission] = &[Permission::KickMember, Permission::BanMember];

const OWNER_PERMISSIONS: &[Permission] = &[Permission::ManageChannel];

/// Longest punishment one owner may give another
pub const DEFAULT_OWNER_MAX_PUNISHMENT_MINUTES: i64 = 30;

/// Permissions granted to a role. Roles are additive: Member ⊂ Admin ⊂ Owner.
pub fn role_permissions(role: UserRole) -> HashSet<Permission> {
    let layers: &[&[Permission]] = match role {
        UserRole::Member => &[MEMBER_PERMISSIONS],
        UserRole::Admin => &[MEMBER_PERMISSIONS, ADMIN_PERMISSIONS],
        UserRole::Owner => &[MEMBER_PERMISSIONS, ADMIN_PERMISSIONS, OWNER_PERMISSIONS],
        UserRole::Banned => &[],
    };

    layers.iter().flat_map(|layer| layer.iter().copied()).collect()
}

/// Fail-closed check of a role against required roles and permissions.
pub fn authorize(
    role: UserRole,
    required_roles: Option<&[UserRole]>,
    required_permissions: Option<&[Permission]>,
) -> bool {
    if let Some(roles) = required_roles {
        if !roles.contains(&role) {
            debug!("Role {} not among required roles {:?}", role, roles);
            return false;
        }
    }

    if let Some(required) = required_permissions {
        let granted = role_permissions(role);
        if !required.iter().all(|permission| granted.contains(permission)) {
            debug!("Role {} lacks some of {:?}", role, required);
            return false;
        }
    }

    true
}

/// Parse the platform's member status string.
pub fn normalize_member_status(status: &str) -> Option<MemberStatus> {
    match status.trim().to_lowercase().as_str() {
        "creator" | "owner" => Some(MemberStatus::Creator),
        "administrator" | "admin" => Some(MemberStatus::Administrator),
        "member" => Some(MemberStatus::Member),
        "restricted" => Some(MemberStatus::Restricted),
        "kicked" | "banned" => Some(MemberStatus::Kicked),
        "left" => Some(MemberStatus::Left),
        _ => None,
    }
}

impl MemberStatus {
    /// Role of a member with this status. Users who left have none.
    pub fn role(&self) -> Option<UserRole> {
        match self {
            MemberStatus::Creator => Some(UserRole::Owner),
            MemberStatus::Administrator => Some(UserRole::Admin),
            MemberStatus::Member | MemberStatus::Restricted => Some(UserRole::Member),
            MemberStatus::Kicked => Some(UserRole::Banned),
            MemberStatus::Left => None,
        }
    }
}

/// Role exemption rule for manual punishments.
///
/// Admins can only be punished by owners. Owners can only be punished by
/// other owners, and then for at most `owner_max`. Returns the duration to
/// apply.
pub fn check_exemption(
    actor_role: UserRole,
    target_role: UserRole,
    requested: &DurationSpec,
    owner_max: Duration,
) -> Result<DurationSpec> {
    match target_role {
        UserRole::Admin if actor_role != UserRole::Owner => Err(ModerationError::PermissionDenied(
            "Only the chat owner can punish an administrator".to_string(),
        )),
        UserRole::Owner if actor_role != UserRole::Owner => Err(ModerationError::PermissionDenied(
            "The chat owner can only be punished by another owner".to_string(),
        )),
        UserRole::Owner => Ok(requested.clamp(owner_max)),
        _ => Ok(requested.clone()),
    }
}
