use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Display, EnumString,
)]
#[sqlx(type_name = "tenant_role", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Role {
    Owner,
    Admin,
    Manager,
    Scout,
    Viewer,
}

impl Role {
    fn level(self) -> u8 {
        match self {
            Role::Viewer => 0,
            Role::Scout => 1,
            Role::Manager => 2,
            Role::Admin => 3,
            Role::Owner => 4,
        }
    }

    fn at_least(self, min: Role) -> bool {
        self.level() >= min.level()
    }

    /// Create and edit players, requests, trials and events.
    pub fn can_write(self) -> bool {
        self.at_least(Role::Scout)
    }

    pub fn can_delete(self) -> bool {
        self.at_least(Role::Manager)
    }

    /// Invite, re-role and remove members.
    pub fn can_manage_members(self) -> bool {
        self.at_least(Role::Admin)
    }

    /// Whether a member holding `self` may hand out `granted`.
    pub fn can_grant(self, granted: Role) -> bool {
        self.can_manage_members() && (granted != Role::Owner || self == Role::Owner)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TenantMembership {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

/// Membership joined with the member's user record.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub user_id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

/// A tenant as seen by one of its members.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TenantWithRole {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTenantRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRoleRequest {
    pub role: Role,
}

/// Lowercase, ASCII alphanumerics joined by single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("FC Example  United"), "fc-example-united");
        assert_eq!(slugify("  --Scouts & Co.-- "), "scouts-co");
        assert_eq!(slugify("Ajax 2024"), "ajax-2024");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn role_hierarchy() {
        assert!(Role::Owner.at_least(Role::Admin));
        assert!(Role::Scout.can_write());
        assert!(!Role::Viewer.can_write());
        assert!(!Role::Scout.can_delete());
        assert!(Role::Manager.can_delete());
        assert!(!Role::Manager.can_manage_members());
    }

    #[test]
    fn only_owners_grant_owner() {
        assert!(Role::Owner.can_grant(Role::Owner));
        assert!(!Role::Admin.can_grant(Role::Owner));
        assert!(Role::Admin.can_grant(Role::Manager));
        assert!(!Role::Manager.can_grant(Role::Viewer));
    }

    #[test]
    fn role_wire_format_is_upper_snake() {
        assert_eq!(Role::Owner.to_string(), "OWNER");
        assert_eq!(Role::from_str("scout").unwrap(), Role::Scout);
        assert_eq!(serde_json::to_string(&Role::Manager).unwrap(), "\"MANAGER\"");
    }
}
