use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant scope for a core operation.
///
/// Resolved by the surrounding host (header → tenant id) before any engine
/// call; every store query is implicitly filtered by it and every write is
/// stamped with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: Uuid,
}

impl TenantContext {
    pub fn new(tenant_id: Uuid) -> Self {
        Self { tenant_id }
    }
}

/// A role identifier, normalized once at the identity boundary.
///
/// Construction trims and lowercases so transitions compare roles by value
/// instead of scattering case-insensitive string matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct RoleId(String);

impl RoleId {
    /// Returns `None` for a blank role name.
    pub fn new(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RoleId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        RoleId::new(&raw).ok_or_else(|| serde::de::Error::custom("role id must not be blank"))
    }
}

/// The acting identity for a transition, with roles already resolved by the
/// caller's identity collaborator. `user_id` is `None` for system actors
/// (escalation scans).
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub user_id: Option<Uuid>,
    pub display_name: String,
    pub roles: Vec<RoleId>,
}

impl ActorContext {
    pub fn user(user_id: Uuid, display_name: impl Into<String>, roles: Vec<RoleId>) -> Self {
        Self {
            user_id: Some(user_id),
            display_name: display_name.into(),
            roles,
        }
    }

    pub fn system() -> Self {
        Self {
            user_id: None,
            display_name: "system".to_string(),
            roles: Vec::new(),
        }
    }

    pub fn has_role(&self, role: &RoleId) -> bool {
        self.roles.contains(role)
    }

    pub fn is_user(&self, user_id: Uuid) -> bool {
        self.user_id == Some(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_id_normalizes_case_and_whitespace() {
        let a = RoleId::new("  Finance Manager ").unwrap();
        let b = RoleId::new("finance manager").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "finance manager");
    }

    #[test]
    fn blank_role_id_is_rejected() {
        assert!(RoleId::new("   ").is_none());
        assert!(RoleId::new("").is_none());
    }

    #[test]
    fn system_actor_has_no_identity() {
        let actor = ActorContext::system();
        assert!(actor.user_id.is_none());
        assert_eq!(actor.display_name, "system");
        assert!(!actor.has_role(&RoleId::new("admin").unwrap()));
    }
}
