//! Durable representation of the decision aggregate.
//!
//! All operations are tenant-scoped: queries implicitly filter by the
//! caller's tenant and writes stamp it. Cross-tenant access fails with
//! `NotFound` — never a permission error, to avoid confirming existence
//! across tenants.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::context::TenantContext;
use crate::errors::EngineError;
use crate::models::audit::AuditEntry;
use crate::models::decision::Decision;
use crate::models::history::DecisionHistoryEntry;
use crate::models::policy::TenantPolicyConfig;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    /// The optimistic version guard rejected the write; the caller lost a
    /// race and must re-read current state before retrying.
    #[error("version conflict")]
    VersionConflict,

    /// A pending chain for the same entity and purpose already exists. Raised
    /// by `create` when two submissions race past the duplicate check; the
    /// caller should re-read and fold into the open chain.
    #[error("an open chain already exists for this entity and purpose")]
    AlreadyOpen,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => EngineError::NotFound,
            StoreError::VersionConflict | StoreError::AlreadyOpen => {
                EngineError::ConcurrentModification
            }
            StoreError::Backend(e) => EngineError::Persistence(e),
        }
    }
}

/// Pagination for list queries. `limit` is clamped to 1..=200.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Page {
    pub fn new(offset: i64, limit: i64) -> Self {
        Self {
            offset: offset.max(0),
            limit: limit.clamp(1, 200),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, 50)
    }
}

#[async_trait]
pub trait DecisionStore: Send + Sync {
    /// Tenant workflow configuration; defaults (workflow disabled) when the
    /// tenant has none stored.
    async fn load_policy(&self, ctx: &TenantContext) -> Result<TenantPolicyConfig, StoreError>;

    /// Persist a new decision aggregate, its opening history entry and audit
    /// rows in one atomic unit. Fails with `AlreadyOpen` when a pending chain
    /// for the same entity and purpose already exists.
    async fn create(
        &self,
        ctx: &TenantContext,
        decision: &Decision,
        history: &DecisionHistoryEntry,
        audit: &[AuditEntry],
    ) -> Result<(), StoreError>;

    async fn get(&self, ctx: &TenantContext, id: Uuid) -> Result<Decision, StoreError>;

    async fn get_by_entity(
        &self,
        ctx: &TenantContext,
        entity_type: &str,
        entity_id: Uuid,
    ) -> Result<Vec<Decision>, StoreError>;

    /// The still-pending decision for the same entity and purpose, if one
    /// exists. Used to fold duplicate submissions into the open chain.
    async fn find_open(
        &self,
        ctx: &TenantContext,
        entity_type: &str,
        entity_id: Uuid,
        purpose: &str,
    ) -> Result<Option<Decision>, StoreError>;

    async fn list_for_assignee(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        page: Page,
    ) -> Result<Vec<Decision>, StoreError>;

    async fn list_for_requester(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        page: Page,
    ) -> Result<Vec<Decision>, StoreError>;

    /// Pending decisions whose current step due time has passed. Crosses
    /// tenants when `tenant_id` is `None` (scheduler scan); escalation
    /// refreshes the due time, which is what keeps re-scans idempotent.
    async fn list_overdue(
        &self,
        tenant_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Decision>, StoreError>;

    /// Apply one transition: replace the aggregate (decision + steps), append
    /// exactly one history entry and the audit rows, all atomically, guarded
    /// by `decision.version` matching the stored stamp. On success the stored
    /// version is `decision.version + 1`.
    async fn commit_transition(
        &self,
        ctx: &TenantContext,
        decision: &Decision,
        history: &DecisionHistoryEntry,
        audit: &[AuditEntry],
    ) -> Result<(), StoreError>;

    /// Full append-only history for one decision, oldest first.
    async fn history(
        &self,
        ctx: &TenantContext,
        decision_id: Uuid,
    ) -> Result<Vec<DecisionHistoryEntry>, StoreError>;
}
