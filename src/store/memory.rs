//! In-memory [`DecisionStore`] used by tests and embedders that do not need
//! durability. A single mutex over the whole state gives the same atomic
//! commit unit the Postgres transaction does.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::context::TenantContext;
use crate::models::audit::AuditEntry;
use crate::models::decision::{Decision, DecisionStatus};
use crate::models::history::DecisionHistoryEntry;
use crate::models::policy::TenantPolicyConfig;
use crate::store::{DecisionStore, Page, StoreError};

#[derive(Default)]
struct Inner {
    decisions: HashMap<Uuid, Decision>,
    history: HashMap<Uuid, Vec<DecisionHistoryEntry>>,
    audit: Vec<AuditEntry>,
    policies: HashMap<Uuid, TenantPolicyConfig>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_policy(&self, tenant_id: Uuid, config: TenantPolicyConfig) {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.policies.insert(tenant_id, config);
    }

    /// Snapshot of the audit ledger, for assertions.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .audit
            .clone()
    }

    pub fn decision_count(&self) -> usize {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .decisions
            .len()
    }
}

fn scoped<'a>(inner: &'a Inner, ctx: &TenantContext, id: Uuid) -> Option<&'a Decision> {
    inner
        .decisions
        .get(&id)
        .filter(|d| d.tenant_id == ctx.tenant_id)
}

#[async_trait]
impl DecisionStore for MemoryStore {
    async fn load_policy(&self, ctx: &TenantContext) -> Result<TenantPolicyConfig, StoreError> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner
            .policies
            .get(&ctx.tenant_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create(
        &self,
        ctx: &TenantContext,
        decision: &Decision,
        history: &DecisionHistoryEntry,
        audit: &[AuditEntry],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        debug_assert_eq!(decision.tenant_id, ctx.tenant_id);
        let duplicate = inner.decisions.values().any(|d| {
            d.tenant_id == ctx.tenant_id
                && d.entity_id == decision.entity_id
                && d.entity_type.eq_ignore_ascii_case(&decision.entity_type)
                && d.purpose.eq_ignore_ascii_case(&decision.purpose)
                && d.status == DecisionStatus::Pending
        });
        if duplicate {
            return Err(StoreError::AlreadyOpen);
        }
        inner.decisions.insert(decision.id, decision.clone());
        inner
            .history
            .entry(decision.id)
            .or_default()
            .push(history.clone());
        inner.audit.extend_from_slice(audit);
        Ok(())
    }

    async fn get(&self, ctx: &TenantContext, id: Uuid) -> Result<Decision, StoreError> {
        let inner = self.inner.lock().expect("memory store poisoned");
        scoped(&inner, ctx, id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_by_entity(
        &self,
        ctx: &TenantContext,
        entity_type: &str,
        entity_id: Uuid,
    ) -> Result<Vec<Decision>, StoreError> {
        let inner = self.inner.lock().expect("memory store poisoned");
        let mut found: Vec<Decision> = inner
            .decisions
            .values()
            .filter(|d| {
                d.tenant_id == ctx.tenant_id
                    && d.entity_id == entity_id
                    && d.entity_type.eq_ignore_ascii_case(entity_type)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(found)
    }

    async fn find_open(
        &self,
        ctx: &TenantContext,
        entity_type: &str,
        entity_id: Uuid,
        purpose: &str,
    ) -> Result<Option<Decision>, StoreError> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner
            .decisions
            .values()
            .filter(|d| {
                d.tenant_id == ctx.tenant_id
                    && d.entity_id == entity_id
                    && d.entity_type.eq_ignore_ascii_case(entity_type)
                    && d.purpose.eq_ignore_ascii_case(purpose)
                    && d.status == DecisionStatus::Pending
            })
            .max_by_key(|d| d.requested_at)
            .cloned())
    }

    async fn list_for_assignee(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        page: Page,
    ) -> Result<Vec<Decision>, StoreError> {
        let inner = self.inner.lock().expect("memory store poisoned");
        let mut found: Vec<Decision> = inner
            .decisions
            .values()
            .filter(|d| d.tenant_id == ctx.tenant_id && d.current_assignee() == Some(user_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(paged(found, page))
    }

    async fn list_for_requester(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        page: Page,
    ) -> Result<Vec<Decision>, StoreError> {
        let inner = self.inner.lock().expect("memory store poisoned");
        let mut found: Vec<Decision> = inner
            .decisions
            .values()
            .filter(|d| d.tenant_id == ctx.tenant_id && d.requested_by == Some(user_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(paged(found, page))
    }

    async fn list_overdue(
        &self,
        tenant_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Decision>, StoreError> {
        let inner = self.inner.lock().expect("memory store poisoned");
        let mut found: Vec<Decision> = inner
            .decisions
            .values()
            .filter(|d| {
                d.status == DecisionStatus::Pending
                    && tenant_id.map_or(true, |t| d.tenant_id == t)
                    && d.current_step()
                        .and_then(|s| s.due_at)
                        .map_or(false, |due| now > due)
            })
            .cloned()
            .collect();
        found.sort_by_key(|d| d.requested_at);
        Ok(found)
    }

    async fn commit_transition(
        &self,
        ctx: &TenantContext,
        decision: &Decision,
        history: &DecisionHistoryEntry,
        audit: &[AuditEntry],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let stored = inner
            .decisions
            .get_mut(&decision.id)
            .filter(|d| d.tenant_id == ctx.tenant_id)
            .ok_or(StoreError::NotFound)?;

        if stored.version != decision.version {
            return Err(StoreError::VersionConflict);
        }

        let mut committed = decision.clone();
        committed.version += 1;
        *stored = committed;

        inner
            .history
            .entry(decision.id)
            .or_default()
            .push(history.clone());
        inner.audit.extend_from_slice(audit);
        Ok(())
    }

    async fn history(
        &self,
        ctx: &TenantContext,
        decision_id: Uuid,
    ) -> Result<Vec<DecisionHistoryEntry>, StoreError> {
        let inner = self.inner.lock().expect("memory store poisoned");
        // Tenant scope check rides on the aggregate lookup.
        scoped(&inner, ctx, decision_id).ok_or(StoreError::NotFound)?;
        Ok(inner
            .history
            .get(&decision_id)
            .cloned()
            .unwrap_or_default())
    }
}

fn paged(found: Vec<Decision>, page: Page) -> Vec<Decision> {
    found
        .into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect()
}
