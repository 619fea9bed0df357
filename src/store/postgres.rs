//! Postgres-backed [`DecisionStore`]. The decision, its steps, the history
//! entry and the audit rows for one transition are committed in a single
//! transaction; the optimistic guard is a compare-and-swap on
//! `decisions.version`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::context::{RoleId, TenantContext};
use crate::models::audit::AuditEntry;
use crate::models::decision::{
    Decision, DecisionStatus, DecisionStep, Priority, RiskLevel, SlaStatus, StepStatus,
};
use crate::models::history::{DecisionAction, DecisionHistoryEntry};
use crate::models::policy::TenantPolicyConfig;
use crate::store::{DecisionStore, Page, StoreError};

#[derive(Clone)]
pub struct PgDecisionStore {
    pool: PgPool,
}

impl PgDecisionStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn load_steps(&self, decision_ids: &[Uuid]) -> Result<Vec<StepRow>, StoreError> {
        if decision_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, StepRow>(
            "SELECT decision_id, step_order, step_type, approver_role, assignee_user_id, \
             assignee_name, due_at, status, decided_at, notes \
             FROM decision_steps WHERE decision_id = ANY($1) ORDER BY decision_id, step_order",
        )
        .bind(decision_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows)
    }

    async fn assemble(&self, rows: Vec<DecisionRow>) -> Result<Vec<Decision>, StoreError> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut grouped: std::collections::HashMap<Uuid, Vec<DecisionStep>> =
            std::collections::HashMap::new();
        for step in self.load_steps(&ids).await? {
            grouped
                .entry(step.decision_id)
                .or_default()
                .push(step.into_step());
        }
        Ok(rows
            .into_iter()
            .map(|row| {
                let steps = grouped.remove(&row.id).unwrap_or_default();
                row.into_decision(steps)
            })
            .collect())
    }

    async fn fetch_one(
        &self,
        ctx: &TenantContext,
        id: Uuid,
    ) -> Result<Option<Decision>, StoreError> {
        let row = sqlx::query_as::<_, DecisionRow>(&format!(
            "{DECISION_COLUMNS} WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(ctx.tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            None => Ok(None),
            Some(row) => Ok(self.assemble(vec![row]).await?.pop()),
        }
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.into())
}

/// True when the insert tripped the partial unique index guarding one open
/// chain per `(tenant, entity, purpose)`.
fn is_open_chain_conflict(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db)
            if db.is_unique_violation() && db.constraint() == Some("uq_decisions_open_chain")
    )
}

const DECISION_COLUMNS: &str = "SELECT id, tenant_id, version, decision_type, workflow_type, \
    entity_type, entity_id, entity_name, purpose, amount, currency, status, priority, \
    risk_level, sla_status, sla_due_at, requested_by, requested_by_name, current_step_order, \
    total_steps, policy_snapshot, payload, policy_reason, business_impact, requested_at, \
    completed_at FROM decisions";

#[derive(sqlx::FromRow)]
struct DecisionRow {
    id: Uuid,
    tenant_id: Uuid,
    version: i64,
    decision_type: String,
    workflow_type: String,
    entity_type: String,
    entity_id: Uuid,
    entity_name: Option<String>,
    purpose: String,
    amount: Decimal,
    currency: String,
    status: DecisionStatus,
    priority: Priority,
    risk_level: RiskLevel,
    sla_status: SlaStatus,
    sla_due_at: Option<DateTime<Utc>>,
    requested_by: Option<Uuid>,
    requested_by_name: Option<String>,
    current_step_order: i32,
    total_steps: i32,
    policy_snapshot: serde_json::Value,
    payload: serde_json::Value,
    policy_reason: Option<String>,
    business_impact: Option<String>,
    requested_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl DecisionRow {
    fn into_decision(self, steps: Vec<DecisionStep>) -> Decision {
        Decision {
            id: self.id,
            tenant_id: self.tenant_id,
            version: self.version,
            decision_type: self.decision_type,
            workflow_type: self.workflow_type,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            entity_name: self.entity_name,
            purpose: self.purpose,
            amount: self.amount,
            currency: self.currency,
            status: self.status,
            priority: self.priority,
            risk_level: self.risk_level,
            sla_status: self.sla_status,
            sla_due_at: self.sla_due_at,
            requested_by: self.requested_by,
            requested_by_name: self.requested_by_name,
            current_step_order: self.current_step_order,
            total_steps: self.total_steps,
            policy_snapshot: self.policy_snapshot,
            payload: self.payload,
            policy_reason: self.policy_reason,
            business_impact: self.business_impact,
            requested_at: self.requested_at,
            completed_at: self.completed_at,
            steps,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StepRow {
    decision_id: Uuid,
    step_order: i32,
    step_type: String,
    approver_role: RoleId,
    assignee_user_id: Option<Uuid>,
    assignee_name: Option<String>,
    due_at: Option<DateTime<Utc>>,
    status: StepStatus,
    decided_at: Option<DateTime<Utc>>,
    notes: Option<String>,
}

impl StepRow {
    fn into_step(self) -> DecisionStep {
        DecisionStep {
            decision_id: self.decision_id,
            step_order: self.step_order,
            step_type: self.step_type,
            approver_role: self.approver_role,
            assignee_user_id: self.assignee_user_id,
            assignee_name: self.assignee_name,
            due_at: self.due_at,
            status: self.status,
            decided_at: self.decided_at,
            notes: self.notes,
        }
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    decision_id: Uuid,
    action: DecisionAction,
    actor_user_id: Option<Uuid>,
    actor_name: Option<String>,
    occurred_at: DateTime<Utc>,
    status: DecisionStatus,
    priority: Priority,
    risk_level: RiskLevel,
    sla_status: SlaStatus,
    note: Option<String>,
    policy_reason: Option<String>,
}

async fn upsert_steps(
    tx: &mut Transaction<'_, Postgres>,
    steps: &[DecisionStep],
) -> Result<(), StoreError> {
    for step in steps {
        sqlx::query(
            "INSERT INTO decision_steps \
             (decision_id, step_order, step_type, approver_role, assignee_user_id, \
              assignee_name, due_at, status, decided_at, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (decision_id, step_order) DO UPDATE SET \
               approver_role = EXCLUDED.approver_role, \
               assignee_user_id = EXCLUDED.assignee_user_id, \
               assignee_name = EXCLUDED.assignee_name, \
               due_at = EXCLUDED.due_at, \
               status = EXCLUDED.status, \
               decided_at = EXCLUDED.decided_at, \
               notes = EXCLUDED.notes",
        )
        .bind(step.decision_id)
        .bind(step.step_order)
        .bind(&step.step_type)
        .bind(&step.approver_role)
        .bind(step.assignee_user_id)
        .bind(&step.assignee_name)
        .bind(step.due_at)
        .bind(step.status)
        .bind(step.decided_at)
        .bind(&step.notes)
        .execute(&mut **tx)
        .await
        .map_err(backend)?;
    }
    Ok(())
}

async fn insert_history(
    tx: &mut Transaction<'_, Postgres>,
    entry: &DecisionHistoryEntry,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO decision_history \
         (id, decision_id, action, actor_user_id, actor_name, occurred_at, status, \
          priority, risk_level, sla_status, note, policy_reason) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(entry.id)
    .bind(entry.decision_id)
    .bind(entry.action)
    .bind(entry.actor_user_id)
    .bind(&entry.actor_name)
    .bind(entry.occurred_at)
    .bind(entry.status)
    .bind(entry.priority)
    .bind(entry.risk_level)
    .bind(entry.sla_status)
    .bind(&entry.note)
    .bind(&entry.policy_reason)
    .execute(&mut **tx)
    .await
    .map_err(backend)?;
    Ok(())
}

async fn insert_audit(
    tx: &mut Transaction<'_, Postgres>,
    entries: &[AuditEntry],
) -> Result<(), StoreError> {
    for entry in entries {
        sqlx::query(
            "INSERT INTO audit_events \
             (entity_type, entity_id, action, field, old_value, new_value, \
              actor_user_id, actor_name, at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.action)
        .bind(&entry.field)
        .bind(&entry.old_value)
        .bind(&entry.new_value)
        .bind(entry.actor_user_id)
        .bind(&entry.actor_name)
        .bind(entry.at)
        .execute(&mut **tx)
        .await
        .map_err(backend)?;
    }
    Ok(())
}

#[async_trait]
impl DecisionStore for PgDecisionStore {
    async fn load_policy(&self, ctx: &TenantContext) -> Result<TenantPolicyConfig, StoreError> {
        let row = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT policy FROM tenant_policies WHERE tenant_id = $1",
        )
        .bind(ctx.tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            None => Ok(TenantPolicyConfig::default()),
            Some(value) => match serde_json::from_value(value) {
                Ok(config) => Ok(config),
                Err(e) => {
                    // Malformed stored policy disables the workflow rather
                    // than failing every submission for the tenant.
                    tracing::warn!(tenant_id = %ctx.tenant_id, error = %e, "stored tenant policy is malformed; using defaults");
                    Ok(TenantPolicyConfig::default())
                }
            },
        }
    }

    async fn create(
        &self,
        ctx: &TenantContext,
        decision: &Decision,
        history: &DecisionHistoryEntry,
        audit: &[AuditEntry],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            "INSERT INTO decisions \
             (id, tenant_id, version, decision_type, workflow_type, entity_type, entity_id, \
              entity_name, purpose, amount, currency, status, priority, risk_level, sla_status, \
              sla_due_at, requested_by, requested_by_name, current_step_order, total_steps, \
              policy_snapshot, payload, policy_reason, business_impact, requested_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                     $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)",
        )
        .bind(decision.id)
        .bind(ctx.tenant_id)
        .bind(decision.version)
        .bind(&decision.decision_type)
        .bind(&decision.workflow_type)
        .bind(&decision.entity_type)
        .bind(decision.entity_id)
        .bind(&decision.entity_name)
        .bind(&decision.purpose)
        .bind(decision.amount)
        .bind(&decision.currency)
        .bind(decision.status)
        .bind(decision.priority)
        .bind(decision.risk_level)
        .bind(decision.sla_status)
        .bind(decision.sla_due_at)
        .bind(decision.requested_by)
        .bind(&decision.requested_by_name)
        .bind(decision.current_step_order)
        .bind(decision.total_steps)
        .bind(&decision.policy_snapshot)
        .bind(&decision.payload)
        .bind(&decision.policy_reason)
        .bind(&decision.business_impact)
        .bind(decision.requested_at)
        .bind(decision.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_open_chain_conflict(&e) {
                StoreError::AlreadyOpen
            } else {
                backend(e)
            }
        })?;

        upsert_steps(&mut tx, &decision.steps).await?;
        insert_history(&mut tx, history).await?;
        insert_audit(&mut tx, audit).await?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn get(&self, ctx: &TenantContext, id: Uuid) -> Result<Decision, StoreError> {
        self.fetch_one(ctx, id).await?.ok_or(StoreError::NotFound)
    }

    async fn get_by_entity(
        &self,
        ctx: &TenantContext,
        entity_type: &str,
        entity_id: Uuid,
    ) -> Result<Vec<Decision>, StoreError> {
        let rows = sqlx::query_as::<_, DecisionRow>(&format!(
            "{DECISION_COLUMNS} WHERE tenant_id = $1 AND entity_type = $2 AND entity_id = $3 \
             ORDER BY requested_at DESC"
        ))
        .bind(ctx.tenant_id)
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        self.assemble(rows).await
    }

    async fn find_open(
        &self,
        ctx: &TenantContext,
        entity_type: &str,
        entity_id: Uuid,
        purpose: &str,
    ) -> Result<Option<Decision>, StoreError> {
        let row = sqlx::query_as::<_, DecisionRow>(&format!(
            "{DECISION_COLUMNS} WHERE tenant_id = $1 AND entity_type = $2 AND entity_id = $3 \
             AND lower(purpose) = lower($4) AND status = 'pending' \
             ORDER BY requested_at DESC LIMIT 1"
        ))
        .bind(ctx.tenant_id)
        .bind(entity_type)
        .bind(entity_id)
        .bind(purpose)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            None => Ok(None),
            Some(row) => Ok(self.assemble(vec![row]).await?.pop()),
        }
    }

    async fn list_for_assignee(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        page: Page,
    ) -> Result<Vec<Decision>, StoreError> {
        let rows = sqlx::query_as::<_, DecisionRow>(&format!(
            "{DECISION_COLUMNS} WHERE tenant_id = $1 AND id IN \
               (SELECT s.decision_id FROM decision_steps s \
                JOIN decisions d ON d.id = s.decision_id \
                WHERE s.step_order = d.current_step_order AND s.assignee_user_id = $2) \
             ORDER BY requested_at DESC OFFSET $3 LIMIT $4"
        ))
        .bind(ctx.tenant_id)
        .bind(user_id)
        .bind(page.offset)
        .bind(page.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        self.assemble(rows).await
    }

    async fn list_for_requester(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        page: Page,
    ) -> Result<Vec<Decision>, StoreError> {
        let rows = sqlx::query_as::<_, DecisionRow>(&format!(
            "{DECISION_COLUMNS} WHERE tenant_id = $1 AND requested_by = $2 \
             ORDER BY requested_at DESC OFFSET $3 LIMIT $4"
        ))
        .bind(ctx.tenant_id)
        .bind(user_id)
        .bind(page.offset)
        .bind(page.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        self.assemble(rows).await
    }

    async fn list_overdue(
        &self,
        tenant_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Decision>, StoreError> {
        let rows = sqlx::query_as::<_, DecisionRow>(&format!(
            "{DECISION_COLUMNS} WHERE status = 'pending' \
             AND ($1::uuid IS NULL OR tenant_id = $1) \
             AND id IN \
               (SELECT s.decision_id FROM decision_steps s \
                JOIN decisions d ON d.id = s.decision_id \
                WHERE s.step_order = d.current_step_order \
                  AND s.due_at IS NOT NULL AND s.due_at < $2) \
             ORDER BY requested_at ASC"
        ))
        .bind(tenant_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        self.assemble(rows).await
    }

    async fn commit_transition(
        &self,
        ctx: &TenantContext,
        decision: &Decision,
        history: &DecisionHistoryEntry,
        audit: &[AuditEntry],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let result = sqlx::query(
            "UPDATE decisions SET \
               version = version + 1, status = $4, priority = $5, risk_level = $6, \
               sla_status = $7, sla_due_at = $8, current_step_order = $9, \
               policy_reason = $10, business_impact = $11, completed_at = $12 \
             WHERE id = $1 AND tenant_id = $2 AND version = $3",
        )
        .bind(decision.id)
        .bind(ctx.tenant_id)
        .bind(decision.version)
        .bind(decision.status)
        .bind(decision.priority)
        .bind(decision.risk_level)
        .bind(decision.sla_status)
        .bind(decision.sla_due_at)
        .bind(decision.current_step_order)
        .bind(&decision.policy_reason)
        .bind(&decision.business_impact)
        .bind(decision.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM decisions WHERE id = $1 AND tenant_id = $2)",
            )
            .bind(decision.id)
            .bind(ctx.tenant_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(backend)?;
            return Err(if exists {
                StoreError::VersionConflict
            } else {
                StoreError::NotFound
            });
        }

        upsert_steps(&mut tx, &decision.steps).await?;
        insert_history(&mut tx, history).await?;
        insert_audit(&mut tx, audit).await?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn history(
        &self,
        ctx: &TenantContext,
        decision_id: Uuid,
    ) -> Result<Vec<DecisionHistoryEntry>, StoreError> {
        // Tenant scope check rides on the aggregate lookup.
        self.get(ctx, decision_id).await?;

        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT id, decision_id, action, actor_user_id, actor_name, occurred_at, status, \
             priority, risk_level, sla_status, note, policy_reason \
             FROM decision_history WHERE decision_id = $1 ORDER BY seq ASC",
        )
        .bind(decision_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(|r| DecisionHistoryEntry {
                id: r.id,
                decision_id: r.decision_id,
                action: r.action,
                actor_user_id: r.actor_user_id,
                actor_name: r.actor_name,
                occurred_at: r.occurred_at,
                status: r.status,
                priority: r.priority,
                risk_level: r.risk_level,
                sla_status: r.sla_status,
                note: r.note,
                policy_reason: r.policy_reason,
            })
            .collect())
    }
}
