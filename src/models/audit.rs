use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row for the shared audit ledger collaborator.
///
/// Entries ride the same atomic commit as the decision mutation: if the
/// ledger append fails, the whole transition fails with no partial state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: String,
    pub field: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor_user_id: Option<Uuid>,
    pub actor_name: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: Uuid,
        action: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
            action: action.into(),
            field: None,
            old_value: None,
            new_value: None,
            actor_user_id: None,
            actor_name: None,
            at,
        }
    }

    pub fn field_change(
        mut self,
        field: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        self.field = Some(field.into());
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }

    pub fn by(mut self, user_id: Option<Uuid>, name: Option<String>) -> Self {
        self.actor_user_id = user_id;
        self.actor_name = name;
        self
    }
}
