//! Audit-trail record: who changed what, with before/after snapshots.

use chrono::{DateTime, Utc};
use mongodb::bson::Document;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Document>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(action: &str, entity_type: &str, entity_id: &str, actor: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            actor: actor.to_string(),
            reason: None,
            before: None,
            after: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_before(mut self, before: Document) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_after(mut self, after: Document) -> Self {
        self.after = Some(after);
        self
    }
}
