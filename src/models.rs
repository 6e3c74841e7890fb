use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque tenant identifier. Every rule, alarm and link is scoped to exactly
/// one tenant; records must never be visible across tenant boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        TenantId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        TenantId(id.to_string())
    }
}

// Vendor defaults for rule fields that may be absent from the source document.
pub const DEFAULT_SID: i64 = 0;
pub const DEFAULT_RULE_CLASS: i64 = 0;
pub const DEFAULT_ACTION_INITIAL: i64 = 255;
pub const DEFAULT_ACTION_DISALLOWED: i64 = 0;
pub const DEFAULT_OTHER_BITS_DEFAULT: i64 = 4;
pub const DEFAULT_OTHER_BITS_DISALLOWED: i64 = 0;

/// A vendor correlation rule imported from a rule document.
///
/// `raw_payload` holds the opaque vendor ruleset fragment exactly as it
/// appeared inside the rule's CDATA section; it is re-emitted verbatim on
/// export and must never be reformatted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Rule {
    pub id: Uuid,
    pub tenant_id: TenantId,
    /// Composite vendor identifier, form "<prefix>-<sigId>".
    pub rule_id: String,
    /// Numeric signature identifier derived from `rule_id`.
    pub sig_id: Option<String>,
    pub name: String,
    pub description: String,
    pub severity: i64,
    pub rule_type: i64,
    pub revision: i64,
    pub origin: i64,
    pub action: i64,
    pub norm_id: Option<String>,
    pub sid: i64,
    pub rule_class: i64,
    pub action_initial: i64,
    pub action_disallowed: i64,
    pub other_bits_default: i64,
    pub other_bits_disallowed: i64,
    pub raw_payload: String,
    pub created_at: DateTime<Utc>,
}

/// A vendor alarm imported from an alarm document.
///
/// `raw_payload` is the full serialization of the source `<alarm>` element as
/// encountered, preserved for export fidelity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Alarm {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub min_version: Option<String>,
    pub severity: Option<i64>,
    pub match_field: Option<String>,
    /// Condition match value, form "<prefix>|<sigId>".
    pub match_value: Option<String>,
    pub condition_type: Option<i64>,
    pub assignee_id: Option<i64>,
    pub esc_assignee_id: Option<i64>,
    pub note: Option<String>,
    pub raw_payload: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    ExactMatch,
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationshipType::ExactMatch => f.write_str("exact_match"),
        }
    }
}

/// An inferred association between one rule and one alarm sharing a signature
/// identifier. The (rule, alarm) pair is unique per tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuleAlarmLink {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub rule_id: Uuid,
    pub alarm_id: Uuid,
    pub sig_id: String,
    pub match_value: String,
    pub relationship_type: RelationshipType,
    pub created_at: DateTime<Utc>,
}

impl RuleAlarmLink {
    pub fn exact_match(
        tenant_id: TenantId,
        rule_id: Uuid,
        alarm_id: Uuid,
        sig_id: String,
        match_value: String,
    ) -> Self {
        RuleAlarmLink {
            id: Uuid::new_v4(),
            tenant_id,
            rule_id,
            alarm_id,
            sig_id,
            match_value,
            relationship_type: RelationshipType::ExactMatch,
            created_at: Utc::now(),
        }
    }
}

/// One row of the reference table: event metadata keyed by platform event ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EventIdEntry {
    pub event_id: String,
    pub description: Option<String>,
    pub audit_policy: Option<String>,
}

/// Metadata lookup result for a single event ID. Unknown IDs yield `None`
/// fields rather than an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EventDetail {
    pub id: String,
    pub description: Option<String>,
    pub audit_policy: Option<String>,
}
