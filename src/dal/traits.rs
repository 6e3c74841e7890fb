//! Repository trait for rule/alarm/link persistence.
//!
//! Implementations own the transaction mechanics; the batch operations below
//! are contractually atomic so callers observe either the whole write or none
//! of it.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Alarm, Rule, RuleAlarmLink, TenantId};

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// All rules for one tenant.
    async fn rules_for_tenant(&self, tenant: &TenantId) -> Result<Vec<Rule>>;

    /// All alarms for one tenant.
    async fn alarms_for_tenant(&self, tenant: &TenantId) -> Result<Vec<Alarm>>;

    /// All rule/alarm links for one tenant.
    async fn links_for_tenant(&self, tenant: &TenantId) -> Result<Vec<RuleAlarmLink>>;

    /// Whether a link already exists for the (rule, alarm) pair.
    async fn link_exists(&self, tenant: &TenantId, rule_id: Uuid, alarm_id: Uuid) -> Result<bool>;

    /// Inserts a batch of links atomically: either every link commits or,
    /// on failure (including a duplicate pair), none do. Returns the number
    /// inserted.
    async fn insert_links(&self, tenant: &TenantId, links: Vec<RuleAlarmLink>) -> Result<usize>;

    /// Replaces the tenant's rule set atomically. Links referencing the
    /// replaced rules are dropped in the same unit of work. Returns the
    /// number of rules stored.
    async fn replace_rules(&self, tenant: &TenantId, rules: Vec<Rule>) -> Result<usize>;

    /// Replaces the tenant's alarm set atomically, dropping links that
    /// reference the replaced alarms and inserting `seeded_links` in the same
    /// unit of work. Returns the number of alarms stored.
    async fn replace_alarms(
        &self,
        tenant: &TenantId,
        alarms: Vec<Alarm>,
        seeded_links: Vec<RuleAlarmLink>,
    ) -> Result<usize>;
}
