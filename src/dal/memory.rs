//! In-memory repository. Backs the CLI and the test suite; mirrors the
//! atomicity contract a transactional backend would provide.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{PolicyError, Result};
use crate::models::{Alarm, Rule, RuleAlarmLink, TenantId};

use super::traits::PolicyRepository;

#[derive(Debug, Default)]
struct Tables {
    rules: Vec<Rule>,
    alarms: Vec<Alarm>,
    links: Vec<RuleAlarmLink>,
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        MemoryRepository::default()
    }

    fn check_new_links(existing: &[RuleAlarmLink], links: &[RuleAlarmLink]) -> Result<()> {
        let mut pairs: HashSet<(Uuid, Uuid)> = existing
            .iter()
            .map(|link| (link.rule_id, link.alarm_id))
            .collect();
        for link in links {
            if !pairs.insert((link.rule_id, link.alarm_id)) {
                return Err(PolicyError::storage(format!(
                    "duplicate link for rule {} and alarm {}",
                    link.rule_id, link.alarm_id
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyRepository for MemoryRepository {
    async fn rules_for_tenant(&self, tenant: &TenantId) -> Result<Vec<Rule>> {
        let tables = self.tables.read();
        Ok(tables
            .rules
            .iter()
            .filter(|r| &r.tenant_id == tenant)
            .cloned()
            .collect())
    }

    async fn alarms_for_tenant(&self, tenant: &TenantId) -> Result<Vec<Alarm>> {
        let tables = self.tables.read();
        Ok(tables
            .alarms
            .iter()
            .filter(|a| &a.tenant_id == tenant)
            .cloned()
            .collect())
    }

    async fn links_for_tenant(&self, tenant: &TenantId) -> Result<Vec<RuleAlarmLink>> {
        let tables = self.tables.read();
        Ok(tables
            .links
            .iter()
            .filter(|l| &l.tenant_id == tenant)
            .cloned()
            .collect())
    }

    async fn link_exists(&self, tenant: &TenantId, rule_id: Uuid, alarm_id: Uuid) -> Result<bool> {
        let tables = self.tables.read();
        Ok(tables
            .links
            .iter()
            .any(|l| &l.tenant_id == tenant && l.rule_id == rule_id && l.alarm_id == alarm_id))
    }

    async fn insert_links(&self, tenant: &TenantId, links: Vec<RuleAlarmLink>) -> Result<usize> {
        if links.iter().any(|l| &l.tenant_id != tenant) {
            return Err(PolicyError::storage("link batch crosses tenant boundary"));
        }
        let mut tables = self.tables.write();
        // Validate the whole batch before applying anything.
        Self::check_new_links(&tables.links, &links)?;
        let count = links.len();
        tables.links.extend(links);
        Ok(count)
    }

    async fn replace_rules(&self, tenant: &TenantId, rules: Vec<Rule>) -> Result<usize> {
        if rules.iter().any(|r| &r.tenant_id != tenant) {
            return Err(PolicyError::storage("rule batch crosses tenant boundary"));
        }
        let mut tables = self.tables.write();
        let removed: HashSet<Uuid> = tables
            .rules
            .iter()
            .filter(|r| &r.tenant_id == tenant)
            .map(|r| r.id)
            .collect();
        tables.rules.retain(|r| &r.tenant_id != tenant);
        tables.links.retain(|l| !removed.contains(&l.rule_id));
        let count = rules.len();
        tables.rules.extend(rules);
        Ok(count)
    }

    async fn replace_alarms(
        &self,
        tenant: &TenantId,
        alarms: Vec<Alarm>,
        seeded_links: Vec<RuleAlarmLink>,
    ) -> Result<usize> {
        if alarms.iter().any(|a| &a.tenant_id != tenant)
            || seeded_links.iter().any(|l| &l.tenant_id != tenant)
        {
            return Err(PolicyError::storage("alarm batch crosses tenant boundary"));
        }
        let mut tables = self.tables.write();
        let removed: HashSet<Uuid> = tables
            .alarms
            .iter()
            .filter(|a| &a.tenant_id == tenant)
            .map(|a| a.id)
            .collect();

        // Stage the post-replace link table and validate seeds against it
        // before mutating anything.
        let mut staged_links: Vec<RuleAlarmLink> = tables
            .links
            .iter()
            .filter(|l| !removed.contains(&l.alarm_id))
            .cloned()
            .collect();
        Self::check_new_links(&staged_links, &seeded_links)?;
        staged_links.extend(seeded_links);

        tables.alarms.retain(|a| &a.tenant_id != tenant);
        let count = alarms.len();
        tables.alarms.extend(alarms);
        tables.links = staged_links;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rule(tenant: &TenantId, rule_id: &str, sig_id: &str) -> Rule {
        Rule {
            id: Uuid::new_v4(),
            tenant_id: tenant.clone(),
            rule_id: rule_id.to_string(),
            sig_id: Some(sig_id.to_string()),
            name: "r".to_string(),
            description: String::new(),
            severity: 50,
            rule_type: 1,
            revision: 1,
            origin: 0,
            action: 0,
            norm_id: None,
            sid: 0,
            rule_class: 0,
            action_initial: 255,
            action_disallowed: 0,
            other_bits_default: 4,
            other_bits_disallowed: 0,
            raw_payload: String::new(),
            created_at: Utc::now(),
        }
    }

    fn alarm(tenant: &TenantId, match_value: &str) -> Alarm {
        Alarm {
            id: Uuid::new_v4(),
            tenant_id: tenant.clone(),
            name: "a".to_string(),
            min_version: None,
            severity: Some(50),
            match_field: Some("DSIDSigID".to_string()),
            match_value: Some(match_value.to_string()),
            condition_type: Some(14),
            assignee_id: None,
            esc_assignee_id: None,
            note: None,
            raw_payload: String::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn records_are_scoped_per_tenant() {
        let repo = MemoryRepository::new();
        let acme = TenantId::from("acme");
        let globex = TenantId::from("globex");

        repo.replace_rules(&acme, vec![rule(&acme, "47-1", "1")])
            .await
            .unwrap();
        repo.replace_rules(&globex, vec![rule(&globex, "47-2", "2")])
            .await
            .unwrap();

        let acme_rules = repo.rules_for_tenant(&acme).await.unwrap();
        assert_eq!(acme_rules.len(), 1);
        assert_eq!(acme_rules[0].rule_id, "47-1");
        assert_eq!(repo.alarms_for_tenant(&acme).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn duplicate_link_batch_applies_nothing() {
        let repo = MemoryRepository::new();
        let tenant = TenantId::from("acme");
        let r = rule(&tenant, "47-600", "600");
        let a = alarm(&tenant, "47|600");
        repo.replace_rules(&tenant, vec![r.clone()]).await.unwrap();
        repo.replace_alarms(&tenant, vec![a.clone()], vec![]).await.unwrap();

        let link = RuleAlarmLink::exact_match(
            tenant.clone(),
            r.id,
            a.id,
            "600".to_string(),
            "47|600".to_string(),
        );
        let dup = RuleAlarmLink::exact_match(
            tenant.clone(),
            r.id,
            a.id,
            "600".to_string(),
            "47|600".to_string(),
        );
        let err = repo.insert_links(&tenant, vec![link, dup]).await;
        assert!(err.is_err());
        assert!(repo.links_for_tenant(&tenant).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replacing_rules_drops_their_links() {
        let repo = MemoryRepository::new();
        let tenant = TenantId::from("acme");
        let r = rule(&tenant, "47-600", "600");
        let a = alarm(&tenant, "47|600");
        repo.replace_rules(&tenant, vec![r.clone()]).await.unwrap();
        repo.replace_alarms(&tenant, vec![a.clone()], vec![]).await.unwrap();
        repo.insert_links(
            &tenant,
            vec![RuleAlarmLink::exact_match(
                tenant.clone(),
                r.id,
                a.id,
                "600".to_string(),
                "47|600".to_string(),
            )],
        )
        .await
        .unwrap();
        assert!(repo.link_exists(&tenant, r.id, a.id).await.unwrap());

        repo.replace_rules(&tenant, vec![rule(&tenant, "47-601", "601")])
            .await
            .unwrap();
        assert!(!repo.link_exists(&tenant, r.id, a.id).await.unwrap());
        assert!(repo.links_for_tenant(&tenant).await.unwrap().is_empty());
    }
}
