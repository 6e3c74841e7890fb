//! Import orchestration: parse a vendor document, replace the tenant's stored
//! set, and seed rule/alarm links where signatures line up.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::codec::{alarms, rules};
use crate::dal::PolicyRepository;
use crate::detector::seed_links;
use crate::error::Result;
use crate::models::TenantId;

/// Result of one import, reported back to the caller.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ImportReport {
    pub imported: usize,
    pub links_seeded: usize,
}

pub struct ImportService {
    repo: Arc<dyn PolicyRepository>,
}

impl ImportService {
    pub fn new(repo: Arc<dyn PolicyRepository>) -> Self {
        ImportService { repo }
    }

    /// Imports a rule document, replacing the tenant's rule set. A parse
    /// failure leaves the stored set untouched.
    pub async fn import_rules(&self, tenant: &TenantId, xml: &str) -> Result<ImportReport> {
        let parsed = rules::parse_rules_document(tenant, xml)?;
        let imported = self.repo.replace_rules(tenant, parsed).await?;
        info!(tenant = %tenant, imported, "rule import complete");
        Ok(ImportReport {
            imported,
            links_seeded: 0,
        })
    }

    /// Imports an alarm document, replacing the tenant's alarm set. Links to
    /// the tenant's stored rules are seeded in the same atomic unit, so the
    /// alarms never exist unlinked when a matching rule is present.
    pub async fn import_alarms(&self, tenant: &TenantId, xml: &str) -> Result<ImportReport> {
        let parsed = alarms::parse_alarms_document(tenant, xml)?;

        let stored_rules = self.repo.rules_for_tenant(tenant).await?;
        // The incoming alarms replace the stored set wholesale, so links are
        // seeded against a clean slate.
        let existing: HashSet<(Uuid, Uuid)> = HashSet::new();
        let seeded = seed_links(tenant, &stored_rules, &parsed, &existing);
        let links_seeded = seeded.len();

        let imported = self.repo.replace_alarms(tenant, parsed, seeded).await?;
        info!(tenant = %tenant, imported, links_seeded, "alarm import complete");
        Ok(ImportReport {
            imported,
            links_seeded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dal::MemoryRepository;
    use crate::detector::RelationshipDetector;

    const RULES: &str = r#"<nitro_policy>
  <rules count="1">
    <rule>
      <id>47-6000114</id>
      <message>TGT Burst</message>
      <description>Kerberos ticket burst</description>
      <severity>75</severity>
      <type>5</type>
      <revision>1</revision>
      <origin>2</origin>
      <action>0</action>
      <text><![CDATA[<ruleset><match field="EventID" value="4768"/></ruleset>]]></text>
    </rule>
  </rules>
</nitro_policy>"#;

    const ALARMS: &str = r#"<alarms>
  <alarm name="TGT Burst Alarm" minVersion="11.6.14">
    <alarmData><severity>75</severity></alarmData>
    <conditionData>
      <matchField>DSIDSigID</matchField>
      <matchValue>47|6000114</matchValue>
    </conditionData>
  </alarm>
  <alarm name="Unrelated" minVersion="11.6.14">
    <alarmData><severity>40</severity></alarmData>
    <conditionData>
      <matchField>DSIDSigID</matchField>
      <matchValue>47|9999999</matchValue>
    </conditionData>
  </alarm>
</alarms>"#;

    #[tokio::test]
    async fn alarm_import_seeds_links_against_stored_rules() {
        let repo = Arc::new(MemoryRepository::new());
        let service = ImportService::new(repo.clone());
        let tenant = TenantId::from("acme");

        let report = service.import_rules(&tenant, RULES).await.unwrap();
        assert_eq!(report.imported, 1);

        let report = service.import_alarms(&tenant, ALARMS).await.unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.links_seeded, 1);

        let links = repo.links_for_tenant(&tenant).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].match_value, "47|6000114");
    }

    #[tokio::test]
    async fn detection_after_seeded_import_finds_nothing_new() {
        let repo = Arc::new(MemoryRepository::new());
        let service = ImportService::new(repo.clone());
        let tenant = TenantId::from("acme");

        service.import_rules(&tenant, RULES).await.unwrap();
        service.import_alarms(&tenant, ALARMS).await.unwrap();

        let outcome = RelationshipDetector::new(repo).detect(&tenant).await;
        assert!(outcome.success);
        assert_eq!(outcome.count, 0);
    }

    #[tokio::test]
    async fn reimport_replaces_alarms_and_reseeds() {
        let repo = Arc::new(MemoryRepository::new());
        let service = ImportService::new(repo.clone());
        let tenant = TenantId::from("acme");

        service.import_rules(&tenant, RULES).await.unwrap();
        service.import_alarms(&tenant, ALARMS).await.unwrap();
        let report = service.import_alarms(&tenant, ALARMS).await.unwrap();

        assert_eq!(report.links_seeded, 1);
        let links = repo.links_for_tenant(&tenant).await.unwrap();
        assert_eq!(links.len(), 1);
        let alarms = repo.alarms_for_tenant(&tenant).await.unwrap();
        assert_eq!(alarms.len(), 2);
    }

    #[tokio::test]
    async fn malformed_document_leaves_store_untouched() {
        let repo = Arc::new(MemoryRepository::new());
        let service = ImportService::new(repo.clone());
        let tenant = TenantId::from("acme");

        service.import_rules(&tenant, RULES).await.unwrap();
        assert!(service.import_rules(&tenant, "<nitro_policy><rules>").await.is_err());

        let rules = repo.rules_for_tenant(&tenant).await.unwrap();
        assert_eq!(rules.len(), 1);
    }
}
