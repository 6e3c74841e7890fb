//! End-to-end flows over the public API: import, link seeding, detection
//! idempotence, tenant isolation, export fidelity and event-ID resolution.

use std::sync::Arc;

use siem_policy_manager::codec::{alarms, rules};
use siem_policy_manager::{
    ImportService, MemoryRepository, PolicyRepository, RelationshipDetector, SignatureIndex,
    TenantFileStore, TenantId,
};

const RULES_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nitro_policy esm="6F26:4000" version="11006014">
  <rules count="3">
    <rule>
      <id>47-6000114</id>
      <message>Suspicious Kerberos TGT Request</message>
      <description>Triggered by 43-263047680 activity</description>
      <severity>75</severity>
      <type>1</type>
      <revision>3</revision>
      <origin>2</origin>
      <action>0</action>
      <text><![CDATA[<ruleset id="47-6000114"><property><name>sigid</name><value>6000114</value></property></ruleset>]]></text>
    </rule>
    <rule>
      <id>306-31</id>
      <message>Service Ticket Anomaly</message>
      <severity>60</severity>
      <type>1</type>
      <revision>1</revision>
      <origin>2</origin>
      <action>0</action>
      <text><![CDATA[<ruleset id="306-31"></ruleset>]]></text>
    </rule>
    <rule>
      <id>47-7777777</id>
      <message>Unmatched Rule</message>
      <severity>50</severity>
      <type>1</type>
      <revision>1</revision>
      <origin>2</origin>
      <action>0</action>
      <text><![CDATA[<ruleset id="47-7777777"></ruleset>]]></text>
    </rule>
  </rules>
</nitro_policy>
"#;

const ALARMS_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<alarms>
  <alarm name="TGT Alarm" minVersion="11.6.14">
    <alarmData>
      <note>Fires on 43-263047680</note>
      <severity>75</severity>
    </alarmData>
    <conditionData>
      <conditionType>14</conditionType>
      <matchField>DSIDSigID</matchField>
      <matchValue>47|6000114</matchValue>
    </conditionData>
  </alarm>
  <alarm name="Service Ticket Alarm" minVersion="11.6.14">
    <alarmData>
      <severity>60</severity>
    </alarmData>
    <conditionData>
      <conditionType>14</conditionType>
      <matchField>DSIDSigID</matchField>
      <matchValue>306|31</matchValue>
    </conditionData>
  </alarm>
</alarms>
"#;

const MAPPING_JSON: &str = r#"[
  {"Event ID": 4768, "Signature ID": "43-263047680", "Description": "A Kerberos TGT was requested", "Audit Policy": "Kerberos Authentication Service"},
  {"Event ID": "4769", "Signature ID": "43-263047681, 43-263047682", "Description": "A Kerberos service ticket was requested", "Audit Policy": "Kerberos Service Ticket Operations"}
]"#;

#[tokio::test]
async fn import_seeds_links_and_detection_is_idempotent() {
    let repo = Arc::new(MemoryRepository::new());
    let service = ImportService::new(repo.clone());
    let tenant = TenantId::from("acme");

    let report = service.import_rules(&tenant, RULES_DOC).await.unwrap();
    assert_eq!(report.imported, 3);

    let report = service.import_alarms(&tenant, ALARMS_DOC).await.unwrap();
    assert_eq!(report.imported, 2);
    assert_eq!(report.links_seeded, 2);

    // Everything was seeded at import time; a detection pass finds nothing new.
    let detector = RelationshipDetector::new(repo.clone());
    let outcome = detector.detect(&tenant).await;
    assert!(outcome.success);
    assert_eq!(outcome.count, 0);

    // And running it again still changes nothing.
    let outcome = detector.detect(&tenant).await;
    assert!(outcome.success);
    assert_eq!(outcome.count, 0);

    let links = repo.links_for_tenant(&tenant).await.unwrap();
    assert_eq!(links.len(), 2);
    let mut values: Vec<&str> = links.iter().map(|l| l.match_value.as_str()).collect();
    values.sort();
    assert_eq!(values, ["306|31", "47|6000114"]);
}

#[tokio::test]
async fn detection_links_alarms_imported_before_rules() {
    let repo = Arc::new(MemoryRepository::new());
    let service = ImportService::new(repo.clone());
    let tenant = TenantId::from("acme");

    // Alarms first: no rules stored yet, so nothing can be seeded.
    let report = service.import_alarms(&tenant, ALARMS_DOC).await.unwrap();
    assert_eq!(report.links_seeded, 0);

    service.import_rules(&tenant, RULES_DOC).await.unwrap();

    let outcome = RelationshipDetector::new(repo.clone()).detect(&tenant).await;
    assert!(outcome.success);
    assert_eq!(outcome.count, 2);
}

#[tokio::test]
async fn tenants_never_see_each_other() {
    let repo = Arc::new(MemoryRepository::new());
    let service = ImportService::new(repo.clone());
    let acme = TenantId::from("acme");
    let globex = TenantId::from("globex");

    service.import_rules(&acme, RULES_DOC).await.unwrap();
    service.import_alarms(&acme, ALARMS_DOC).await.unwrap();
    service.import_rules(&globex, RULES_DOC).await.unwrap();

    // Globex has the same rules but none of acme's alarms.
    assert!(repo.alarms_for_tenant(&globex).await.unwrap().is_empty());
    assert!(repo.links_for_tenant(&globex).await.unwrap().is_empty());

    let outcome = RelationshipDetector::new(repo.clone()).detect(&globex).await;
    assert!(outcome.success);
    assert_eq!(outcome.count, 0);

    assert_eq!(repo.links_for_tenant(&acme).await.unwrap().len(), 2);
}

#[tokio::test]
async fn exported_documents_survive_a_full_cycle() {
    let tenant = TenantId::from("acme");

    let parsed_rules = rules::parse_rules_document(&tenant, RULES_DOC).unwrap();
    let rules_xml = rules::rules_to_xml(&parsed_rules).unwrap();
    let reimported = rules::parse_rules_document(&tenant, &rules_xml).unwrap();
    assert_eq!(parsed_rules.len(), reimported.len());
    for (a, b) in parsed_rules.iter().zip(&reimported) {
        assert_eq!(a.rule_id, b.rule_id);
        assert_eq!(a.severity, b.severity);
        assert_eq!(a.raw_payload, b.raw_payload);
    }

    let parsed_alarms = alarms::parse_alarms_document(&tenant, ALARMS_DOC).unwrap();
    let alarms_xml = alarms::alarms_to_xml(&parsed_alarms);
    let reimported = alarms::parse_alarms_document(&tenant, &alarms_xml).unwrap();
    assert_eq!(parsed_alarms.len(), reimported.len());
    for (a, b) in parsed_alarms.iter().zip(&reimported) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.match_value, b.match_value);
        assert_eq!(a.raw_payload.trim(), b.raw_payload.trim());
    }
}

#[tokio::test]
async fn mapping_resolves_rule_and_alarm_references() {
    let tmp = tempfile::tempdir().unwrap();
    let mapping = tmp.path().join("signature_mappings.json");
    std::fs::write(&mapping, MAPPING_JSON).unwrap();

    let index = SignatureIndex::load(&mapping).unwrap();
    assert!(!index.is_empty());

    // All equivalent spellings of the same signature land on one event.
    for spelling in ["43-263047680", "263047680", "1|263047680"] {
        assert_eq!(index.resolve(spelling), vec!["4768".to_string()]);
    }

    let tenant = TenantId::from("acme");
    let parsed = rules::parse_rules_document(&tenant, RULES_DOC).unwrap();
    // The first rule's description embeds a 43-prefixed signature.
    let event_ids = index.rule_event_ids(&parsed[0]);
    assert_eq!(event_ids, vec!["4768".to_string()]);

    let parsed = alarms::parse_alarms_document(&tenant, ALARMS_DOC).unwrap();
    let event_ids = index.alarm_event_ids(&parsed[0], &[]);
    assert_eq!(event_ids, vec!["4768".to_string()]);

    let details = index.describe(&event_ids);
    assert_eq!(details.len(), 1);
    assert_eq!(
        details[0].description.as_deref(),
        Some("A Kerberos TGT was requested")
    );
}

#[tokio::test]
async fn uploads_stay_inside_the_tenant_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let store = TenantFileStore::new(tmp.path());
    let acme = store.tenant(&TenantId::from("acme")).await.unwrap();
    let globex = store.tenant(&TenantId::from("globex")).await.unwrap();

    let name = acme.secure_filename("uploaded rules.xml", "rule");
    let path = acme.file_path(&name);
    tokio::fs::write(&path, RULES_DOC).await.unwrap();
    assert!(acme.validate_access(&path).await.is_ok());

    // One tenant's handle rejects another tenant's files.
    let foreign = globex.file_path("rule_other.xml");
    tokio::fs::write(&foreign, RULES_DOC).await.unwrap();
    assert!(acme.validate_access(&foreign).await.is_err());

    // Cleanup with keep-latest leaves exactly the file we just wrote.
    let deleted = acme.cleanup_old_files("rule", true).await.unwrap();
    assert_eq!(deleted, 0);
    assert!(path.exists());
}
