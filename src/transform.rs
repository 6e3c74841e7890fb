//! Rule-to-alarm generation.
//!
//! Produces a ready-to-import alarm definition for a correlation rule: the
//! alarm fires on the rule's signature through a `DSIDSigID` match condition.
//! Everything not derived from the rule comes from an [`AlarmTemplate`].

use chrono::Utc;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::detector::expected_match_value;
use crate::error::{PolicyError, Result};
use crate::models::{Alarm, Rule};

/// Defaults applied to every generated alarm. The IDs refer to principals in
/// the downstream product; `condition_type` 14 is its field-match condition.
#[derive(Debug, Clone)]
pub struct AlarmTemplate {
    pub min_version: String,
    pub match_field: String,
    pub condition_type: i64,
    pub assignee_id: i64,
    pub esc_assignee_id: i64,
    pub max_name_len: usize,
}

impl Default for AlarmTemplate {
    fn default() -> Self {
        AlarmTemplate {
            min_version: "11.6.14".to_string(),
            match_field: "DSIDSigID".to_string(),
            condition_type: 14,
            assignee_id: 655372,
            esc_assignee_id: 90118,
            max_name_len: 128,
        }
    }
}

impl AlarmTemplate {
    /// Generates an alarm watching for this rule's signature. The alarm name
    /// comes from the rule name, truncated with a stable hash suffix when it
    /// exceeds the product's limit.
    pub fn generate_for_rule(&self, rule: &Rule) -> Result<Alarm> {
        let name = self.alarm_name(rule);
        let match_value = expected_match_value(rule).ok_or_else(|| {
            PolicyError::detection(format!(
                "rule {} has no signature ID to build a match condition from",
                rule.rule_id
            ))
        })?;
        let severity = rule.severity.clamp(0, 100);
        let note = rule.description.clone();

        let raw_payload = self.render_payload(&name, severity, &note, &match_value)?;
        debug!(rule_id = %rule.rule_id, alarm = %name, %match_value, "alarm generated");

        Ok(Alarm {
            id: Uuid::new_v4(),
            tenant_id: rule.tenant_id.clone(),
            name,
            min_version: Some(self.min_version.clone()),
            severity: Some(severity),
            match_field: Some(self.match_field.clone()),
            match_value: Some(match_value),
            condition_type: Some(self.condition_type),
            assignee_id: Some(self.assignee_id),
            esc_assignee_id: Some(self.esc_assignee_id),
            note: Some(note),
            raw_payload,
            created_at: Utc::now(),
        })
    }

    /// Rule name, or the composite rule ID when the name is empty. Names over
    /// the limit are cut and suffixed with 8 hex characters of their digest so
    /// distinct long names stay distinct.
    fn alarm_name(&self, rule: &Rule) -> String {
        let base = if rule.name.trim().is_empty() {
            rule.rule_id.as_str()
        } else {
            rule.name.as_str()
        };
        if base.chars().count() <= self.max_name_len {
            return base.to_string();
        }

        let digest = Sha256::digest(base.as_bytes());
        let suffix: String = digest.iter().map(|b| format!("{b:02x}")).take(4).collect();
        let keep = self.max_name_len.saturating_sub(suffix.len() + 1);
        let head: String = base.chars().take(keep).collect();
        format!("{head}_{suffix}")
    }

    fn render_payload(
        &self,
        name: &str,
        severity: i64,
        note: &str,
        match_value: &str,
    ) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        let mut alarm = BytesStart::new("alarm");
        alarm.push_attribute(("name", name));
        alarm.push_attribute(("minVersion", self.min_version.as_str()));
        writer.write_event(Event::Start(alarm))?;

        writer.write_event(Event::Start(BytesStart::new("alarmData")))?;
        write_text(&mut writer, "filters", "")?;
        write_text(&mut writer, "note", note)?;
        write_text(&mut writer, "notificationType", "0")?;
        write_text(&mut writer, "severity", &severity.to_string())?;
        write_text(&mut writer, "escEnabled", "F")?;
        write_text(&mut writer, "escSeverity", &severity.to_string())?;
        write_text(&mut writer, "escMin", "0")?;
        write_text(&mut writer, "summaryTemplate", "")?;
        write_text(&mut writer, "assignee", &self.assignee_id.to_string())?;
        write_text(&mut writer, "assigneeType", "0")?;
        write_text(&mut writer, "escAssignee", &self.esc_assignee_id.to_string())?;
        write_text(&mut writer, "escAssigneeType", "0")?;
        write_text(&mut writer, "deviceIDs", "")?;
        write_text(&mut writer, "enabled", "T")?;
        writer.write_event(Event::End(BytesEnd::new("alarmData")))?;

        writer.write_event(Event::Start(BytesStart::new("conditionData")))?;
        write_text(&mut writer, "conditionType", &self.condition_type.to_string())?;
        write_text(&mut writer, "queryID", "0")?;
        write_text(&mut writer, "alertRateMin", "0")?;
        write_text(&mut writer, "alertRateCount", "0")?;
        write_text(&mut writer, "pctAbove", "0")?;
        write_text(&mut writer, "pctBelow", "0")?;
        write_text(&mut writer, "offsetMin", "0")?;
        write_text(&mut writer, "timeFilter", "")?;
        write_text(&mut writer, "xMin", "10")?;
        write_text(&mut writer, "useWatchlist", "F")?;
        write_text(&mut writer, "matchField", &self.match_field)?;
        write_text(&mut writer, "matchValue", match_value)?;
        write_text(&mut writer, "matchNot", "F")?;
        writer.write_event(Event::End(BytesEnd::new("conditionData")))?;

        writer.write_event(Event::Start(BytesStart::new("actions")))?;
        writer.write_event(Event::Start(BytesStart::new("actionData")))?;
        write_text(&mut writer, "actionType", "0")?;
        write_text(&mut writer, "actionProcess", "6")?;
        write_text(&mut writer, "actionAttributes", "")?;
        writer.write_event(Event::End(BytesEnd::new("actionData")))?;
        writer.write_event(Event::End(BytesEnd::new("actions")))?;

        writer.write_event(Event::End(BytesEnd::new("alarm")))?;

        String::from_utf8(writer.into_inner())
            .map_err(|e| PolicyError::parse(format!("generated alarm is not UTF-8: {e}")))
    }
}

fn write_text(writer: &mut Writer<Vec<u8>>, tag: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    if !text.is_empty() {
        writer.write_event(Event::Text(BytesText::new(text)))?;
    }
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::alarms::parse_alarms_document;
    use crate::models::{self, TenantId};

    fn sample_rule(name: &str) -> Rule {
        Rule {
            id: Uuid::new_v4(),
            tenant_id: TenantId::from("acme"),
            rule_id: "47-6000114".to_string(),
            sig_id: Some("6000114".to_string()),
            name: name.to_string(),
            description: "Detects kerberos ticket bursts".to_string(),
            severity: 75,
            rule_type: 5,
            revision: 1,
            origin: 2,
            action: 0,
            norm_id: None,
            sid: models::DEFAULT_SID,
            rule_class: models::DEFAULT_RULE_CLASS,
            action_initial: models::DEFAULT_ACTION_INITIAL,
            action_disallowed: models::DEFAULT_ACTION_DISALLOWED,
            other_bits_default: models::DEFAULT_OTHER_BITS_DEFAULT,
            other_bits_disallowed: models::DEFAULT_OTHER_BITS_DISALLOWED,
            raw_payload: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn generated_alarm_carries_rule_signature() {
        let rule = sample_rule("TGT Burst");
        let alarm = AlarmTemplate::default().generate_for_rule(&rule).unwrap();

        assert_eq!(alarm.name, "TGT Burst");
        assert_eq!(alarm.match_value.as_deref(), Some("47|6000114"));
        assert_eq!(alarm.match_field.as_deref(), Some("DSIDSigID"));
        assert_eq!(alarm.condition_type, Some(14));
        assert_eq!(alarm.assignee_id, Some(655372));
        assert_eq!(alarm.esc_assignee_id, Some(90118));
        assert_eq!(alarm.min_version.as_deref(), Some("11.6.14"));
        assert_eq!(alarm.severity, Some(75));
    }

    #[test]
    fn long_names_are_truncated_with_stable_suffix() {
        let long = "x".repeat(300);
        let rule = sample_rule(&long);
        let template = AlarmTemplate::default();

        let a = template.generate_for_rule(&rule).unwrap();
        let b = template.generate_for_rule(&rule).unwrap();

        assert_eq!(a.name.chars().count(), 128);
        assert_eq!(a.name, b.name);
        assert!(a.name.contains('_'));

        let other = sample_rule(&"y".repeat(300));
        let c = template.generate_for_rule(&other).unwrap();
        assert_ne!(a.name, c.name);
    }

    #[test]
    fn payload_reimports_through_the_codec() {
        let rule = sample_rule("TGT Burst");
        let alarm = AlarmTemplate::default().generate_for_rule(&rule).unwrap();

        let doc = format!("<alarms>\n{}\n</alarms>", alarm.raw_payload);
        let parsed = parse_alarms_document(&rule.tenant_id, &doc).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, alarm.name);
        assert_eq!(parsed[0].match_value, alarm.match_value);
        assert_eq!(parsed[0].severity, alarm.severity);
        assert_eq!(parsed[0].note.as_deref(), Some("Detects kerberos ticket bursts"));
    }

    #[test]
    fn rule_without_signature_is_rejected() {
        let mut rule = sample_rule("TGT Burst");
        rule.sig_id = None;
        assert!(AlarmTemplate::default().generate_for_rule(&rule).is_err());
    }

    #[test]
    fn empty_rule_name_falls_back_to_rule_id() {
        let rule = sample_rule("  ");
        let alarm = AlarmTemplate::default().generate_for_rule(&rule).unwrap();
        assert_eq!(alarm.name, "47-6000114");
    }
}
