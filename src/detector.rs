//! Rule/alarm relationship detection.
//!
//! A rule and an alarm are related when the alarm's `matchValue` equals
//! `"<prefix>|<sigId>"` for that rule. The matching predicate lives here in
//! one place and is shared by the standalone detection pass and import-time
//! seeding, so the two entry points cannot diverge or double-create links.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::dal::PolicyRepository;
use crate::error::Result;
use crate::models::{Alarm, Rule, RuleAlarmLink, TenantId};

/// Prefix used when a rule's composite ID does not carry a numeric one.
pub const FALLBACK_PREFIX: &str = "47";

/// Derives the alarm match-value prefix from a composite rule ID: the segment
/// before the first hyphen when it is purely numeric, otherwise `"47"`.
pub fn rule_prefix(rule_id: &str) -> &str {
    match rule_id.split_once('-') {
        Some((first, _)) if !first.is_empty() && first.chars().all(|c| c.is_ascii_digit()) => first,
        _ => FALLBACK_PREFIX,
    }
}

/// The `matchValue` an alarm must carry to be related to this rule, or `None`
/// when the rule has no signature ID.
pub fn expected_match_value(rule: &Rule) -> Option<String> {
    let sig_id = rule.sig_id.as_deref()?;
    Some(format!("{}|{}", rule_prefix(&rule.rule_id), sig_id))
}

/// Computes the links implied by one set of rules and alarms, skipping pairs
/// in `existing`. Both the detection pass and import-time seeding run through
/// this function.
pub fn seed_links(
    tenant: &TenantId,
    rules: &[Rule],
    alarms: &[Alarm],
    existing: &HashSet<(Uuid, Uuid)>,
) -> Vec<RuleAlarmLink> {
    // Multiple alarms may share one match value.
    let mut alarms_by_match_value: HashMap<&str, Vec<&Alarm>> = HashMap::new();
    for alarm in alarms {
        if let Some(value) = alarm.match_value.as_deref() {
            alarms_by_match_value.entry(value).or_default().push(alarm);
        }
    }

    let mut seen = existing.clone();
    let mut links = Vec::new();

    for rule in rules {
        let expected = match expected_match_value(rule) {
            Some(v) => v,
            None => continue,
        };
        let Some(matching) = alarms_by_match_value.get(expected.as_str()) else {
            continue;
        };
        for alarm in matching {
            if !seen.insert((rule.id, alarm.id)) {
                continue;
            }
            links.push(RuleAlarmLink::exact_match(
                tenant.clone(),
                rule.id,
                alarm.id,
                rule.sig_id.clone().unwrap_or_default(),
                expected.clone(),
            ));
        }
    }

    links
}

/// Summary of one newly created link, reported to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LinkSummary {
    pub rule_id: Uuid,
    pub alarm_id: Uuid,
    pub sig_id: String,
    pub match_value: String,
}

impl From<&RuleAlarmLink> for LinkSummary {
    fn from(link: &RuleAlarmLink) -> Self {
        LinkSummary {
            rule_id: link.rule_id,
            alarm_id: link.alarm_id,
            sig_id: link.sig_id.clone(),
            match_value: link.match_value.clone(),
        }
    }
}

/// Outcome of one detection run. Failures are reported here rather than
/// raised, so a caller orchestrating many tenants can continue with the next.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DetectionOutcome {
    pub success: bool,
    pub new_links: Vec<LinkSummary>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DetectionOutcome {
    fn failed(error: String) -> Self {
        DetectionOutcome {
            success: false,
            new_links: Vec::new(),
            count: 0,
            error: Some(error),
        }
    }
}

pub struct RelationshipDetector {
    repo: Arc<dyn PolicyRepository>,
}

impl RelationshipDetector {
    pub fn new(repo: Arc<dyn PolicyRepository>) -> Self {
        RelationshipDetector { repo }
    }

    /// Detects and persists missing rule/alarm links for one tenant. All new
    /// links commit in one atomic batch. Re-running over unchanged data
    /// produces zero new links.
    pub async fn detect(&self, tenant: &TenantId) -> DetectionOutcome {
        match self.run(tenant).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(tenant = %tenant, error = %e, "relationship detection failed");
                DetectionOutcome::failed(e.to_string())
            }
        }
    }

    async fn run(&self, tenant: &TenantId) -> Result<DetectionOutcome> {
        let rules: Vec<Rule> = self
            .repo
            .rules_for_tenant(tenant)
            .await?
            .into_iter()
            .filter(|r| r.sig_id.is_some())
            .collect();
        let alarms = self.repo.alarms_for_tenant(tenant).await?;
        let existing: HashSet<(Uuid, Uuid)> = self
            .repo
            .links_for_tenant(tenant)
            .await?
            .iter()
            .map(|l| (l.rule_id, l.alarm_id))
            .collect();

        let links = seed_links(tenant, &rules, &alarms, &existing);
        let summaries: Vec<LinkSummary> = links.iter().map(LinkSummary::from).collect();
        let count = links.len();

        if !links.is_empty() {
            self.repo.insert_links(tenant, links).await?;
        }

        info!(tenant = %tenant, count, "relationship detection complete");
        Ok(DetectionOutcome {
            success: true,
            new_links: summaries,
            count,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_first_segment_becomes_prefix() {
        assert_eq!(rule_prefix("47-6000114"), "47");
        assert_eq!(rule_prefix("306-22"), "306");
    }

    #[test]
    fn non_numeric_or_missing_prefix_falls_back() {
        assert_eq!(rule_prefix("custom-6000114"), "47");
        assert_eq!(rule_prefix("6000114"), "47");
        assert_eq!(rule_prefix("-6000114"), "47");
    }
}
