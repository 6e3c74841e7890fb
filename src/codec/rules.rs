//! Rule document import and export.
//!
//! The source document is a `nitro_policy` root wrapping a `<rules>` element
//! with repeated `<rule>` children. Each rule's `<text>` child carries the
//! opaque vendor ruleset fragment in CDATA; it is stored trimmed but
//! otherwise untouched and re-emitted verbatim on export.

use chrono::Utc;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::{PolicyError, Result};
use crate::models::{
    Rule, TenantId, DEFAULT_ACTION_DISALLOWED, DEFAULT_ACTION_INITIAL, DEFAULT_OTHER_BITS_DEFAULT,
    DEFAULT_OTHER_BITS_DISALLOWED, DEFAULT_RULE_CLASS, DEFAULT_SID,
};

use super::{as_parse_error, read_element_text, ValidationReport, VENDOR_MARKER};

/// Parses a full rule document into tenant-scoped rule records. Any required
/// field missing or unparsable aborts the whole document; no partial rule set
/// is produced.
pub fn parse_rules_document(tenant: &TenantId, xml: &str) -> Result<Vec<Rule>> {
    parse_inner(tenant, xml).map_err(as_parse_error)
}

fn parse_inner(tenant: &TenantId, xml: &str) -> Result<Vec<Rule>> {
    let mut reader = Reader::from_str(xml);
    let mut rules = Vec::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"rule" => {
                // rule_fields consumes through the matching </rule>.
                let fields = rule_fields(&mut reader)?;
                rules.push(build_rule(tenant, &fields, rules.len() + 1)?);
            }
            Event::Start(_) => depth += 1,
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => {
                // The reader does not flag a truncated document on its own.
                if depth > 0 {
                    return Err(PolicyError::parse(
                        "unexpected end of document: unclosed elements remain",
                    ));
                }
                break;
            }
            _ => {}
        }
    }

    debug!(tenant = %tenant, count = rules.len(), "rule document parsed");
    Ok(rules)
}

/// Collects the scalar children of one `<rule>` element into a field map.
fn rule_fields(reader: &mut Reader<&[u8]>) -> Result<HashMap<String, String>> {
    let mut fields = HashMap::new();
    loop {
        match reader.read_event()? {
            Event::Start(child) => {
                let name = String::from_utf8_lossy(child.name().as_ref()).into_owned();
                let text = read_element_text(reader, &name)?;
                fields.insert(name, text);
            }
            Event::Empty(child) => {
                let name = String::from_utf8_lossy(child.name().as_ref()).into_owned();
                fields.insert(name, String::new());
            }
            Event::End(e) if e.name().as_ref() == b"rule" => break,
            Event::Eof => {
                return Err(PolicyError::parse("unexpected end of document inside <rule>"));
            }
            _ => {}
        }
    }
    Ok(fields)
}

fn required<'a>(fields: &'a HashMap<String, String>, tag: &str, ordinal: usize) -> Result<&'a str> {
    match fields.get(tag) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(PolicyError::parse(format!(
            "rule {ordinal}: missing required element <{tag}>"
        ))),
    }
}

fn required_int(fields: &HashMap<String, String>, tag: &str, ordinal: usize) -> Result<i64> {
    let value = required(fields, tag, ordinal)?;
    value.trim().parse().map_err(|_| {
        PolicyError::parse(format!(
            "rule {ordinal}: element <{tag}> must be an integer, got '{value}'"
        ))
    })
}

fn int_or_default(fields: &HashMap<String, String>, tag: &str, default: i64) -> i64 {
    fields
        .get(tag)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Signature ID derivation: the segment after the last hyphen of the
/// composite rule ID, or the whole ID when it has none.
pub fn derive_sig_id(rule_id: &str) -> Option<String> {
    let sig = match rule_id.rsplit_once('-') {
        Some((_, suffix)) => suffix,
        None => rule_id,
    };
    let sig = sig.trim();
    if sig.is_empty() {
        None
    } else {
        Some(sig.to_string())
    }
}

fn build_rule(tenant: &TenantId, fields: &HashMap<String, String>, ordinal: usize) -> Result<Rule> {
    let rule_id = required(fields, "id", ordinal)?.trim().to_string();
    let name = required(fields, "message", ordinal)?.trim().to_string();
    let raw_payload = required(fields, "text", ordinal)?.trim().to_string();

    Ok(Rule {
        id: Uuid::new_v4(),
        tenant_id: tenant.clone(),
        sig_id: derive_sig_id(&rule_id),
        rule_id,
        name,
        description: fields
            .get("description")
            .map(|v| v.trim().to_string())
            .unwrap_or_default(),
        severity: required_int(fields, "severity", ordinal)?,
        rule_type: required_int(fields, "type", ordinal)?,
        revision: required_int(fields, "revision", ordinal)?,
        origin: required_int(fields, "origin", ordinal)?,
        action: required_int(fields, "action", ordinal)?,
        norm_id: fields
            .get("normid")
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string),
        sid: int_or_default(fields, "sid", DEFAULT_SID),
        rule_class: int_or_default(fields, "class", DEFAULT_RULE_CLASS),
        action_initial: int_or_default(fields, "action_initial", DEFAULT_ACTION_INITIAL),
        action_disallowed: int_or_default(fields, "action_disallowed", DEFAULT_ACTION_DISALLOWED),
        other_bits_default: int_or_default(fields, "other_bits_default", DEFAULT_OTHER_BITS_DEFAULT),
        other_bits_disallowed: int_or_default(
            fields,
            "other_bits_disallowed",
            DEFAULT_OTHER_BITS_DISALLOWED,
        ),
        raw_payload,
        created_at: Utc::now(),
    })
}

/// Serializes rules back into the vendor document shape. Every field is
/// written from stored values, defaults included, and the ruleset payload is
/// embedded unmodified inside a CDATA-wrapped `<text>` element.
pub fn rules_to_xml(rules: &[Rule]) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("nitro_policy");
    for (key, value) in VENDOR_MARKER {
        root.push_attribute((key, value));
    }
    writer.write_event(Event::Start(root))?;

    let mut container = BytesStart::new("rules");
    let count = rules.len().to_string();
    container.push_attribute(("count", count.as_str()));
    writer.write_event(Event::Start(container))?;

    for rule in rules {
        write_rule(&mut writer, rule)?;
    }

    writer.write_event(Event::End(BytesEnd::new("rules")))?;
    writer.write_event(Event::End(BytesEnd::new("nitro_policy")))?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| PolicyError::parse(format!("export produced invalid UTF-8: {e}")))
}

fn write_rule(writer: &mut Writer<Vec<u8>>, rule: &Rule) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("rule")))?;

    write_text_element(writer, "id", &rule.rule_id)?;
    if let Some(norm_id) = &rule.norm_id {
        write_text_element(writer, "normid", norm_id)?;
    }
    write_text_element(writer, "revision", &rule.revision.to_string())?;
    write_text_element(writer, "sid", &rule.sid.to_string())?;
    write_text_element(writer, "class", &rule.rule_class.to_string())?;
    write_text_element(writer, "message", &rule.name)?;
    write_text_element(writer, "description", &rule.description)?;
    write_text_element(writer, "origin", &rule.origin.to_string())?;
    write_text_element(writer, "severity", &rule.severity.to_string())?;
    write_text_element(writer, "type", &rule.rule_type.to_string())?;
    write_text_element(writer, "action", &rule.action.to_string())?;
    write_text_element(writer, "action_initial", &rule.action_initial.to_string())?;
    write_text_element(writer, "action_disallowed", &rule.action_disallowed.to_string())?;
    write_text_element(writer, "other_bits_default", &rule.other_bits_default.to_string())?;
    write_text_element(
        writer,
        "other_bits_disallowed",
        &rule.other_bits_disallowed.to_string(),
    )?;

    writer.write_event(Event::Start(BytesStart::new("text")))?;
    writer.write_event(Event::CData(BytesCData::new(rule.raw_payload.as_str())))?;
    writer.write_event(Event::End(BytesEnd::new("text")))?;

    writer.write_event(Event::End(BytesEnd::new("rule")))?;
    Ok(())
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, tag: &str, value: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    if !value.is_empty() {
        writer.write_event(Event::Text(BytesText::new(value)))?;
    }
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

/// Structural validation of a rule document. Reports every problem instead
/// of stopping at the first; warnings do not make the document invalid.
pub fn validate_rules_document(xml: &str) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut count = 0usize;

    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"rule" => {
                count += 1;
                match rule_fields(&mut reader) {
                    Ok(fields) => validate_rule_fields(&fields, count, &mut errors),
                    Err(e) => {
                        errors.push(format!("rule {count}: {e}"));
                        break;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                errors.push(format!("XML syntax error: {e}"));
                break;
            }
        }
    }

    if count == 0 {
        warnings.push("no rules found in the document".to_string());
    }

    ValidationReport::from_findings(errors, warnings)
}

fn validate_rule_fields(fields: &HashMap<String, String>, ordinal: usize, errors: &mut Vec<String>) {
    for tag in ["id", "message", "severity", "text"] {
        if fields.get(tag).map(|v| v.trim().is_empty()).unwrap_or(true) {
            errors.push(format!("rule {ordinal}: missing or empty element <{tag}>"));
        }
    }

    if let Some(severity) = fields.get("severity").filter(|v| !v.trim().is_empty()) {
        match severity.trim().parse::<i64>() {
            Ok(value) if !(0..=100).contains(&value) => {
                errors.push(format!(
                    "rule {ordinal}: severity must be between 0 and 100, got {value}"
                ));
            }
            Err(_) => {
                errors.push(format!(
                    "rule {ordinal}: severity must be a number, got '{}'",
                    severity.trim()
                ));
            }
            _ => {}
        }
    }
}
