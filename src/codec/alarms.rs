//! Alarm document import and export.
//!
//! The source document is an `<alarms>` root with repeated `<alarm>`
//! elements. Scalar fields of interest live under the `alarmData` and
//! `conditionData` groups; everything else (actions, device filters,
//! templates) is opaque. The full raw serialization of each alarm element is
//! captured as encountered so export can reproduce it byte-for-byte.

use chrono::Utc;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{PolicyError, Result};
use crate::models::{Alarm, TenantId};

use super::{as_parse_error, read_element_text, ValidationReport};

static MATCH_VALUE_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\|\d+$").expect("match value pattern"));

/// Parses a full alarm document into tenant-scoped alarm records. A missing
/// required attribute aborts the whole document; no partial alarm set is
/// produced.
pub fn parse_alarms_document(tenant: &TenantId, xml: &str) -> Result<Vec<Alarm>> {
    parse_inner(tenant, xml).map_err(as_parse_error)
}

fn parse_inner(tenant: &TenantId, xml: &str) -> Result<Vec<Alarm>> {
    let mut alarms = Vec::new();
    for raw in alarm_elements(xml)? {
        alarms.push(build_alarm(tenant, raw, alarms.len() + 1)?);
    }
    debug!(tenant = %tenant, count = alarms.len(), "alarm document parsed");
    Ok(alarms)
}

/// Slices the raw serialization of every `<alarm>` element out of the source
/// document, exactly as encountered.
fn alarm_elements(xml: &str) -> Result<Vec<&str>> {
    let mut reader = Reader::from_str(xml);
    let mut elements = Vec::new();
    let mut offset = 0usize;
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"alarm" => {
                let start = offset;
                skip_to_element_end(&mut reader, "alarm")?;
                let end = reader.buffer_position() as usize;
                elements.push(&xml[start..end]);
            }
            Event::Empty(e) if e.name().as_ref() == b"alarm" => {
                let end = reader.buffer_position() as usize;
                elements.push(&xml[offset..end]);
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
        offset = reader.buffer_position() as usize;
    }

    Ok(elements)
}

/// Consumes events until the current element closes, nesting included.
fn skip_to_element_end(reader: &mut Reader<&[u8]>, context: &str) -> Result<()> {
    let mut depth = 1u32;
    loop {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Event::Eof => {
                return Err(PolicyError::parse(format!(
                    "unexpected end of document inside <{context}>"
                )));
            }
            _ => {}
        }
    }
}

#[derive(Debug, Default)]
struct AlarmFields {
    name: Option<String>,
    min_version: Option<String>,
    severity: Option<String>,
    note: Option<String>,
    assignee: Option<String>,
    esc_assignee: Option<String>,
    match_field: Option<String>,
    match_value: Option<String>,
    condition_type: Option<String>,
    saw_alarm_data: bool,
    saw_condition_data: bool,
}

#[derive(Debug, PartialEq, Clone, Copy)]
enum Section {
    None,
    AlarmData,
    ConditionData,
}

/// Extracts the scalar fields from one raw alarm element. Uninteresting
/// subtrees are skipped whole, so nested groups never disturb field capture.
fn collect_alarm_fields(raw: &str) -> Result<AlarmFields> {
    let mut reader = Reader::from_str(raw);
    let mut fields = AlarmFields::default();
    let mut section = Section::None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"alarm" => read_alarm_attributes(&e, &mut fields)?,
                b"alarmData" => {
                    fields.saw_alarm_data = true;
                    section = Section::AlarmData;
                }
                b"conditionData" => {
                    fields.saw_condition_data = true;
                    section = Section::ConditionData;
                }
                tag => {
                    let slot = field_slot(&mut fields, section, tag);
                    match slot {
                        Some(slot) => {
                            let name = String::from_utf8_lossy(tag).into_owned();
                            *slot = Some(read_element_text(&mut reader, &name)?);
                        }
                        None => skip_to_element_end(&mut reader, "alarm")?,
                    }
                }
            },
            Event::Empty(e) if e.name().as_ref() == b"alarm" => {
                read_alarm_attributes(&e, &mut fields)?;
            }
            Event::End(e) => match e.name().as_ref() {
                b"alarmData" | b"conditionData" => section = Section::None,
                b"alarm" => break,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(fields)
}

fn read_alarm_attributes(
    element: &quick_xml::events::BytesStart<'_>,
    fields: &mut AlarmFields,
) -> Result<()> {
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::InvalidAttr)?;
        match attr.key.as_ref() {
            b"name" => fields.name = Some(attr.unescape_value()?.into_owned()),
            b"minVersion" => fields.min_version = Some(attr.unescape_value()?.into_owned()),
            _ => {}
        }
    }
    Ok(())
}

fn field_slot<'a>(
    fields: &'a mut AlarmFields,
    section: Section,
    tag: &[u8],
) -> Option<&'a mut Option<String>> {
    match (section, tag) {
        (Section::AlarmData, b"severity") => Some(&mut fields.severity),
        (Section::AlarmData, b"note") => Some(&mut fields.note),
        (Section::AlarmData, b"assignee") => Some(&mut fields.assignee),
        (Section::AlarmData, b"escAssignee") => Some(&mut fields.esc_assignee),
        (Section::ConditionData, b"matchField") => Some(&mut fields.match_field),
        (Section::ConditionData, b"matchValue") => Some(&mut fields.match_value),
        (Section::ConditionData, b"conditionType") => Some(&mut fields.condition_type),
        _ => None,
    }
}

fn parse_int(value: &Option<String>) -> Option<i64> {
    value.as_deref().and_then(|v| v.trim().parse().ok())
}

fn build_alarm(tenant: &TenantId, raw: &str, ordinal: usize) -> Result<Alarm> {
    let fields = collect_alarm_fields(raw)?;
    let name = fields.name.clone().ok_or_else(|| {
        PolicyError::parse(format!("alarm {ordinal}: missing required 'name' attribute"))
    })?;

    Ok(Alarm {
        id: Uuid::new_v4(),
        tenant_id: tenant.clone(),
        name,
        min_version: fields.min_version,
        severity: parse_int(&fields.severity),
        match_field: fields.match_field.map(|v| v.trim().to_string()),
        match_value: fields.match_value.map(|v| v.trim().to_string()),
        condition_type: parse_int(&fields.condition_type),
        assignee_id: parse_int(&fields.assignee),
        esc_assignee_id: parse_int(&fields.esc_assignee),
        note: fields.note,
        raw_payload: raw.to_string(),
        created_at: Utc::now(),
    })
}

/// Serializes alarms back into the vendor document shape, re-emitting each
/// alarm's captured payload verbatim. Alarms created without a payload get a
/// minimal element.
pub fn alarms_to_xml(alarms: &[Alarm]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<alarms>\n");
    for alarm in alarms {
        if alarm.raw_payload.trim().is_empty() {
            let name = quick_xml::escape::escape(&alarm.name);
            out.push_str(&format!("<alarm name=\"{name}\"/>\n"));
        } else {
            out.push_str(alarm.raw_payload.trim_end());
            out.push('\n');
        }
    }
    out.push_str("</alarms>\n");
    out
}

/// Structural validation of an alarm document. Reports everything it finds;
/// a suspicious `matchValue` shape is a warning, not an error.
pub fn validate_alarms_document(xml: &str) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut count = 0usize;

    let elements = match alarm_elements(xml).map_err(as_parse_error) {
        Ok(elements) => elements,
        Err(e) => {
            return ValidationReport::from_findings(vec![e.to_string()], warnings);
        }
    };

    for raw in elements {
        count += 1;
        let fields = match collect_alarm_fields(raw) {
            Ok(fields) => fields,
            Err(e) => {
                errors.push(format!("alarm {count}: {e}"));
                continue;
            }
        };

        if fields.name.is_none() {
            errors.push(format!("alarm {count}: missing required 'name' attribute"));
        }
        if !fields.saw_alarm_data {
            errors.push(format!("alarm {count}: missing 'alarmData' element"));
        }
        if !fields.saw_condition_data {
            errors.push(format!("alarm {count}: missing 'conditionData' element"));
        } else {
            if fields.match_field.is_none() {
                errors.push(format!("alarm {count}: missing 'matchField' in conditionData"));
            }
            match fields.match_value.as_deref() {
                None => {
                    errors.push(format!("alarm {count}: missing 'matchValue' in conditionData"));
                }
                Some(value) if !MATCH_VALUE_SHAPE.is_match(value.trim()) => {
                    warnings.push(format!(
                        "alarm {count}: matchValue format may be incorrect: '{value}'"
                    ));
                }
                Some(_) => {}
            }
        }

        if let Some(severity) = fields.severity.as_deref().map(str::trim) {
            match severity.parse::<i64>() {
                Ok(value) if !(0..=100).contains(&value) => {
                    errors.push(format!(
                        "alarm {count}: severity must be between 0 and 100, got {value}"
                    ));
                }
                Err(_) => {
                    errors.push(format!(
                        "alarm {count}: severity must be a number, got '{severity}'"
                    ));
                }
                _ => {}
            }
        }
    }

    if count == 0 {
        warnings.push("no alarms found in the document".to_string());
    }

    ValidationReport::from_findings(errors, warnings)
}
