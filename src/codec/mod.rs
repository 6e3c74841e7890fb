//! Import/export codec for the two vendor document shapes: correlation rule
//! policies and alarm definitions.
//!
//! Opaque payloads (the CDATA ruleset fragment of a rule, the full serialized
//! alarm element) are carried verbatim so an export reproduces the vendor
//! document the product expects.

pub mod alarms;
pub mod rules;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;

use crate::error::{PolicyError, Result};

/// Fixed vendor schema/version marker emitted on the rule export root
/// element. The downstream product rejects documents without it.
pub const VENDOR_MARKER: [(&str, &str); 6] = [
    ("esm", "6F26:4000"),
    ("time", "06/05/2025 16:48:08"),
    ("user", "NGCP"),
    ("build", "11.6.14 20250324053645"),
    ("model", "ETM-VM4"),
    ("version", "11006014"),
];

/// Structural validation result. Unlike import, validation never aborts; it
/// reports everything it finds.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub(crate) fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Remaps XML syntax errors onto the codec's parse-error kind, so a malformed
/// document surfaces the same way as a structurally incomplete one.
pub(crate) fn as_parse_error(err: PolicyError) -> PolicyError {
    match err {
        PolicyError::XmlError(e) => PolicyError::parse(format!("XML syntax error: {e}")),
        other => other,
    }
}

/// Reads the textual content of the current element up to its end tag,
/// concatenating character data and CDATA sections. Child elements are not
/// expected inside scalar fields and abort the parse.
pub(crate) fn read_element_text(reader: &mut Reader<&[u8]>, name: &str) -> Result<String> {
    let mut out = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(t) => out.push_str(&t.unescape()?),
            Event::CData(c) => {
                let raw = c.into_inner();
                let text = std::str::from_utf8(&raw)
                    .map_err(|e| PolicyError::parse(format!("invalid UTF-8 in <{name}>: {e}")))?;
                out.push_str(text);
            }
            Event::End(e) if e.name().as_ref() == name.as_bytes() => break,
            Event::Start(e) => {
                return Err(PolicyError::parse(format!(
                    "unexpected element <{}> inside <{}>",
                    String::from_utf8_lossy(e.name().as_ref()),
                    name
                )));
            }
            Event::Eof => {
                return Err(PolicyError::parse(format!(
                    "unexpected end of document inside <{name}>"
                )));
            }
            _ => {}
        }
    }
    Ok(out)
}
