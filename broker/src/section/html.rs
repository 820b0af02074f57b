//! HTML section parser (C4): walks tagged `data-clearance` elements into an
//! ordered sequence of sections, preserving untagged ancestor markup as part
//! of whichever section (or the document root) contains it.

use super::{summarize, DocumentMeta, ParsedDocument, ParsedSection, SourceFormat};
use crate::classification::Clearance;
use crate::error::BrokerError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

struct Frame {
    tag: String,
    attrs: Vec<(String, String)>,
    explicit_clearance: Option<Clearance>,
    section_id: Option<String>,
    buffer: String,
    capturing_title: bool,
}

pub fn parse(input: &str, fallback_title: &str) -> Result<ParsedDocument, BrokerError> {
    let mut reader = Reader::from_str(input);
    reader.trim_text(false);

    let mut stack: Vec<Frame> = vec![Frame {
        tag: "#root".into(),
        attrs: vec![],
        explicit_clearance: None,
        section_id: None,
        buffer: String::new(),
        capturing_title: false,
    }];
    let mut sections: Vec<ParsedSection> = Vec::new();
    let mut title: Option<String> = None;
    let mut doc_order = 0usize;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                push_frame(&mut stack, &e, &mut doc_order)?;
            }
            Ok(Event::Empty(e)) => {
                push_frame(&mut stack, &e, &mut doc_order)?;
                close_frame(&mut stack, &mut sections, &mut title)?;
            }
            Ok(Event::End(_)) => {
                close_frame(&mut stack, &mut sections, &mut title)?;
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default().into_owned();
                if let Some(frame) = stack.last_mut() {
                    if frame.capturing_title {
                        title.get_or_insert_with(|| text.trim().to_string());
                    }
                    frame.buffer.push_str(&escape_text(&text));
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(frame) = stack.last_mut() {
                    frame
                        .buffer
                        .push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Ok(_) => {}
            Err(e) => return Err(BrokerError::InputInvalid(format!("malformed HTML: {e}"))),
        }
        buf.clear();
    }

    if sections.is_empty() {
        return Err(BrokerError::InputInvalid(
            "document has no clearance-tagged sections".into(),
        ));
    }

    let title = title.unwrap_or_else(|| fallback_title.to_string());
    let metadata: DocumentMeta = summarize(&sections, title, SourceFormat::Html);
    Ok(ParsedDocument {
        sections,
        metadata,
        original_bytes: None,
    })
}

fn push_frame(stack: &mut Vec<Frame>, e: &BytesStart, doc_order: &mut usize) -> Result<(), BrokerError> {
    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    let mut explicit_level = None;
    let mut explicit_id = None;
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().unwrap_or_default().into_owned();
        if key == "data-clearance" {
            explicit_level = Some(Clearance::from_label(&value).ok_or_else(|| {
                BrokerError::InputInvalid(format!("unknown clearance level: {value}"))
            })?);
        }
        if key == "id" {
            explicit_id = Some(value.clone());
        }
        attrs.push((key, value));
    }

    let section_id = explicit_level.map(|_| {
        let id = explicit_id.clone().unwrap_or_else(|| {
            *doc_order += 1;
            format!("section-{}", *doc_order)
        });
        id
    });

    stack.push(Frame {
        capturing_title: tag == "title",
        tag,
        attrs,
        explicit_clearance: explicit_level,
        section_id,
        buffer: String::new(),
    });
    Ok(())
}

fn close_frame(
    stack: &mut Vec<Frame>,
    sections: &mut Vec<ParsedSection>,
    title: &mut Option<String>,
) -> Result<(), BrokerError> {
    let frame = match stack.pop() {
        Some(f) => f,
        None => return Ok(()),
    };

    if frame.tag == "title" && title.is_none() {
        *title = Some(frame.buffer.trim().to_string());
    }

    if let Some(clearance) = frame.explicit_clearance {
        sections.push(ParsedSection {
            section_id: frame.section_id.unwrap_or_else(|| "section-0".into()),
            clearance,
            content: frame.buffer,
        });
        // Extracted sections are hived off: nothing bubbles to the parent.
        return Ok(());
    }

    // Untagged element: reconstruct its markup and fold into the parent
    // buffer so surrounding structure survives for the eventual renderer.
    if let Some(parent) = stack.last_mut() {
        if frame.tag != "#root" {
            parent.buffer.push_str(&render_element(&frame));
        } else {
            parent.buffer.push_str(&frame.buffer);
        }
    }
    Ok(())
}

fn render_element(frame: &Frame) -> String {
    let mut attrs = frame.attrs.clone();
    attrs.sort_by(|a, b| a.0.cmp(&b.0));
    let attr_str: String = attrs
        .iter()
        .map(|(k, v)| format!(" {k}=\"{v}\""))
        .collect();
    if is_void_element(&frame.tag) {
        format!("<{}{}/>", frame.tag, attr_str)
    } else {
        format!("<{}{}>{}</{}>", frame.tag, attr_str, frame.buffer, frame.tag)
    }
}

fn is_void_element(tag: &str) -> bool {
    matches!(
        tag,
        "br" | "hr" | "img" | "input" | "meta" | "link" | "source" | "wbr" | "area" | "base"
            | "col" | "embed" | "track"
    )
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_flat_sections_in_order() {
        let html = r#"<html><body>
            <div id="s1" data-clearance="INTERNAL">Welcome</div>
            <div id="s2" data-clearance="CONFIDENTIAL">Budget</div>
            <div id="s3" data-clearance="TOP-SECRET">Plans</div>
        </body></html>"#;
        let parsed = parse(html, "fallback").unwrap();
        assert_eq!(parsed.sections.len(), 3);
        assert_eq!(parsed.sections[0].section_id, "s1");
        assert_eq!(parsed.sections[0].clearance, Clearance::Internal);
        assert_eq!(parsed.sections[2].clearance, Clearance::TopSecret);
        assert_eq!(parsed.metadata.overall_classification, Clearance::TopSecret);
    }

    #[test]
    fn rejects_unknown_level() {
        let html = r#"<div data-clearance="ULTRA">x</div>"#;
        assert!(parse(html, "fallback").is_err());
    }

    #[test]
    fn rejects_document_with_no_sections() {
        let html = r#"<html><body><p>no tags here</p></body></html>"#;
        assert!(parse(html, "fallback").is_err());
    }

    #[test]
    fn nested_override_is_hived_off_as_its_own_section() {
        let html = r#"<div id="outer" data-clearance="INTERNAL">
            intro text
            <span id="inner" data-clearance="RESTRICTED">secret bit</span>
        </div>"#;
        let parsed = parse(html, "fallback").unwrap();
        assert_eq!(parsed.sections.len(), 2);
        assert_eq!(parsed.sections[0].section_id, "outer");
        assert!(!parsed.sections[0].content.contains("secret bit"));
        assert_eq!(parsed.sections[1].section_id, "inner");
        assert_eq!(parsed.sections[1].clearance, Clearance::Restricted);
    }
}
