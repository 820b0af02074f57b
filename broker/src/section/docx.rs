//! DOCX section parser (C4): walks `document.xml` inside the OOXML ZIP
//! container looking for Content Controls (`w:sdt`) tagged `clearance:LEVEL`.

use super::{summarize, DocumentMeta, ParsedDocument, ParsedSection, SourceFormat};
use crate::classification::Clearance;
use crate::error::BrokerError;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::Read;

const DOCUMENT_XML: &str = "word/document.xml";
const TAG_PREFIX: &str = "clearance:";

#[derive(Default)]
struct SdtFrame {
    tag_value: Option<String>,
    sdt_id: Option<String>,
    buffer: String,
    in_content: bool,
}

pub fn read_document_xml(bytes: &[u8]) -> Result<String, BrokerError> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|e| BrokerError::InputInvalid(format!("not a valid DOCX/ZIP container: {e}")))?;
    let mut entry = archive
        .by_name(DOCUMENT_XML)
        .map_err(|_| BrokerError::InputInvalid(format!("missing {DOCUMENT_XML}")))?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| BrokerError::InputInvalid(format!("malformed {DOCUMENT_XML}: {e}")))?;
    Ok(xml)
}

pub fn parse(bytes: &[u8], fallback_title: &str) -> Result<ParsedDocument, BrokerError> {
    let xml = read_document_xml(bytes)?;

    let mut reader = Reader::from_str(&xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut sdt_stack: Vec<SdtFrame> = Vec::new();
    let mut sections: Vec<ParsedSection> = Vec::new();
    let mut title: Option<String> = None;
    let mut title_depth: Option<usize> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    "w:sdt" => sdt_stack.push(SdtFrame::default()),
                    "w:sdtContent" => {
                        if let Some(top) = sdt_stack.last_mut() {
                            top.in_content = true;
                        }
                    }
                    "w:tag" => {
                        if let Some(val) = attr_value(&e, "w:val") {
                            if let Some(top) = sdt_stack.last_mut() {
                                top.tag_value = Some(val);
                            }
                        }
                    }
                    "w:id" => {
                        if let Some(val) = attr_value(&e, "w:val") {
                            if let Some(top) = sdt_stack.last_mut() {
                                top.sdt_id = Some(val);
                            }
                        }
                    }
                    "dc:title" | "w:title" => {
                        title_depth = Some(0);
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default().into_owned();
                if let Some(top) = sdt_stack.last_mut() {
                    if top.in_content {
                        top.buffer.push_str(&text);
                    }
                }
                if title_depth.is_some() && title.is_none() {
                    title = Some(text.trim().to_string());
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    "w:sdtContent" => {
                        if let Some(top) = sdt_stack.last_mut() {
                            top.in_content = false;
                        }
                    }
                    "w:sdt" => {
                        if let Some(frame) = sdt_stack.pop() {
                            if let Some(tag) = &frame.tag_value {
                                if let Some(level) = tag.strip_prefix(TAG_PREFIX) {
                                    let clearance = Clearance::from_label(level).ok_or_else(|| {
                                        BrokerError::InputInvalid(format!(
                                            "unknown clearance level in content control tag: {tag}"
                                        ))
                                    })?;
                                    let section_id = format!(
                                        "{}/{}",
                                        frame.sdt_id.unwrap_or_else(|| "0".into()),
                                        tag
                                    );
                                    sections.push(ParsedSection {
                                        section_id,
                                        clearance,
                                        content: frame.buffer,
                                    });
                                }
                            }
                        }
                    }
                    _ => {}
                }
                title_depth = None;
            }
            Ok(_) => {}
            Err(e) => {
                return Err(BrokerError::InputInvalid(format!(
                    "malformed {DOCUMENT_XML}: {e}"
                )))
            }
        }
        buf.clear();
    }

    if sections.is_empty() {
        return Err(BrokerError::InputInvalid(
            "DOCX has no clearance-tagged content controls".into(),
        ));
    }

    let title = title.unwrap_or_else(|| fallback_title.to_string());
    let metadata: DocumentMeta = summarize(&sections, title, SourceFormat::Docx);
    Ok(ParsedDocument {
        sections,
        metadata,
        original_bytes: Some(bytes.to_vec()),
    })
}

fn attr_value(e: &quick_xml::events::BytesStart, key: &str) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        if attr.key.as_ref() == key.as_bytes() {
            Some(attr.unescape_value().unwrap_or_default().into_owned())
        } else {
            None
        }
    })
}
