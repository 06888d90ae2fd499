//! Atom-feed decoder for Statline OData responses.
//!
//! Each `<entry>` carries a `<content><m:properties>` block with one typed
//! element per remote field. The decoder pulls out the text of every element
//! named in the entity's mapping table, in document order, and leaves absent
//! or `m:null="true"` properties as `None`. Type coercion is NOT done here;
//! the decoder hands out strings and `TypedRecord::from_raw` coerces them.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::error::EtlError;
use super::schema::EntityKind;

/// One decoded `<entry>`: an `Option<String>` per mapped field, aligned
/// with the entity's `fields()` order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord(pub Vec<Option<String>>);

/// Decode every `<entry>` of one feed page. A document that fails to parse
/// aborts the whole page; no partial records are returned.
pub fn decode_entries(xml: &[u8], kind: EntityKind) -> Result<Vec<RawRecord>, EtlError> {
    let fields = kind.fields();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::with_capacity(4096);

    let mut records = Vec::new();
    let mut in_entry = false;
    let mut in_properties = false;
    let mut current: Vec<Option<String>> = Vec::new();
    let mut active_field: Option<usize> = None;
    let mut active_null = false;
    let mut text = String::new();

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,

            Event::Start(e) => {
                let name = e.local_name();
                let local = name.as_ref();
                if local == b"entry" {
                    in_entry = true;
                    current = vec![None; fields.len()];
                } else if in_entry && local == b"properties" {
                    in_properties = true;
                } else if in_properties {
                    if let Some(idx) = field_index(fields, local) {
                        active_field = Some(idx);
                        active_null = is_null_marked(&e)?;
                        text.clear();
                    }
                }
            }

            // Self-closing property (<d:Description/> or m:null="true"):
            // the field stays None, matching an absent element.
            Event::Empty(_) => {}

            Event::Text(e) => {
                if active_field.is_some() {
                    text.push_str(&e.unescape()?);
                }
            }

            Event::End(e) => {
                let name = e.local_name();
                let local = name.as_ref();
                if local == b"entry" {
                    in_entry = false;
                    in_properties = false;
                    records.push(RawRecord(std::mem::take(&mut current)));
                } else if local == b"properties" {
                    in_properties = false;
                } else if let Some(idx) = active_field {
                    if field_index(fields, local) == Some(idx) {
                        if !active_null && !text.is_empty() {
                            current[idx] = Some(std::mem::take(&mut text));
                        } else {
                            text.clear();
                        }
                        active_field = None;
                        active_null = false;
                    }
                }
            }

            _ => {}
        }
    }

    Ok(records)
}

fn field_index(fields: &[super::schema::FieldSpec], local: &[u8]) -> Option<usize> {
    fields.iter().position(|f| f.remote.as_bytes() == local)
}

fn is_null_marked(e: &BytesStart<'_>) -> Result<bool, EtlError> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.local_name().as_ref() == b"null" {
            return Ok(attr.unescape_value()?.as_ref() == "true");
        }
    }
    Ok(false)
}
