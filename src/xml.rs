// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Small helpers shared by the quick-xml based parsers

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufRead;

use crate::Result;

/// A lenient reader over an in-memory document
pub(crate) fn reader(document: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(document);
    reader.trim_text(true);
    reader.check_end_names(false);
    reader
}

/// Local name of an element (`controls:control` → `control`)
pub(crate) fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

/// Value of an attribute, matched on its local name
pub(crate) fn attr(e: &BytesStart, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() == name.as_bytes() {
            Some(
                std::str::from_utf8(&a.value)
                    .map_err(quick_xml::Error::from)
                    .and_then(|s| quick_xml::escape::unescape(s).map_err(quick_xml::Error::from))
                    .map(|v| v.to_string())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).to_string()),
            )
        } else {
            None
        }
    })
}

/// All text inside the element whose start tag was just read, up to and
/// including its end tag. Text of child elements is included.
pub(crate) fn element_text<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>) -> Result<String> {
    let mut text = String::new();
    let mut depth = 0usize;
    loop {
        buf.clear();
        match reader.read_event_into(buf)? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Event::Text(t) => {
                let piece = t
                    .unescape()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).to_string());
                text.push_str(&piece);
            }
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(text.trim().to_string())
}

/// Unescape XML entities, keeping the raw text when it is malformed
pub(crate) fn unescape_lossy(value: &str) -> String {
    quick_xml::escape::unescape(value)
        .map(|v| v.to_string())
        .unwrap_or_else(|_| value.to_string())
}
