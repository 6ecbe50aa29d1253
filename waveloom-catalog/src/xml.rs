//! Flat SAX walk over an Ampache XML reply, grounded on the element/attribute
//! vocabulary `AmpacheServer::networkFinished` collects: a fixed set of
//! "wanted" leaf elements, two of which (`tag`, `genre`) are multi-valued and
//! get joined with `|` into a pluralized field on the enclosing record.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

const WANTED_ELEMENTS: &[&str] = &[
    "album", "art", "artist", "flag", "name", "tag", "genre", "time", "title", "track", "url", "year",
];
const MULTI_ELEMENTS: &[&str] = &["tag", "genre"];

#[derive(Debug, Default)]
pub struct ParsedReply {
    pub results: Vec<HashMap<String, String>>,
    pub auth: Option<String>,
    pub api_raw: Option<String>,
    pub songs: Option<i64>,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
}

/// Walks `xml`, collecting one result record per occurrence of
/// `primary_element` (the element whose `id` attribute identifies a song,
/// artist, album, playlist, etc. for this operation), plus the handshake
/// fields when `is_handshake` is set.
pub fn parse_reply(xml: &[u8], primary_element: &str, is_handshake: bool) -> crate::error::Result<ParsedReply> {
    let mut reader = Reader::from_reader(xml);

    let mut reply = ParsedReply::default();
    let mut current_element = String::new();
    let mut current_result: Option<HashMap<String, String>> = None;
    let mut multi_values: HashMap<String, Vec<String>> = HashMap::new();

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,

            Event::Start(e) | Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                current_element = name.clone();

                if name == "error" {
                    for attr in e.attributes().flatten() {
                        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                        if key == "code" || key == "errorCode" {
                            if let Ok(value) = attr.unescape_value() {
                                reply.error_code = value.parse().ok();
                            }
                        }
                    }
                }

                if name == primary_element {
                    let mut result = HashMap::new();
                    multi_values.clear();
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"id" {
                            if let Ok(value) = attr.unescape_value() {
                                result.insert("id".to_string(), value.into_owned());
                            }
                        }
                    }
                    current_result = Some(result);
                }
            }

            Event::Text(t) => {
                let text = t.unescape()?.trim().to_string();
                if text.is_empty() {
                    continue;
                }

                if current_element == "error" || current_element == "errorMessage" {
                    reply.error_message = Some(text.clone());
                }

                if is_handshake {
                    match current_element.as_str() {
                        "auth" => reply.auth = Some(text),
                        "api" => reply.api_raw = Some(text),
                        "songs" => reply.songs = text.parse().ok(),
                        _ => {}
                    }
                } else if WANTED_ELEMENTS.contains(&current_element.as_str()) {
                    if MULTI_ELEMENTS.contains(&current_element.as_str()) {
                        multi_values.entry(current_element.clone()).or_default().push(text);
                    } else if let Some(result) = current_result.as_mut() {
                        result.insert(current_element.clone(), text);
                    }
                }
            }

            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == primary_element {
                    if let Some(mut result) = current_result.take() {
                        for element in MULTI_ELEMENTS {
                            if let Some(values) = multi_values.remove(*element) {
                                result.insert(format!("{element}s"), values.join("|"));
                            }
                        }
                        if !result.is_empty() {
                            reply.results.push(result);
                        }
                    }
                }
                current_element.clear();
            }

            _ => {}
        }
        buf.clear();
    }

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_handshake_reply() {
        let xml = br#"<?xml version="1.0"?>
            <root><auth>abc123</auth><api>6.0.0</api><songs>42</songs></root>"#;
        let reply = parse_reply(xml, "song", true).unwrap();
        assert_eq!(reply.auth.as_deref(), Some("abc123"));
        assert_eq!(reply.api_raw.as_deref(), Some("6.0.0"));
        assert_eq!(reply.songs, Some(42));
    }

    #[test]
    fn collects_one_record_per_primary_element_with_multivalued_tags() {
        let xml = br#"<root>
            <song id="1">
                <title>A Song</title>
                <artist>An Artist</artist>
                <tag>rock</tag>
                <tag>live</tag>
            </song>
            <song id="2">
                <title>Another Song</title>
            </song>
        </root>"#;
        let reply = parse_reply(xml, "song", false).unwrap();
        assert_eq!(reply.results.len(), 2);
        assert_eq!(reply.results[0].get("id").map(String::as_str), Some("1"));
        assert_eq!(reply.results[0].get("title").map(String::as_str), Some("A Song"));
        assert_eq!(reply.results[0].get("tags").map(String::as_str), Some("rock|live"));
        assert_eq!(reply.results[1].get("title").map(String::as_str), Some("Another Song"));
    }

    #[test]
    fn surfaces_error_code_and_message() {
        let xml = br#"<root><error code="401">Session Expired</error></root>"#;
        let reply = parse_reply(xml, "song", false).unwrap();
        assert_eq!(reply.error_code, Some(401));
        assert_eq!(reply.error_message.as_deref(), Some("Session Expired"));
    }
}
