//! XML feed support.
//!
//! The document is folded into a JSON tree first: an element with neither
//! attributes nor children becomes its text, anything else becomes an object
//! where attributes are keyed `@name`, mixed text sits under `#text` and
//! repeated child elements collapse into an array. Rows are then read off a
//! dotted path whose first segment is the root element.

use quick_xml::encoding::Decoder;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde_json::{Map, Value};

use crate::services::parser::Row;

const TEXT_KEY: &str = "#text";

struct Frame {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>, decoder: Decoder) -> Result<Self, String> {
        let name = decoder
            .decode(start.name().as_ref())
            .map_err(|e| e.to_string())?
            .into_owned();
        let mut fields = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| format!("bad attribute on <{name}>: {e}"))?;
            let key = decoder
                .decode(attr.key.as_ref())
                .map_err(|e| format!("bad attribute name on <{name}>: {e}"))?;
            let raw = decoder
                .decode(&attr.value)
                .map_err(|e| format!("bad attribute value on <{name}>: {e}"))?;
            let value = unescape(&raw).map_err(|e| format!("bad attribute value on <{name}>: {e}"))?;
            fields.insert(format!("@{key}"), Value::String(value.into_owned()));
        }
        Ok(Self {
            name,
            fields,
            text: String::new(),
        })
    }

    fn close(self) -> (String, Value) {
        let Frame {
            name,
            mut fields,
            text,
        } = self;
        if fields.is_empty() {
            return (name, Value::String(text));
        }
        if !text.is_empty() {
            fields.insert(TEXT_KEY.to_string(), Value::String(text));
        }
        (name, Value::Object(fields))
    }
}

fn attach(fields: &mut Map<String, Value>, name: String, value: Value) {
    match fields.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(name, value);
        }
    }
}

/// Parses `body` into a single-key object `{root_name: root_value}`.
///
/// The body is decoded with the encoding named in the XML declaration
/// (UTF-8 when there is none); bytes that do not decode are an error.
pub fn to_tree(body: &[u8]) -> Result<Map<String, Value>, String> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut document = Map::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("at byte {}: {e}", reader.buffer_position()))?;
        let decoder = reader.decoder();
        match event {
            Event::Start(start) => stack.push(Frame::open(&start, decoder)?),
            Event::Empty(start) => {
                let (name, value) = Frame::open(&start, decoder)?.close();
                match stack.last_mut() {
                    Some(parent) => attach(&mut parent.fields, name, value),
                    None => attach(&mut document, name, value),
                }
            }
            Event::Text(content) => {
                let raw = decoder
                    .decode(&content)
                    .map_err(|e| format!("at byte {}: {e}", reader.buffer_position()))?;
                let content = unescape(&raw).map_err(|e| e.to_string())?;
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&content);
                }
            }
            Event::CData(content) => {
                let content = content.into_inner();
                let text = decoder
                    .decode(&content)
                    .map_err(|e| format!("at byte {}: {e}", reader.buffer_position()))?;
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text);
                }
            }
            Event::End(_) => {
                let Some(frame) = stack.pop() else {
                    return Err("closing tag without an open element".to_string());
                };
                let (name, value) = frame.close();
                match stack.last_mut() {
                    Some(parent) => attach(&mut parent.fields, name, value),
                    None => attach(&mut document, name, value),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(format!("document ended inside <{}>", open.name));
    }
    if document.is_empty() {
        return Err("document has no root element".to_string());
    }
    Ok(document)
}

/// Walks `row_path` and returns every element found there as a row.
///
/// Arrays met on the way are flattened, so a single row and many rows look
/// the same to the caller. A path that leads nowhere yields no rows.
pub fn extract_rows(body: &[u8], row_path: &str) -> Result<Vec<Row>, String> {
    let document = to_tree(body)?;

    let mut current = vec![Value::Object(document)];
    for segment in row_path.split('.').filter(|s| !s.is_empty()) {
        current = current
            .into_iter()
            .filter_map(|node| match node {
                Value::Object(mut fields) => fields.remove(segment),
                _ => None,
            })
            .flat_map(|node| match node {
                Value::Array(items) => items,
                other => vec![other],
            })
            .collect();
    }

    Ok(current.into_iter().map(into_row).collect())
}

fn into_row(node: Value) -> Row {
    match node {
        Value::Object(fields) => fields,
        Value::String(text) if text.is_empty() => Row::new(),
        other => {
            let mut row = Row::new();
            row.insert(TEXT_KEY.to_string(), other);
            row
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn repeated_children_collapse_into_array() {
        let tree = to_tree(b"<rows><row>a</row><row>b</row></rows>").unwrap();
        assert_eq!(Value::Object(tree), json!({"rows": {"row": ["a", "b"]}}));
    }

    #[test]
    fn attributes_and_mixed_text() {
        let tree = to_tree(br#"<price currency="EUR">9.50</price>"#).unwrap();
        assert_eq!(
            Value::Object(tree),
            json!({"price": {"@currency": "EUR", "#text": "9.50"}})
        );
    }

    #[test]
    fn nested_fields_stay_nested() {
        let rows = extract_rows(
            b"<rows><row><sku>A</sku><dims><w>1</w><h>2</h></dims></row></rows>",
            "rows.row",
        )
        .unwrap();
        assert_eq!(rows[0]["dims"], json!({"w": "1", "h": "2"}));
    }

    #[test]
    fn entities_and_cdata_are_decoded() {
        let rows = extract_rows(
            b"<rows><row><a>Fish &amp; Chips</a><b><![CDATA[<raw>]]></b></row></rows>",
            "rows.row",
        )
        .unwrap();
        assert_eq!(rows[0]["a"], "Fish & Chips");
        assert_eq!(rows[0]["b"], "<raw>");
    }

    #[test]
    fn missing_path_yields_no_rows() {
        let rows = extract_rows(b"<rows><other/></rows>", "rows.row").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn declared_latin1_encoding_is_decoded() {
        let rows = extract_rows(
            b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><rows><row><n>Caf\xe9</n></row></rows>",
            "rows.row",
        )
        .unwrap();
        assert_eq!(rows[0]["n"], "Caf\u{e9}");
    }

    #[test]
    fn undeclared_non_utf8_bytes_are_rejected() {
        assert!(to_tree(b"<rows><row><n>Caf\xe9</n></row></rows>").is_err());
    }

    #[test]
    fn unterminated_document_is_rejected() {
        assert!(to_tree(b"<rows><row>").is_err());
    }
}
