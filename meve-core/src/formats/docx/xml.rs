//! String-level patches for the OOXML parts the marker touches.
//!
//! These parts are small and machine-written, so a tag scanner is enough.
//! Every function returns the patched document and leaves unrelated markup
//! exactly as it was.

use crate::error::{MeveError, Result};

/// Format ID shared by all user-defined custom properties.
pub const CUSTOM_FMTID: &str = "{D5CDD505-2E9C-101B-9397-08002B2CF9AE}";

pub const PROPERTY_NAME: &str = "meve_marker";

pub const CUSTOM_PROPERTIES_NS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/custom-properties";
pub const VT_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/docPropsVTypes";
pub const CUSTOM_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.custom-properties+xml";
pub const CUSTOM_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/custom-properties";

/// First `pid` Office allows for user properties.
const MIN_PID: u32 = 2;

/// An element start tag found in a document.
#[derive(Debug, Clone, Copy)]
struct Tag<'a> {
    start: usize,
    /// Offset just past `>`.
    end: usize,
    text: &'a str,
}

impl<'a> Tag<'a> {
    fn self_closing(&self) -> bool {
        self.text.ends_with("/>")
    }

    fn attr(&self, name: &str) -> Option<&'a str> {
        attributes(self.text).find(|(key, _)| *key == name).map(|(_, v)| v)
    }
}

/// Start tags named exactly `name` (no namespace prefix), in document order.
fn tags<'a>(xml: &'a str, name: &'a str) -> impl Iterator<Item = Tag<'a>> + 'a {
    let open = format!("<{name}");
    let mut from = 0;
    std::iter::from_fn(move || loop {
        let start = from + xml.get(from..)?.find(open.as_str())?;
        let after = start + open.len();
        from = after;
        match xml[after..].chars().next() {
            Some(c) if c.is_whitespace() || c == '>' || c == '/' => {}
            _ => continue,
        }
        let end = after + xml[after..].find('>')? + 1;
        from = end;
        return Some(Tag {
            start,
            end,
            text: &xml[start..end],
        });
    })
}

/// `key="value"` pairs of a start tag.
fn attributes(tag: &str) -> impl Iterator<Item = (&str, &str)> {
    let mut rest = tag
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim_end_matches('/');
    // skip the element name
    rest = rest
        .find(char::is_whitespace)
        .map_or("", |i| &rest[i..]);
    std::iter::from_fn(move || {
        let eq = rest.find('=')?;
        let key = rest[..eq].trim();
        let value_part = rest[eq + 1..].trim_start();
        let quote = value_part.chars().next().filter(|q| *q == '"' || *q == '\'')?;
        let close = value_part[1..].find(quote)? + 1;
        let value = &value_part[1..close];
        rest = &value_part[close + 1..];
        Some((key, value))
    })
}

/// Byte range of the first `<property name="...">...</property>` element.
fn find_property(xml: &str, name: &str) -> Option<(usize, usize)> {
    let tag = tags(xml, "property").find(|t| t.attr("name") == Some(name))?;
    if tag.self_closing() {
        return Some((tag.start, tag.end));
    }
    let close = "</property>";
    let end = tag.end + xml[tag.end..].find(close)? + close.len();
    Some((tag.start, end))
}

/// Text of the `meve_marker` property element, if present.
pub fn marker_property(xml: &str) -> Option<&str> {
    find_property(xml, PROPERTY_NAME).map(|(start, end)| &xml[start..end])
}

/// Highest `pid` among existing properties, or `None` when there are none.
pub fn max_pid(xml: &str) -> Option<u32> {
    tags(xml, "property")
        .filter_map(|t| t.attr("pid")?.parse::<u32>().ok())
        .max()
}

pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Fresh `docProps/custom.xml` with no properties.
pub fn empty_custom_properties() -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <Properties xmlns=\"{CUSTOM_PROPERTIES_NS}\" xmlns:vt=\"{VT_NS}\"></Properties>"
    )
}

fn marker_element(pid: u32, token: &str) -> String {
    format!(
        "<property fmtid=\"{CUSTOM_FMTID}\" pid=\"{pid}\" name=\"{PROPERTY_NAME}\">\
         <vt:lpwstr>{}</vt:lpwstr></property>",
        escape_xml(token)
    )
}

/// Make sure the root declares the `vt` prefix used by the property value.
fn ensure_vt_namespace(xml: String) -> Result<String> {
    let root = tags(&xml, "Properties")
        .next()
        .ok_or_else(|| MeveError::MalformedContainer("custom.xml has no Properties root".into()))?;
    if root.attr("xmlns:vt").is_some() {
        return Ok(xml);
    }
    let insert_at = root.start + "<Properties".len();
    let mut out = xml;
    out.insert_str(insert_at, &format!(" xmlns:vt=\"{VT_NS}\""));
    Ok(out)
}

/// Set the `meve_marker` property to `token`, leaving exactly one such property.
///
/// An existing property keeps its `pid`; a new one gets max existing + 1
/// (at least 2).
pub fn upsert_marker_property(xml: &str, token: &str) -> Result<String> {
    let mut doc = xml.to_string();
    let existing_pid = tags(&doc, "property")
        .find(|t| t.attr("name") == Some(PROPERTY_NAME))
        .and_then(|t| t.attr("pid")?.parse::<u32>().ok());

    // Strip every copy; re-insert a single one below.
    let mut first_at = None;
    while let Some((start, end)) = find_property(&doc, PROPERTY_NAME) {
        doc.replace_range(start..end, "");
        first_at.get_or_insert(start);
    }

    let pid = match existing_pid {
        Some(pid) => pid,
        None => match max_pid(&doc) {
            None => MIN_PID,
            Some(p) => p.checked_add(1).ok_or_else(|| {
                MeveError::MalformedContainer("custom property pid out of range".into())
            })?.max(MIN_PID),
        },
    };
    let element = marker_element(pid, token);

    match first_at {
        Some(at) => doc.insert_str(at, &element),
        None => {
            if let Some(close) = doc.rfind("</Properties>") {
                doc.insert_str(close, &element);
            } else {
                let root = tags(&doc, "Properties")
                    .next()
                    .filter(Tag::self_closing)
                    .ok_or_else(|| {
                        MeveError::MalformedContainer("custom.xml has no Properties root".into())
                    })?;
                let (start, end) = (root.start, root.end);
                let open = root.text.trim_end_matches('>').trim_end_matches('/').trim_end();
                let replacement = format!("{open}>{element}</Properties>");
                doc.replace_range(start..end, &replacement);
            }
        }
    }
    ensure_vt_namespace(doc)
}

/// Add the content-type override for `docProps/custom.xml` if missing.
pub fn ensure_content_type_override(xml: &str) -> Result<String> {
    let present = tags(xml, "Override").any(|t| t.attr("PartName") == Some("/docProps/custom.xml"));
    if present {
        return Ok(xml.to_string());
    }
    let close = xml
        .rfind("</Types>")
        .ok_or_else(|| MeveError::MalformedContainer("[Content_Types].xml has no Types root".into()))?;
    let mut out = xml.to_string();
    out.insert_str(
        close,
        &format!("<Override PartName=\"/docProps/custom.xml\" ContentType=\"{CUSTOM_CONTENT_TYPE}\"/>"),
    );
    Ok(out)
}

/// Add a package relationship to `docProps/custom.xml` if missing.
pub fn ensure_custom_relationship(xml: &str) -> Result<String> {
    let rels: Vec<Tag<'_>> = tags(xml, "Relationship").collect();
    if rels.iter().any(|t| t.attr("Type") == Some(CUSTOM_REL_TYPE)) {
        return Ok(xml.to_string());
    }
    let next_id = rels
        .iter()
        .filter_map(|t| t.attr("Id")?.strip_prefix("rId")?.parse::<u32>().ok())
        .max()
        .map_or(1, |n| n + 1);
    let close = xml.rfind("</Relationships>").ok_or_else(|| {
        MeveError::MalformedContainer("_rels/.rels has no Relationships root".into())
    })?;
    let mut out = xml.to_string();
    out.insert_str(
        close,
        &format!(
            "<Relationship Id=\"rId{next_id}\" Type=\"{CUSTOM_REL_TYPE}\" Target=\"docProps/custom.xml\"/>"
        ),
    );
    Ok(out)
}
