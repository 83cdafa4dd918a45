//! Tolerant markup scanning.
//!
//! Filings span two decades of filer tooling and are not reliably
//! well-formed, so nothing here builds a tree. Elements are located by tag
//! name with plain string search; every lookup degrades to `None` rather
//! than failing the document.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Root element of an ownership document.
pub const OWNERSHIP_ROOT: &str = "ownershipDocument";

static NAMESPACE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(/?)[A-Za-z_][A-Za-z0-9_.\-]*:([A-Za-z_])").expect("namespace regex")
});

static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));

/// Remove namespace prefixes from every start and end tag.
///
/// `<edgar:value>` becomes `<value>`; declarations, comments, and
/// processing instructions are left alone.
pub fn strip_namespaces(text: &str) -> Cow<'_, str> {
    NAMESPACE_PREFIX.replace_all(text, "<$1$2")
}

/// Position of an opening tag: `(tag_start, content_start, self_closing)`.
fn find_open(text: &str, tag: &str, from: usize) -> Option<(usize, usize, bool)> {
    let needle = format!("<{tag}");
    let mut search = from;
    while search <= text.len() {
        let start = search + text[search..].find(&needle)?;
        let after = start + needle.len();
        match text[after..].chars().next() {
            Some('>') => return Some((start, after + 1, false)),
            Some(c) if c.is_whitespace() || c == '/' => {
                let close = after + text[after..].find('>')?;
                let self_closing = text[..close].ends_with('/');
                return Some((start, close + 1, self_closing));
            }
            // A longer tag sharing this prefix, e.g. `<valueX`.
            _ => search = after,
        }
    }
    None
}

/// One located element: byte offset of its start tag and its inner text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
    pub offset: usize,
    pub inner: &'a str,
}

fn element_from<'a>(text: &'a str, tag: &str, from: usize) -> Option<(Element<'a>, usize)> {
    let (start, content, self_closing) = find_open(text, tag, from)?;
    if self_closing {
        return Some((
            Element {
                offset: start,
                inner: "",
            },
            content,
        ));
    }
    let closing = format!("</{tag}>");
    match text[content..].find(&closing) {
        Some(rel) => {
            let end = content + rel;
            Some((
                Element {
                    offset: start,
                    inner: &text[content..end],
                },
                end + closing.len(),
            ))
        }
        None => {
            // Unclosed element: take text up to the next tag.
            let end = text[content..]
                .find('<')
                .map(|rel| content + rel)
                .unwrap_or(text.len());
            Some((
                Element {
                    offset: start,
                    inner: &text[content..end],
                },
                end,
            ))
        }
    }
}

/// First element named `tag`, if any.
pub fn find_element<'a>(text: &'a str, tag: &str) -> Option<Element<'a>> {
    element_from(text, tag, 0).map(|(el, _)| el)
}

/// Inner text of the first element named `tag`, markup included.
pub fn element_inner<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    find_element(text, tag).map(|el| el.inner)
}

/// Every non-overlapping element named `tag`, in document order.
pub fn elements<'a>(text: &'a str, tag: &str) -> Vec<Element<'a>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some((el, next)) = element_from(text, tag, pos) {
        out.push(el);
        if next <= pos {
            break;
        }
        pos = next;
    }
    out
}

/// Text value of a field inside `block`.
///
/// Accepts both `<tag>text</tag>` and the wrapped `<tag><value>text</value></tag>`
/// shape. Nested markup such as footnote references is dropped and entities
/// are decoded. Empty values are `None`.
pub fn extract_field(block: &str, tag: &str) -> Option<String> {
    let inner = element_inner(block, tag)?;
    let raw = element_inner(inner, "value").unwrap_or(inner);
    let text = ANY_TAG.replace_all(raw, "");
    let decoded = decode_entities(text.trim());
    let trimmed = decoded.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Decode the predefined XML entities and numeric character references.
///
/// Unknown entities are kept verbatim.
pub fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|&semi| semi <= 10).and_then(|semi| {
            let name = &tail[1..semi];
            let ch = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => name
                    .strip_prefix("#x")
                    .or_else(|| name.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| name.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Parse a numeric field, tolerating thousands separators and a leading `$`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | ' '))
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Whether `text` contains an ownership document root, with or without a prefix.
pub fn has_ownership_root(text: &str) -> bool {
    find_element(&strip_namespaces(text), OWNERSHIP_ROOT).is_some()
}
