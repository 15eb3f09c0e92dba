//! Plain-text extraction from MediaWiki-rendered HTML.
//!
//! Section bodies come back from `action=parse` as an HTML fragment. This
//! module walks it as a tolerant tag stream (via `quick-xml` with end-name
//! checks off) and keeps only prose: citation markers, edit links, infoboxes,
//! navigation boxes, tables, thumbnails, galleries, and style/script content
//! are dropped wholesale, and whitespace runs collapse to single spaces.
//!
//! Inline math is kept as its LaTeX source (the `alt` text of the fallback
//! image) so formulas survive into the lesson prompt.

use quick_xml::escape::resolve_html5_entity;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;

/// Extraction error. Callers attach the section index.
#[derive(Debug)]
pub enum ExtractError {
    Markup(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Markup(e) => write!(f, "malformed markup: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Elements removed together with everything inside them.
const DROPPED_TAGS: &[&[u8]] = &[b"style", b"script", b"table", b"figure"];

/// Class tokens marking non-prose blocks. `reference` only counts on `<sup>`.
const DROPPED_CLASSES: &[&str] = &[
    "mw-editsection",
    "infobox",
    "navbox",
    "thumb",
    "gallery",
    "mwe-math-mathml-inline",
    "mwe-math-mathml-display",
];

/// Elements that never have a closing tag in HTML.
const VOID_TAGS: &[&[u8]] = &[
    b"area", b"base", b"br", b"col", b"embed", b"hr", b"img", b"input", b"link", b"meta",
    b"source", b"track", b"wbr",
];

/// Elements whose boundaries separate words.
const BLOCK_TAGS: &[&[u8]] = &[
    b"p", b"div", b"br", b"li", b"ul", b"ol", b"dl", b"dd", b"dt", b"h1", b"h2", b"h3", b"h4",
    b"h5", b"h6", b"blockquote", b"pre", b"section", b"tr", b"td", b"th",
];

/// Extract the prose of a section body.
pub fn section_text(html: &str) -> Result<String, ExtractError> {
    walk(html, true)
}

/// Strip all tags from a short inline fragment (search snippets, section
/// headings). Never fails: unreadable markup is returned with whitespace
/// collapsed.
pub fn inline_text(html: &str) -> String {
    walk(html, false).unwrap_or_else(|_| collapse_whitespace(html))
}

/// Collapse every whitespace run to a single space and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn walk(html: &str, drop_non_prose: bool) -> Result<String, ExtractError> {
    let mut reader = Reader::from_str(html);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;
    config.trim_text(false);

    let mut out = String::with_capacity(html.len() / 2);
    // Depth inside a dropped element; 0 means we are emitting text.
    let mut skip_depth = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ExtractError::Markup(e.to_string()))?;
        match event {
            Event::Start(e) => {
                let name = lowercase_name(&e);
                let void = VOID_TAGS.contains(&name.as_slice());
                if skip_depth > 0 {
                    if !void {
                        skip_depth += 1;
                    }
                    continue;
                }
                if drop_non_prose && is_dropped(&name, &e) {
                    if !void {
                        skip_depth = 1;
                    }
                    continue;
                }
                open_element(&name, &e, &mut out);
            }
            Event::Empty(e) => {
                if skip_depth > 0 {
                    continue;
                }
                let name = lowercase_name(&e);
                if drop_non_prose && is_dropped(&name, &e) {
                    continue;
                }
                open_element(&name, &e, &mut out);
            }
            Event::End(e) => {
                if skip_depth > 0 {
                    skip_depth -= 1;
                    continue;
                }
                let name = e.local_name().as_ref().to_ascii_lowercase();
                if BLOCK_TAGS.contains(&name.as_slice()) {
                    out.push(' ');
                }
            }
            Event::Text(text) if skip_depth == 0 => {
                let raw = String::from_utf8_lossy(&text);
                out.push_str(&unescape_html(&raw));
            }
            Event::CData(data) if skip_depth == 0 => {
                out.push_str(&String::from_utf8_lossy(&data));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(collapse_whitespace(&out))
}

fn lowercase_name(e: &BytesStart<'_>) -> Vec<u8> {
    e.local_name().as_ref().to_ascii_lowercase()
}

fn open_element(name: &[u8], e: &BytesStart<'_>, out: &mut String) {
    if BLOCK_TAGS.contains(&name) {
        out.push(' ');
    }
    if name == b"img" && has_class_prefix(e, "mwe-math-fallback-image") {
        if let Some(alt) = attribute(e, b"alt") {
            out.push(' ');
            out.push_str(&latex_from_alt(&alt));
            out.push(' ');
        }
    }
}

fn is_dropped(name: &[u8], e: &BytesStart<'_>) -> bool {
    if DROPPED_TAGS.contains(&name) {
        return true;
    }
    let Some(class) = attribute(e, b"class") else {
        return false;
    };
    class.split_whitespace().any(|token| {
        DROPPED_CLASSES.contains(&token) || (name == b"sup" && token == "reference")
    })
}

fn has_class_prefix(e: &BytesStart<'_>, prefix: &str) -> bool {
    attribute(e, b"class")
        .map(|class| class.split_whitespace().any(|t| t.starts_with(prefix)))
        .unwrap_or(false)
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .with_checks(false)
        .filter_map(Result::ok)
        .find(|a| a.key.as_ref() == key)
        .map(|a| unescape_html(&String::from_utf8_lossy(&a.value)).into_owned())
}

/// MediaWiki renders math alt text as `{\displaystyle ...}`.
fn latex_from_alt(alt: &str) -> String {
    let trimmed = alt.trim();
    trimmed
        .strip_prefix("{\\displaystyle")
        .and_then(|rest| rest.strip_suffix('}'))
        .map(|inner| inner.trim().to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Longest reference scanned for a closing `;`.
const MAX_REFERENCE_LEN: usize = 40;

/// Decode character references one at a time. Unknown or malformed
/// references stay literal without affecting their neighbours.
fn unescape_html(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match push_reference(tail, &mut out) {
            Some(len) => rest = &tail[len..],
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Push the decoded value of the reference at the start of `tail` and
/// return its length, or `None` if it does not decode.
fn push_reference(tail: &str, out: &mut String) -> Option<usize> {
    let end = tail.bytes().take(MAX_REFERENCE_LEN).position(|b| b == b';')?;
    let name = tail.get(1..end).filter(|name| !name.is_empty())?;
    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse::<u32>().ok()?,
        };
        out.push(char::from_u32(code).filter(|c| *c != '\0')?);
    } else {
        if !name.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        let value = local_entity(name)
            .or_else(|| resolve_html5_entity(name).filter(|value| is_intact(value)))?;
        out.push_str(value);
    }
    Some(end + 1)
}

/// ASCII entities, plus the ones flattened differently from their HTML5
/// value: no-break space becomes a plain space and formatting characters
/// vanish.
fn local_entity(name: &str) -> Option<&'static str> {
    let value = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "excl" => "!",
        "num" => "#",
        "dollar" => "$",
        "percnt" => "%",
        "lpar" => "(",
        "rpar" => ")",
        "ast" => "*",
        "plus" => "+",
        "comma" => ",",
        "period" => ".",
        "sol" => "/",
        "colon" => ":",
        "semi" => ";",
        "equals" => "=",
        "quest" => "?",
        "commat" => "@",
        "lsqb" | "lbrack" => "[",
        "bsol" => "\\",
        "rsqb" | "rbrack" => "]",
        "lowbar" => "_",
        "grave" => "`",
        "lcub" | "lbrace" => "{",
        "verbar" | "vert" => "|",
        "rcub" | "rbrace" => "}",
        "nbsp" => " ",
        "shy" | "zwj" | "zwnj" | "lrm" | "rlm" => "",
        _ => return None,
    };
    Some(value)
}

/// quick-xml 0.36 truncates HTML5 code points written with three or five hex
/// digits (`&Alpha;` comes back as `9`). Those land below U+00A0 or in
/// U+1D00..U+1DFF, where no other HTML5 entity maps to a single character.
fn is_intact(value: &str) -> bool {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c >= '\u{A0}' && !('\u{1D00}'..='\u{1DFF}').contains(&c),
        _ => true,
    }
}
