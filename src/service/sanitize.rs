//! Output sanitization for generated markup.

/// Cleans model output before it reaches a client or the result cache.
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, text: &str) -> String;
}

/// Elements removed together with their content.
const STRIPPED_ELEMENTS: [&str; 3] = ["script", "style", "iframe"];

/// Strips active content from HTML while leaving ordinary markup alone.
///
/// - `<script>`, `<style>` and `<iframe>` elements are removed with their content;
/// - `on*` event-handler attributes are dropped;
/// - attributes whose value is a `javascript:` URL are dropped.
///
/// Matching is case-insensitive. Plain text passes through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupSanitizer;

impl Sanitizer for MarkupSanitizer {
    fn sanitize(&self, text: &str) -> String {
        if !text.contains('<') {
            return text.to_owned();
        }
        let mut cleaned = text.to_owned();
        for name in STRIPPED_ELEMENTS {
            cleaned = remove_element(&cleaned, name);
        }
        rewrite_tags(&cleaned)
    }
}

/// Remove every `<name ...>...</name>` element, content included.
///
/// An element that is never closed runs to the end of the input.
fn remove_element(input: &str, name: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `input`.
    let lower = input.to_ascii_lowercase();
    let open = format!("<{name}");
    let close = format!("</{name}");

    let mut out = String::with_capacity(input.len());
    let mut pos = 0;
    while let Some(found) = lower[pos..].find(&open) {
        let start = pos + found;
        let after = start + open.len();
        let at_boundary = lower[after..]
            .chars()
            .next()
            .is_none_or(|c| c == '>' || c == '/' || c.is_whitespace());
        if !at_boundary {
            out.push_str(&input[pos..after]);
            pos = after;
            continue;
        }
        out.push_str(&input[pos..start]);

        let open_end = lower[after..].find('>').map(|gt| after + gt);
        pos = match open_end {
            Some(gt) if lower[..gt].ends_with('/') => gt + 1,
            Some(gt) => match lower[gt..].find(&close) {
                Some(c) => {
                    let close_start = gt + c;
                    lower[close_start..]
                        .find('>')
                        .map_or(input.len(), |g| close_start + g + 1)
                }
                None => input.len(),
            },
            None => input.len(),
        };
    }
    out.push_str(&input[pos..]);
    out
}

/// Rebuild every opening tag without its dangerous attributes.
fn rewrite_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(lt) = rest.find('<') {
        out.push_str(&rest[..lt]);
        let tail = &rest[lt..];
        let opens_element = tail[1..].starts_with(|c: char| c.is_ascii_alphabetic());
        match tag_end(tail) {
            Some(end) if opens_element => {
                out.push_str(&clean_tag(&tail[..=end]));
                rest = &tail[end + 1..];
            }
            _ => {
                out.push('<');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Byte index of the `>` closing the tag that starts `tag`, skipping quoted values.
fn tag_end(tag: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in tag.char_indices().skip(1) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '>' => return Some(i),
            None => {}
        }
    }
    None
}

/// `tag` spans `<` through `>` of one opening tag.
fn clean_tag(tag: &str) -> String {
    let inner = &tag[1..tag.len() - 1];
    let (inner, self_closing) = match inner.strip_suffix('/') {
        Some(inner) => (inner, true),
        None => (inner, false),
    };
    let name_end = inner.find(char::is_whitespace).unwrap_or(inner.len());
    let (name, mut attrs) = inner.split_at(name_end);

    let mut out = format!("<{name}");
    loop {
        attrs = attrs.trim_start();
        if attrs.is_empty() {
            break;
        }
        let name_len = attrs
            .find(|c: char| c.is_whitespace() || c == '=')
            .unwrap_or(attrs.len());
        let attr_name = &attrs[..name_len];
        let mut remaining = &attrs[name_len..];
        let mut value = None;

        let after_name = remaining.trim_start();
        if let Some(v) = after_name.strip_prefix('=') {
            let v = v.trim_start();
            let (val, rest) = match v.chars().next() {
                Some(q @ ('"' | '\'')) => match v[1..].find(q) {
                    Some(e) => (&v[1..1 + e], &v[e + 2..]),
                    None => (&v[1..], ""),
                },
                _ => {
                    let e = v.find(char::is_whitespace).unwrap_or(v.len());
                    (&v[..e], &v[e..])
                }
            };
            value = Some(val);
            remaining = rest;
        }

        let raw = &attrs[..attrs.len() - remaining.len()];
        if !is_dangerous(attr_name, value) {
            out.push(' ');
            out.push_str(raw.trim_end());
        }
        attrs = remaining;
    }
    if self_closing {
        out.push_str(" /");
    }
    out.push('>');
    out
}

fn is_dangerous(name: &str, value: Option<&str>) -> bool {
    if name.len() > 2 && name.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("on")) {
        return true;
    }
    value.is_some_and(|v| {
        let compact: String = v
            .chars()
            .filter(|c| !c.is_whitespace() && !c.is_control())
            .collect();
        compact.to_ascii_lowercase().starts_with("javascript:")
    })
}
