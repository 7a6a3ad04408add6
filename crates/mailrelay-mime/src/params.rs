//! Structured header parameter parsing.
//!
//! Shared by `Content-Type` and `Content-Disposition`: a leading value
//! followed by `; key=value` pairs, where values may be quoted and may use
//! RFC 2231 extended (`key*=`) or continued (`key*0=`, `key*1*=`) syntax.

use std::collections::HashMap;

use crate::encoding::decode_rfc2231;

/// Splits a structured header into its leading value and raw parameters.
///
/// Semicolons inside quoted strings do not split.
pub(crate) fn split_header(value: &str) -> (&str, Vec<(String, String)>) {
    let mut segments = split_unquoted(value, ';').into_iter();
    let head = segments.next().unwrap_or("").trim();

    let params = segments
        .filter_map(|segment| {
            let (key, raw) = segment.split_once('=')?;
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return None;
            }
            Some((key, unquote(raw.trim())))
        })
        .collect();

    (head, params)
}

/// Folds raw parameters into a map, resolving RFC 2231 continuations and
/// extended values.
///
/// Plain `name` wins over nothing; `name*` and `name*0...` win over plain
/// `name` because they carry the precise charset.
pub(crate) fn resolve(raw: Vec<(String, String)>) -> HashMap<String, String> {
    let mut plain = HashMap::new();
    let mut extended = HashMap::new();
    let mut continued: HashMap<String, Vec<(u32, bool, String)>> = HashMap::new();

    for (key, value) in raw {
        let Some((name, suffix)) = key.split_once('*') else {
            plain.entry(key).or_insert(value);
            continue;
        };

        if suffix.is_empty() {
            extended.insert(name.to_string(), decode_rfc2231(&value));
            continue;
        }

        let (index, encoded) = suffix
            .strip_suffix('*')
            .map_or((suffix, false), |index| (index, true));
        if let Ok(index) = index.parse::<u32>() {
            continued
                .entry(name.to_string())
                .or_default()
                .push((index, encoded, value));
        }
    }

    for (name, mut pieces) in continued {
        pieces.sort_by_key(|(index, _, _)| *index);
        let first_encoded = pieces.first().is_some_and(|(_, encoded, _)| *encoded);

        let joined: String = pieces.iter().map(|(_, _, value)| value.as_str()).collect();
        let value = if first_encoded {
            decode_rfc2231(&joined)
        } else {
            joined
        };
        extended.entry(name).or_insert(value);
    }

    plain.extend(extended);
    plain
}

fn split_unquoted(value: &str, separator: char) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == separator && !in_quotes => {
                segments.push(&value[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    segments.push(&value[start..]);
    segments
}

fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .map(|v| v.strip_suffix('"').unwrap_or(v))
    else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Writes a parameter value, quoting it when it contains tspecials.
pub(crate) fn format_value(value: &str) -> String {
    if !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "()<>@,;:\\\"/[]?=".contains(c))
    {
        return value.to_string();
    }

    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_split_respects_quotes() {
        let (head, params) = split_header(r#"attachment; filename="a;b.pdf"; size=10"#);
        assert_eq!(head, "attachment");
        assert_eq!(
            params,
            vec![
                ("filename".to_string(), "a;b.pdf".to_string()),
                ("size".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn test_unquote_escapes() {
        assert_eq!(unquote(r#""say \"hi\"""#), r#"say "hi""#);
        assert_eq!(unquote("bare"), "bare");
        assert_eq!(unquote("\"unterminated"), "unterminated");
    }

    #[test]
    fn test_resolve_extended_wins() {
        let (_, raw) =
            split_header("attachment; filename=fallback.pdf; filename*=utf-8''r%C3%A4kning.pdf");
        let params = resolve(raw);
        assert_eq!(params["filename"], "räkning.pdf");
    }

    #[test]
    fn test_resolve_continuations() {
        let (_, raw) = split_header(
            "attachment; filename*1=\"part.pdf\"; filename*0=\"a-very-long-\"",
        );
        assert_eq!(resolve(raw)["filename"], "a-very-long-part.pdf");

        let (_, raw) =
            split_header("attachment; filename*0*=utf-8''%C3%A5rs; filename*1*=m%C3%B6te.txt");
        assert_eq!(resolve(raw)["filename"], "årsmöte.txt");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value("utf-8"), "utf-8");
        assert_eq!(format_value("my file.pdf"), "\"my file.pdf\"");
        assert_eq!(format_value("a\"b"), "\"a\\\"b\"");
        assert_eq!(format_value(""), "\"\"");
    }
}
