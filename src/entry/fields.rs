//! Line-level grammar for desktop entry files.
//!
//! Handles the `key[locale]=value` syntax, escape sequences, list and boolean
//! values, string validation, and the quoting rules for Exec commands.

use crate::error::{Error, Result};

/// Characters that must be backslash-escaped inside quoted Exec fields.
const EXEC_ESCAPED_CHARS: &str = "\"`$\\";

/// Characters that force an Exec field to be quoted when written back.
const EXEC_RESERVED_CHARS: &str = " \t\n\"'\\><~|&;$*?#()`";

/// One `key[locale]=value` line, split into its parts.
#[derive(Debug, PartialEq)]
pub(crate) struct EntryLine<'a> {
    pub key: &'a str,
    pub locale: Option<&'a str>,
    pub value: &'a str,
}

/// Splits a non-comment, non-header line into key, optional locale, and value.
pub(crate) fn split_line(line: &str) -> Result<EntryLine<'_>> {
    let (key_part, value) = line
        .split_once('=')
        .ok_or_else(|| Error::Format(line.to_string()))?;
    let key_part = key_part.trim();
    let value = value.trim();

    if let Some(open) = key_part.find('[') {
        let close = key_part
            .rfind(']')
            .filter(|close| *close > open)
            .ok_or_else(|| Error::Format(line.to_string()))?;
        let key = key_part[..open].trim();
        if key.is_empty() {
            return Err(Error::Format(line.to_string()));
        }
        return Ok(EntryLine {
            key,
            locale: Some(&key_part[open + 1..close]),
            value,
        });
    }
    if key_part.is_empty() {
        return Err(Error::Format(line.to_string()));
    }
    Ok(EntryLine {
        key: key_part,
        locale: None,
        value,
    })
}

/// Checks whether a bracketed line locale applies to the active locale.
/// Encoding suffixes are ignored on both sides.
pub(crate) fn locale_matches(line_locale: &str, active_locale: &str) -> bool {
    if active_locale.is_empty() {
        return false;
    }
    let strip = |l: &str| {
        let l = l.split('.').next().unwrap_or(l);
        l.split('@').next().unwrap_or(l).to_string()
    };
    let line = strip(line_locale);
    let active = strip(active_locale);
    // "sv_SE" lines also apply when only the language matches.
    line == active || Some(line.as_str()) == active.split('_').next()
}

/// Checks if a line is a `[Section Header]` line.
pub(crate) fn is_header_line(line: &str) -> bool {
    line.starts_with('[') && line.ends_with(']') && line.len() > 2
}

/// Extracts the header name from a section header line.
pub(crate) fn extract_header(line: &str) -> &str {
    &line[1..line.len() - 1]
}

/// Checks that a value contains only characters the desktop entry spec
/// permits. Localized strings may additionally hold any non-ASCII character.
pub(crate) fn is_valid_string(value: &str, locale_string: bool) -> bool {
    value
        .chars()
        .all(|c| (' '..='~').contains(&c) || (locale_string && !c.is_ascii()))
}

/// Replaces `\s \n \t \r \\` escape sequences with the characters they
/// represent. Any other backslash sequence is a format error.
pub(crate) fn unescape(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(';') => out.push(';'),
            _ => return Err(Error::Format(value.to_string())),
        }
    }
    Ok(out)
}

/// Replaces newline, tab, carriage return, and backslash characters with
/// their escape sequences, the inverse of [`unescape`].
pub(crate) fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

/// Validates a string value and decodes its escape sequences.
pub(crate) fn process_string(value: &str, locale_string: bool) -> Result<String> {
    if !is_valid_string(value, locale_string) {
        return Err(Error::Format(value.to_string()));
    }
    unescape(value)
}

/// Parses a `;`-separated list value. Files predating the current spec used
/// `,` as the separator, so that is accepted when no `;` is present.
/// Separators inside double quotes or escaped with a backslash do not split.
pub(crate) fn parse_list(value: &str, locale_string: bool) -> Result<Vec<String>> {
    if !is_valid_string(value, locale_string) {
        return Err(Error::Format(value.to_string()));
    }
    let separator = if value.contains(';') { ';' } else { ',' };
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in value.chars() {
        if escaped {
            current.push('\\');
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == separator && !in_quotes => {
                items.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    if escaped {
        return Err(Error::Format(value.to_string()));
    }
    if !current.is_empty() {
        items.push(current);
    }
    items.retain(|item| !item.is_empty());
    items
        .into_iter()
        .map(|item| unescape(item.trim()))
        .collect()
}

/// Joins a list back into a `;`-separated value string.
pub(crate) fn list_string(items: &[String]) -> String {
    items
        .iter()
        .map(|item| escape(item).replace(';', "\\;"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Parses a desktop entry boolean. `1`/`0` were valid in older versions of
/// the format and are still accepted.
pub(crate) fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(Error::Format(format!("{other} is not a boolean value"))),
    }
}

pub(crate) fn bool_string(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Splits a command string into fields, keeping quoted sections (with their
/// quotes) as single fields.
fn split_command_fields(command: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in command.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push('\\');
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push('"');
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    fields.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        fields.push(current);
    }
    fields
}

/// Removes quotes and their inner backslash escapes from an Exec value read
/// from an entry file, leaving the command ready for field-code expansion.
pub(crate) fn unquote_command_fields(command: &str) -> String {
    let fields: Vec<String> = split_command_fields(command)
        .into_iter()
        .map(|field| {
            if field.len() >= 2 && field.starts_with('"') && field.ends_with('"') {
                let inner = &field[1..field.len() - 1];
                let mut out = String::with_capacity(inner.len());
                let mut chars = inner.chars().peekable();
                while let Some(c) = chars.next() {
                    if c == '\\'
                        && chars
                            .peek()
                            .is_some_and(|next| EXEC_ESCAPED_CHARS.contains(*next))
                    {
                        out.push(chars.next().unwrap());
                    } else {
                        out.push(c);
                    }
                }
                out
            } else {
                field
            }
        })
        .collect();
    fields.join(" ")
}

/// Quotes any command field containing reserved characters and escapes the
/// characters that must be escaped inside quotes, so the command can be
/// written back to an entry file and re-read losslessly.
pub(crate) fn quote_command_fields(command: &str) -> String {
    let fields: Vec<String> = split_command_fields(command)
        .into_iter()
        .map(|field| {
            if field.starts_with('"') || !field.chars().any(|c| EXEC_RESERVED_CHARS.contains(c)) {
                return field;
            }
            let mut quoted = String::with_capacity(field.len() + 2);
            quoted.push('"');
            for c in field.chars() {
                if EXEC_ESCAPED_CHARS.contains(c) {
                    quoted.push('\\');
                }
                quoted.push(c);
            }
            quoted.push('"');
            quoted
        })
        .collect();
    fields.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_and_localized_lines() {
        let plain = split_line("Name=Files").unwrap();
        assert_eq!(plain.key, "Name");
        assert_eq!(plain.locale, None);
        assert_eq!(plain.value, "Files");

        let localized = split_line("Name[sv_SE]=Filer").unwrap();
        assert_eq!(localized.key, "Name");
        assert_eq!(localized.locale, Some("sv_SE"));
        assert_eq!(localized.value, "Filer");
    }

    #[test]
    fn rejects_lines_without_separator() {
        assert!(split_line("NameFiles").is_err());
        assert!(split_line("[locale]=x").is_err());
    }

    #[test]
    fn locale_matching_ignores_encoding() {
        assert!(locale_matches("sv_SE", "sv_SE.UTF-8"));
        assert!(locale_matches("sv", "sv_SE"));
        assert!(!locale_matches("de", "sv_SE"));
        assert!(!locale_matches("sv", ""));
    }

    #[test]
    fn escape_sequences_round_trip() {
        let raw = "line one\nline\ttwo\\end";
        assert_eq!(unescape(&escape(raw)).unwrap(), raw);
    }

    #[test]
    fn malformed_escapes_are_format_errors() {
        assert!(unescape("bad\\q").is_err());
        assert!(unescape("trailing\\").is_err());
    }

    #[test]
    fn lists_split_on_semicolons_with_legacy_comma_support() {
        assert_eq!(
            parse_list("Network;WebBrowser;", false).unwrap(),
            vec!["Network", "WebBrowser"]
        );
        assert_eq!(
            parse_list("Audio,Video", false).unwrap(),
            vec!["Audio", "Video"]
        );
        assert_eq!(parse_list("single", false).unwrap(), vec!["single"]);
    }

    #[test]
    fn escaped_separators_do_not_split_lists() {
        assert_eq!(
            parse_list("one\\;item;two", false).unwrap(),
            vec!["one;item", "two"]
        );
    }

    #[test]
    fn booleans_accept_legacy_forms() {
        assert!(parse_bool("true").unwrap());
        assert!(parse_bool("1").unwrap());
        assert!(!parse_bool("false").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("yes").is_err());
    }

    #[test]
    fn exec_quoting_round_trips() {
        let command = r#"sh -c "echo $HOME""#;
        let unquoted = unquote_command_fields(command);
        assert_eq!(unquoted, "sh -c echo $HOME");

        let requoted = quote_command_fields("run-me --path /tmp/my app");
        assert_eq!(requoted, r#"run-me --path /tmp/my app"#);

        let quoted = quote_command_fields("viewer my file.png");
        assert_eq!(unquote_command_fields(&quoted), "viewer my file.png");
    }
}
