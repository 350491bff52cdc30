//! Line-oriented settings format
//!
//! The settings file is UTF-8 text: colon-suffixed keys, dash-prefixed list
//! items, two-space indentation for nested blocks, `#` comments. Unknown
//! keys are preserved by the parser and ignored by the typed layer.
//!
//! ```text
//! api_key: abc123
//! backup_paths:
//!   - /tmp/sc/root
//! backup_schedule:
//!   weekly:
//!     Monday:
//!       - 09:00
//! ```

use super::errors::{SettingsError, SettingsResult};

/// A parsed settings value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Scalar(String),
    List(Vec<String>),
    Map(Vec<(String, ConfigValue)>),
    /// A key with no value and no children.
    Empty,
}

impl ConfigValue {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            ConfigValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ConfigValue::List(items) => Some(items),
            ConfigValue::Empty => Some(&[]),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(String, ConfigValue)]> {
        match self {
            ConfigValue::Map(entries) => Some(entries),
            ConfigValue::Empty => Some(&[]),
            _ => None,
        }
    }
}

struct Line<'a> {
    number: usize,
    indent: usize,
    text: &'a str,
}

/// Parse a settings document into an ordered key/value tree.
pub fn parse_document(text: &str) -> SettingsResult<Vec<(String, ConfigValue)>> {
    let lines: Vec<Line> = text
        .lines()
        .enumerate()
        .filter_map(|(i, raw)| {
            let trimmed = raw.trim_end();
            let content = trimmed.trim_start();
            if content.is_empty() || content.starts_with('#') {
                return None;
            }
            Some(Line {
                number: i + 1,
                indent: trimmed.len() - content.len(),
                text: content,
            })
        })
        .collect();

    let mut pos = 0;
    let doc = parse_block(&lines, &mut pos, 0)?;
    if pos < lines.len() {
        return Err(SettingsError::parse(
            lines[pos].number,
            format!("unexpected indentation before '{}'", lines[pos].text),
        ));
    }
    Ok(doc)
}

fn parse_block<'a>(
    lines: &[Line<'a>],
    pos: &mut usize,
    indent: usize,
) -> SettingsResult<Vec<(String, ConfigValue)>> {
    let mut entries = Vec::new();

    while *pos < lines.len() {
        let line = &lines[*pos];
        if line.indent < indent {
            break;
        }
        if line.indent > indent {
            return Err(SettingsError::parse(
                line.number,
                format!("unexpected indentation before '{}'", line.text),
            ));
        }

        let (key, rest) = line.text.split_once(':').ok_or_else(|| {
            SettingsError::parse(line.number, format!("expected 'key:' in '{}'", line.text))
        })?;
        let key = key.trim().to_string();
        let rest = rest.trim();
        *pos += 1;

        if !rest.is_empty() {
            entries.push((key, ConfigValue::Scalar(rest.to_string())));
            continue;
        }

        // Key with children, a list block, or nothing at all.
        match lines.get(*pos) {
            Some(child) if child.indent > indent => {
                let child_indent = child.indent;
                if child.text.starts_with('-') {
                    entries.push((key, ConfigValue::List(parse_list(lines, pos, child_indent)?)));
                } else {
                    entries.push((key, ConfigValue::Map(parse_block(lines, pos, child_indent)?)));
                }
            }
            _ => entries.push((key, ConfigValue::Empty)),
        }
    }

    Ok(entries)
}

fn parse_list<'a>(lines: &[Line<'a>], pos: &mut usize, indent: usize) -> SettingsResult<Vec<String>> {
    let mut items = Vec::new();

    while *pos < lines.len() {
        let line = &lines[*pos];
        if line.indent != indent || !line.text.starts_with('-') {
            break;
        }
        let item = line.text[1..].trim();
        if item.is_empty() {
            return Err(SettingsError::parse(line.number, "empty list item"));
        }
        items.push(item.to_string());
        *pos += 1;
    }

    Ok(items)
}

/// Render a key/value tree back to the settings format.
pub fn render_document(doc: &[(String, ConfigValue)]) -> String {
    let mut out = String::new();
    render_block(doc, 0, &mut out);
    out
}

fn render_block(entries: &[(String, ConfigValue)], indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    for (key, value) in entries {
        match value {
            ConfigValue::Scalar(s) => {
                out.push_str(&format!("{}{}: {}\n", pad, key, s));
            }
            ConfigValue::Empty => {
                out.push_str(&format!("{}{}:\n", pad, key));
            }
            ConfigValue::List(items) => {
                out.push_str(&format!("{}{}:\n", pad, key));
                let item_pad = "  ".repeat(indent + 1);
                for item in items {
                    out.push_str(&format!("{}- {}\n", item_pad, item));
                }
            }
            ConfigValue::Map(children) => {
                out.push_str(&format!("{}{}:\n", pad, key));
                render_block(children, indent + 1, out);
            }
        }
    }
}
