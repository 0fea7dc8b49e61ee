//! Placeholder substitution in text blobs.

use std::sync::LazyLock;

use regex::Regex;

use super::client::SecretStore;
use super::path::SecretPath;
use super::VaultError;

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<<vault\.[^>]+>>").unwrap());

/// Extra indentation of block scalar content relative to its key.
const BLOCK_INDENT: &str = "  ";

/// Replaces `<<vault.…>>` placeholders with values from a [`SecretStore`].
#[derive(Debug)]
pub struct PlaceholderResolver<S> {
    store: S,
}

impl<S: SecretStore> PlaceholderResolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Resolve every placeholder in `text`, left to right.
    ///
    /// Either all placeholders resolve and the rewritten text is returned, or
    /// the first failure is returned and nothing is substituted. Multi-line
    /// values become `|` block scalars indented two spaces deeper than the
    /// line holding the placeholder (`- ` indicators included), measured on
    /// the original text. Values whose first line starts with a space get an
    /// explicit indentation indicator.
    pub fn resolve(&self, text: &str) -> Result<String, VaultError> {
        let mut output = String::with_capacity(text.len());
        let mut last = 0;

        for placeholder in PLACEHOLDER_REGEX.find_iter(text) {
            let secret = SecretPath::parse(placeholder.as_str())?;
            let value = self.store.fetch(&secret)?;

            output.push_str(&text[last..placeholder.start()]);
            last = placeholder.end();
            if !value.contains('\n') {
                output.push_str(&value);
                continue;
            }

            // The block scalar must end its line; a trailing comment moves to
            // the header so it does not become part of the value.
            let rest = line_rest(text, last);
            let comment = rest.trim();
            if !comment.is_empty() && !(comment.starts_with('#') && rest.starts_with([' ', '\t'])) {
                return Err(VaultError::MalformedPlaceholder {
                    placeholder: placeholder.as_str().to_string(),
                    reason: "a multi-line value must be the last thing on its line".to_string(),
                });
            }
            last += rest.len();

            let layout = BlockLayout::at(text, placeholder.start()).ok_or_else(|| {
                VaultError::MalformedPlaceholder {
                    placeholder: placeholder.as_str().to_string(),
                    reason: "a multi-line value must directly follow a key or `- `".to_string(),
                }
            })?;
            output.push_str(&layout.render(&value, comment));
        }

        if last == 0 {
            return Ok(text.to_string());
        }

        output.push_str(&text[last..]);
        Ok(output)
    }
}

/// Number of placeholders `text` references.
pub fn count_placeholders(text: &str) -> usize {
    PLACEHOLDER_REGEX.find_iter(text).count()
}

/// Text after `offset` up to the line terminator.
fn line_rest(text: &str, offset: usize) -> &str {
    let end = text[offset..].find('\n').map_or(text.len(), |i| offset + i);
    text[offset..end].trim_end_matches('\r')
}

/// `key:` followed by whitespace and nothing else.
fn is_key_indicator(text: &str) -> bool {
    let trimmed = text.trim_end_matches([' ', '\t']);
    let Some(key) = trimmed.strip_suffix(':') else {
        return false;
    };
    if trimmed.len() == text.len() || key.trim().is_empty() {
        return false;
    }
    // A plain key cannot hold a value indicator of its own
    key.starts_with(['"', '\'']) || !key.contains(": ")
}

/// Where a block scalar replacing a placeholder sits.
struct BlockLayout<'a> {
    /// Whitespace of the placeholder's line.
    indent: &'a str,
    /// Column of the node owning the scalar: the key, or the `-` of a bare
    /// sequence item.
    parent: usize,
    /// Column of the first content character.
    content: usize,
}

impl<'a> BlockLayout<'a> {
    /// `None` unless only indentation, `- ` indicators and a `key:` precede
    /// `offset` on its line.
    fn at(text: &'a str, offset: usize) -> Option<Self> {
        let line_start = text[..offset].rfind('\n').map_or(0, |i| i + 1);
        let prefix = &text[line_start..offset];
        let width = prefix
            .find(|c: char| c != ' ' && c != '\t')
            .unwrap_or(prefix.len());
        let indent = &prefix[..width];

        // `- ` indicators count as indentation for the content below them
        let mut column = width;
        let mut last_dash = None;
        while prefix[column..].starts_with("- ") {
            last_dash = Some(column);
            column += 2;
            column += prefix[column..].len() - prefix[column..].trim_start_matches(' ').len();
        }
        let owner = &prefix[column..];
        if !owner.is_empty() && !is_key_indicator(owner) {
            return None;
        }
        let parent = match last_dash {
            Some(dash) if owner.is_empty() => dash,
            _ => column,
        };

        Some(Self {
            indent,
            parent,
            content: column + BLOCK_INDENT.len(),
        })
    }

    fn render(&self, value: &str, comment: &str) -> String {
        let pad = format!("{}{}", self.indent, " ".repeat(self.content - self.indent.len()));
        let body = value
            .split('\n')
            .map(|line| {
                if line.is_empty() {
                    String::new()
                } else {
                    format!("{pad}{line}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut header = String::from("|");
        let leading_space = value
            .split('\n')
            .find(|line| !line.is_empty())
            .is_some_and(|line| line.starts_with(' '));
        if leading_space {
            header.push_str(&(self.content - self.parent).to_string());
        }
        if !comment.is_empty() {
            header.push(' ');
            header.push_str(comment);
        }
        format!("{header}\n{body}")
    }
}
