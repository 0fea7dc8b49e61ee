//! Binding every manifest document to the target namespace.

use std::borrow::Cow;
use std::sync::Arc;

use super::documents::{Documents, is_blank_document};
use super::node::{CollectionStyle, Document, Node, ScalarStyle, Span};
use super::ManifestError;
use crate::common::Reporter;

/// Sets `metadata.namespace` on each document of a YAML stream.
///
/// Only the namespace value (or the inserted entry) changes; comments,
/// ordering and anchors elsewhere are left as written. Flow-style metadata
/// and JSON documents get the entry inside their braces, quoted like their
/// keys. Items of `kind: List` documents are not visited.
pub struct NamespacePatcher {
    namespace: String,
    reporter: Arc<dyn Reporter>,
}

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Patch {
    Unchanged,
    Replace {
        span: Span,
        text: String,
        previous: String,
    },
    Insert {
        offset: usize,
        text: String,
    },
}

impl NamespacePatcher {
    pub fn new(namespace: impl Into<String>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            namespace: namespace.into(),
            reporter,
        }
    }

    /// Patch every document in `manifest`.
    ///
    /// Returns the input itself when no document needed a change. Documents
    /// that fail to parse are kept byte for byte and reported as warnings.
    pub fn patch_namespaces<'a>(&self, manifest: &'a str) -> Cow<'a, str> {
        let documents = Documents::split(manifest);
        let mut patched = Vec::with_capacity(documents.bodies().len());

        for (index, body) in documents.bodies().iter().enumerate() {
            if is_blank_document(body) {
                patched.push(None);
                continue;
            }

            match self.patch_document(body) {
                Ok(updated) => patched.push(updated),
                Err(e) => {
                    self.reporter.warn(&format!(
                        "Skipping document {} while setting namespace: {}",
                        index + 1,
                        e
                    ));
                    patched.push(None);
                }
            }
        }

        if patched.iter().all(Option::is_none) {
            return Cow::Borrowed(manifest);
        }

        Cow::Owned(documents.join_with(|index, _| patched[index].take()))
    }

    /// Rewritten text of one document, or `None` when it stays as is.
    fn patch_document(&self, body: &str) -> Result<Option<String>, ManifestError> {
        let document = Document::parse(body)?;
        let patch = self.plan(&document, body);

        Ok(match patch {
            Patch::Unchanged => None,
            Patch::Replace {
                span,
                text,
                previous,
            } => {
                log::info!("Updated namespace from '{}' to '{}'", previous, self.namespace);
                let mut updated = String::with_capacity(body.len() + text.len());
                updated.push_str(&body[..span.start]);
                updated.push_str(&text);
                updated.push_str(&body[span.end..]);
                Some(updated)
            }
            Patch::Insert { offset, text } => {
                log::info!("Added namespace '{}'", self.namespace);
                let mut updated = String::with_capacity(body.len() + text.len());
                updated.push_str(&body[..offset]);
                updated.push_str(&text);
                updated.push_str(&body[offset..]);
                Some(updated)
            }
        })
    }

    fn plan(&self, document: &Document, body: &str) -> Patch {
        let Some(root @ Node::Mapping { .. }) = &document.root else {
            return Patch::Unchanged;
        };
        let Some(metadata) = root.get("metadata") else {
            return Patch::Unchanged;
        };
        let Some(
            resolved @ Node::Mapping {
                style,
                indent,
                entries,
                span,
                ..
            },
        ) = document.resolve(metadata)
        else {
            return Patch::Unchanged;
        };
        if let (Node::Alias { .. }, Some(name)) = (metadata, resolved.anchor()) {
            log::debug!("metadata is shared through anchor &{name}; editing the anchor");
        }
        let json = is_json(root, body);

        if let Some(entry) = entries.iter().find(|entry| entry.key == "namespace") {
            return self.replace_value(document, &entry.value, json);
        }

        match style {
            CollectionStyle::Block => {
                let Some(last) = entries.last() else {
                    return Patch::Unchanged;
                };
                let anchor_end = last.value.span().end.max(last.key_span.end);
                let mut offset = line_end(body, anchor_end);
                // Trailing blank lines belong to a `|+` or `>+` value
                if keeps_trailing_lines(body, last_leaf(&last.value)) {
                    offset = skip_blank_lines(body, offset);
                }
                let newline = if body.contains("\r\n") { "\r\n" } else { "\n" };
                Patch::Insert {
                    offset,
                    text: format!(
                        "{newline}{}namespace: {}",
                        " ".repeat(*indent),
                        self.namespace
                    ),
                }
            }
            CollectionStyle::Flow => {
                let entry = if json {
                    format!("\"namespace\": \"{}\"", self.namespace)
                } else {
                    format!("namespace: {}", self.namespace)
                };
                match entries.last() {
                    Some(last) => Patch::Insert {
                        offset: last.value.span().end.max(last.key_span.end),
                        text: format!(", {entry}"),
                    },
                    None => Patch::Insert {
                        offset: span.start + 1,
                        text: entry,
                    },
                }
            }
        }
    }

    fn replace_value(&self, document: &Document, value: &Node, json: bool) -> Patch {
        // Aliased namespaces are replaced at the use site so other users of
        // the anchor keep their value.
        let current = match document.resolve(value) {
            Some(Node::Scalar { value, .. }) => value.as_str(),
            Some(_) => {
                self.reporter
                    .warn("metadata.namespace is not a scalar; leaving it unchanged");
                return Patch::Unchanged;
            }
            None => "",
        };
        if current == self.namespace {
            return Patch::Unchanged;
        }

        let span = value.span();
        let text = match value {
            Node::Scalar {
                style: ScalarStyle::SingleQuoted,
                ..
            } => format!("'{}'", self.namespace),
            Node::Scalar {
                style: ScalarStyle::DoubleQuoted,
                ..
            } => format!("\"{}\"", self.namespace),
            _ if json => format!("\"{}\"", self.namespace),
            _ if span.is_empty() => format!(" {}", self.namespace),
            _ => self.namespace.clone(),
        };

        Patch::Replace {
            span,
            text,
            previous: current.to_string(),
        }
    }
}

/// A flow root whose first key is double-quoted.
fn is_json(root: &Node, body: &str) -> bool {
    match root {
        Node::Mapping {
            style: CollectionStyle::Flow,
            entries,
            ..
        } => entries
            .first()
            .is_some_and(|entry| body.as_bytes().get(entry.key_span.start) == Some(&b'"')),
        _ => false,
    }
}

/// The node whose text ends a block collection.
fn last_leaf(node: &Node) -> &Node {
    match node {
        Node::Mapping {
            style: CollectionStyle::Block,
            entries,
            ..
        } => entries.last().map_or(node, |entry| last_leaf(&entry.value)),
        Node::Sequence {
            style: CollectionStyle::Block,
            items,
            ..
        } => items.last().map_or(node, last_leaf),
        other => other,
    }
}

/// A block scalar with the keep (`+`) chomping indicator.
fn keeps_trailing_lines(body: &str, node: &Node) -> bool {
    match node {
        Node::Scalar {
            style: ScalarStyle::Literal | ScalarStyle::Folded,
            span,
            ..
        } => body[span.start..]
            .split(char::is_whitespace)
            .next()
            .is_some_and(|header| header.contains('+')),
        _ => false,
    }
}

/// Move `offset`, a line terminator, past the whitespace-only lines after it.
fn skip_blank_lines(text: &str, mut offset: usize) -> usize {
    while let Some(i) = text[offset..].find('\n') {
        let next = offset + i + 1;
        if next >= text.len() {
            break;
        }
        let end = line_end(text, next);
        if !text[next..end].trim().is_empty() {
            break;
        }
        offset = end;
    }
    offset
}

/// Offset of the line terminator of the line containing `offset`.
fn line_end(text: &str, offset: usize) -> usize {
    match text[offset..].find('\n') {
        Some(i) if i > 0 && text.as_bytes()[offset + i - 1] == b'\r' => offset + i - 1,
        Some(i) => offset + i,
        None => text.len(),
    }
}
