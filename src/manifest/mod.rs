//! Manifest rewriting.
//!
//! Multi-document YAML is split on `---` separators, each document is parsed
//! into a span-tracking [`node::Node`] tree, and changes are applied as
//! surgical text edits so comments, key order and anchors survive untouched.

pub mod documents;
pub mod namespace;
pub mod node;
pub mod secret;

pub use documents::Documents;
pub use namespace::NamespacePatcher;
pub use node::{CollectionStyle, Document, Entry, Node, ScalarStyle, Span};
pub use secret::apply_if_secret;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to encode Secret: {0}")]
    SecretEncode(String),

    #[error("failed to parse YAML document: {0}")]
    YamlParse(String),
}
