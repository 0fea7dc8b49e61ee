//! Base64 encoding of Kubernetes `Secret.data`.

use std::borrow::Cow;
use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde_yaml::Value;

use super::ManifestError;
use super::documents::{Documents, is_blank_document};

static SECRET_KIND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^kind:[ \t]*["']?Secret["']?[ \t]*(#.*)?\r?$"#).unwrap());

/// Base64-encode the `data` values of every `kind: Secret` document.
///
/// Other documents, including `stringData`, pass through untouched. Encoded
/// documents are re-serialized, so their comments are not kept. A Secret that
/// does not parse, or whose `data` holds anything but scalars, is an error.
pub fn apply_if_secret(text: &str) -> Result<Cow<'_, str>, ManifestError> {
    if !SECRET_KIND.is_match(text) {
        return Ok(Cow::Borrowed(text));
    }

    let documents = Documents::split(text);
    let mut encoded = Vec::with_capacity(documents.bodies().len());
    for (index, body) in documents.bodies().iter().enumerate() {
        if is_blank_document(body) || !SECRET_KIND.is_match(body) {
            encoded.push(None);
            continue;
        }
        let rendered = encode_secret(body)
            .map_err(|e| ManifestError::SecretEncode(format!("document {}: {}", index + 1, e)))?;
        encoded.push(rendered);
    }

    if encoded.iter().all(Option::is_none) {
        return Ok(Cow::Borrowed(text));
    }
    Ok(Cow::Owned(
        documents.join_with(|index, _| encoded[index].take()),
    ))
}

/// Re-rendered Secret, or `None` when it has no `data` to encode.
fn encode_secret(body: &str) -> Result<Option<String>, String> {
    let mut secret: Value = serde_yaml::from_str(body).map_err(|e| e.to_string())?;

    if secret.get("kind").and_then(Value::as_str) != Some("Secret") {
        return Ok(None);
    }

    let data = match secret.get_mut("data") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Mapping(data)) => data,
        Some(_) => return Err("data must be a mapping".to_string()),
    };

    for (key, value) in data.iter_mut() {
        let plain = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            _ => {
                let key = key.as_str().unwrap_or("<non-string key>");
                return Err(format!("data.{key} must be a scalar"));
            }
        };
        *value = Value::String(STANDARD.encode(plain.as_bytes()));
    }

    serde_yaml::to_string(&secret)
        .map(Some)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_value(rendered: &str, key: &str) -> String {
        let value: Value = serde_yaml::from_str(rendered).unwrap();
        value["data"][key].as_str().unwrap().to_string()
    }

    #[test]
    fn test_encodes_secret_data() {
        let input = "apiVersion: v1\nkind: Secret\nmetadata:\n  name: db\ndata:\n  password: \"hunter2\"\n";
        let output = apply_if_secret(input).unwrap();

        assert_eq!(data_value(&output, "password"), "aHVudGVyMg==");
    }

    #[test]
    fn test_other_kinds_are_borrowed() {
        let input = "kind: ConfigMap\ndata:\n  password: hunter2\n";
        assert!(matches!(apply_if_secret(input).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_string_data_untouched() {
        let input = "kind: Secret\nstringData:\n  token: plain\ndata:\n  token: plain\n";
        let output = apply_if_secret(input).unwrap();
        let value: Value = serde_yaml::from_str(&output).unwrap();

        assert_eq!(value["stringData"]["token"].as_str(), Some("plain"));
        assert_eq!(value["data"]["token"].as_str(), Some("cGxhaW4="));
    }

    #[test]
    fn test_numbers_and_bools_encoded_as_text() {
        let input = "kind: Secret\ndata:\n  port: 5432\n  enabled: true\n";
        let output = apply_if_secret(input).unwrap();

        assert_eq!(data_value(&output, "port"), STANDARD.encode("5432"));
        assert_eq!(data_value(&output, "enabled"), STANDARD.encode("true"));
    }

    #[test]
    fn test_secret_without_data_is_borrowed() {
        let input = "kind: Secret\nstringData:\n  a: b\n";
        assert!(matches!(apply_if_secret(input).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_only_secret_documents_rewritten() {
        let input = "# config\nkind: ConfigMap\ndata:\n  a: b\n---\nkind: Secret\ndata:\n  a: b\n";
        let output = apply_if_secret(input).unwrap();
        let documents = Documents::split(&output);

        assert_eq!(documents.bodies().len(), 2);
        assert_eq!(documents.bodies()[0], "# config\nkind: ConfigMap\ndata:\n  a: b\n");
        assert_eq!(data_value(documents.bodies()[1], "a"), "Yg==");
    }

    #[test]
    fn test_malformed_secret_is_error() {
        let input = "kind: Secret\ndata:\n  password: [unclosed\n";
        assert!(matches!(
            apply_if_secret(input),
            Err(ManifestError::SecretEncode(_))
        ));
    }

    #[test]
    fn test_nested_data_is_error() {
        let input = "kind: Secret\ndata:\n  nested:\n    a: b\n";
        let err = apply_if_secret(input).unwrap_err();
        assert!(err.to_string().contains("data.nested"));
    }

    #[test]
    fn test_data_list_is_error() {
        let input = "kind: Secret\ndata:\n  - a\n";
        assert!(apply_if_secret(input).is_err());
    }
}
