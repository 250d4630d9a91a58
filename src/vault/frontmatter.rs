//! Canonical Markdown + YAML frontmatter codec.
//!
//! The on-disk contract is bit-exact: identical logical content must produce
//! byte-identical files. Canonical form is:
//!
//! ```text
//! ---
//! <YAML mapping, keys sorted alphabetically at every depth>
//! ---
//! <Markdown body>
//! ```
//!
//! LF line endings, a trailing newline, timestamps serialized elsewhere as
//! ISO-8601 with an explicit `+00:00` offset.

use std::collections::BTreeMap;

use serde_json::Value;

/// Errors from frontmatter parsing.
#[derive(Debug, thiserror::Error)]
pub enum FrontmatterError {
    /// The file does not begin with a `---` fence.
    #[error("missing frontmatter opening fence")]
    MissingOpeningFence,
    /// No closing `---` fence was found.
    #[error("unterminated frontmatter block")]
    UnterminatedBlock,
    /// The YAML between the fences failed to parse.
    #[error("invalid frontmatter YAML: {0}")]
    Yaml(String),
    /// The frontmatter is valid YAML but not a mapping.
    #[error("frontmatter is not a mapping")]
    NotAMapping,
    /// A mapping key is not a string.
    #[error("frontmatter key is not a string: {0:?}")]
    NonStringKey(String),
}

/// Parse a Markdown document with YAML frontmatter.
///
/// Returns the frontmatter as a sorted key → JSON value map plus the body.
/// The body excludes the single newline that follows the closing fence.
///
/// # Errors
///
/// Returns [`FrontmatterError`] for files without a frontmatter block,
/// unterminated blocks, invalid YAML, or non-mapping frontmatter.
pub fn parse(text: &str) -> Result<(BTreeMap<String, Value>, String), FrontmatterError> {
    let rest = text
        .strip_prefix("---\n")
        .ok_or(FrontmatterError::MissingOpeningFence)?;

    let (yaml_text, body) = match rest.split_once("\n---\n") {
        Some((yaml, body)) => (yaml, body.to_owned()),
        // A file may end right at the closing fence.
        None => match rest.strip_suffix("\n---") {
            Some(yaml) => (yaml, String::new()),
            None => return Err(FrontmatterError::UnterminatedBlock),
        },
    };

    let parsed: serde_yaml::Value =
        serde_yaml::from_str(yaml_text).map_err(|e| FrontmatterError::Yaml(e.to_string()))?;

    let serde_yaml::Value::Mapping(mapping) = parsed else {
        return Err(FrontmatterError::NotAMapping);
    };

    let mut metadata = BTreeMap::new();
    for (key, value) in mapping {
        let serde_yaml::Value::String(key) = key else {
            return Err(FrontmatterError::NonStringKey(format!("{key:?}")));
        };
        metadata.insert(key, yaml_to_json(value));
    }

    Ok((metadata, body))
}

/// Serialize frontmatter and body to the canonical on-disk form.
///
/// Keys are emitted in sorted order at every depth (the `BTreeMap` input and
/// `serde_json`'s sorted object map guarantee this). Output always ends with
/// a newline.
pub fn serialize(metadata: &BTreeMap<String, Value>, content: &str) -> String {
    let mut mapping = serde_yaml::Mapping::with_capacity(metadata.len());
    for (key, value) in metadata {
        mapping.insert(
            serde_yaml::Value::String(key.clone()),
            json_to_yaml(value),
        );
    }

    let yaml = serde_yaml::to_string(&serde_yaml::Value::Mapping(mapping))
        .unwrap_or_else(|_| String::from("{}\n"));
    // serde_yaml 0.8 prefixed documents with `---`; 0.9 does not. Normalize.
    let yaml = yaml.strip_prefix("---\n").unwrap_or(&yaml);

    let mut out = String::with_capacity(
        yaml.len()
            .saturating_add(content.len())
            .saturating_add(16),
    );
    out.push_str("---\n");
    out.push_str(yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("---\n");
    out.push_str(content);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Convert a YAML value into the JSON value model used for metadata.
///
/// YAML-only constructs degrade: non-string mapping keys are stringified,
/// tagged values collapse to their inner value.
fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64().map(Value::from).unwrap_or(Value::Null)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(seq) => {
            Value::Array(seq.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(map) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in map {
                let key = match k {
                    serde_yaml::Value::String(s) => s,
                    other => stringify_scalar(&other),
                };
                obj.insert(key, yaml_to_json(v));
            }
            Value::Object(obj)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

/// Convert a JSON metadata value to YAML for serialization.
fn json_to_yaml(value: &Value) -> serde_yaml::Value {
    match value {
        Value::Null => serde_yaml::Value::Null,
        Value::Bool(b) => serde_yaml::Value::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_yaml::Value::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                serde_yaml::Value::Number(u.into())
            } else {
                n.as_f64()
                    .map(|f| serde_yaml::Value::Number(f.into()))
                    .unwrap_or(serde_yaml::Value::Null)
            }
        }
        Value::String(s) => serde_yaml::Value::String(s.clone()),
        Value::Array(items) => {
            serde_yaml::Value::Sequence(items.iter().map(json_to_yaml).collect())
        }
        Value::Object(obj) => {
            // serde_json's map is sorted (BTreeMap-backed), preserving
            // canonical ordering at every depth.
            let mut mapping = serde_yaml::Mapping::with_capacity(obj.len());
            for (k, v) in obj {
                mapping.insert(serde_yaml::Value::String(k.clone()), json_to_yaml(v));
            }
            serde_yaml::Value::Mapping(mapping)
        }
    }
}

fn stringify_scalar(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        other => format!("{other:?}"),
    }
}
