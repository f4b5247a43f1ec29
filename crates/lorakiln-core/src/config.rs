use crate::error::{HandlerError, HandlerResult};
use crate::layout::WorkspaceLayout;
use base64::Engine;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Decodes the base64 config blob, optionally applies key-path overrides,
/// and writes the result to the workspace config path.
///
/// The decoded text must be a well-formed YAML document even when no
/// overrides are supplied; malformed configs fail the job before any
/// download or subprocess work happens. Without overrides the decoded text
/// is written verbatim, preserving the caller's formatting.
pub fn materialize(
    layout: &WorkspaceLayout,
    encoded: &str,
    overrides: Option<&BTreeMap<String, Value>>,
) -> HandlerResult<PathBuf> {
    let engine = base64::engine::general_purpose::STANDARD;
    let bytes =
        engine.decode(encoded.trim()).map_err(|e| HandlerError::Decode(e.to_string()))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| HandlerError::Decode(format!("config is not valid UTF-8: {}", e)))?;

    let mut document: Value = serde_yaml::from_str(&text)?;

    let rendered = match overrides.filter(|map| !map.is_empty()) {
        Some(map) => {
            for (path, value) in map {
                set_path(&mut document, path, value.clone());
            }
            debug!(overrides = map.len(), "applied config overrides");
            serde_yaml::to_string(&document)?
        }
        None => text,
    };

    layout.ensure_config_dir()?;
    let config_path = layout.config_path();
    std::fs::write(&config_path, &rendered)?;
    info!(path = %config_path.display(), "config materialized");
    debug!(config = %rendered, "materialized config document");
    Ok(config_path)
}

/// Sets the value at a dotted key path, creating intermediate nodes.
///
/// Numeric segments address sequence indices when the node being walked is
/// a sequence (padding with nulls as needed); in every other position a
/// segment is a mapping key. Missing intermediate nodes become sequences
/// when the following segment is numeric, mappings otherwise.
fn set_path(root: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    set_segments(root, &segments, value);
}

fn set_segments(node: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    let next_is_index = rest.first().is_some_and(|next| next.parse::<usize>().is_ok());

    if let Ok(index) = head.parse::<usize>() {
        if let Value::Sequence(seq) = node {
            while seq.len() <= index {
                seq.push(Value::Null);
            }
            if rest.is_empty() {
                seq[index] = value;
            } else {
                if !is_container(&seq[index]) {
                    seq[index] = empty_container(next_is_index);
                }
                set_segments(&mut seq[index], rest, value);
            }
            return;
        }
        // Numeric segment over anything but a sequence falls through to the
        // mapping-key path.
    }

    if !matches!(node, Value::Mapping(_)) {
        *node = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(map) = node {
        let entry = map.entry(Value::String((*head).to_string())).or_insert(Value::Null);
        if rest.is_empty() {
            *entry = value;
        } else {
            if !is_container(entry) {
                *entry = empty_container(next_is_index);
            }
            set_segments(entry, rest, value);
        }
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Mapping(_) | Value::Sequence(_))
}

fn empty_container(sequence: bool) -> Value {
    if sequence {
        Value::Sequence(Vec::new())
    } else {
        Value::Mapping(Mapping::new())
    }
}
