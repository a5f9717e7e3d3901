//! Template comparison
//!
//! Two differs are available. [`Differ::Text`] produces a unified diff of the
//! template bodies. [`Differ::Structural`] parses both bodies as YAML and
//! lists the key paths that were added, removed or changed:
//!
//! ```text
//! + Resources.Topic
//! - Outputs.LegacyArn
//! ~ Parameters.Size.Default: small -> large
//! ```

use crate::error::{Result, StackflowError};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use similar::TextDiff;
use std::fmt;
use std::path::PathBuf;

/// How template bodies are compared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Differ {
    /// Line-based unified diff
    #[default]
    Text,
    /// Key-path diff of the parsed documents
    Structural,
}

impl fmt::Display for Differ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Differ::Text => f.write_str("text"),
            Differ::Structural => f.write_str("structural"),
        }
    }
}

/// One side of a comparison
pub struct Side<'a> {
    pub label: String,
    pub body: &'a str,
}

impl Differ {
    /// Compare `remote` with `local`; an empty string means no difference
    pub fn compare(self, remote: Side<'_>, local: Side<'_>) -> Result<String> {
        if remote.body == local.body {
            return Ok(String::new());
        }
        match self {
            Differ::Text => Ok(TextDiff::from_lines(remote.body, local.body)
                .unified_diff()
                .header(&remote.label, &local.label)
                .to_string()),
            Differ::Structural => {
                let before = parse(&remote)?;
                let after = parse(&local)?;
                Ok(structural_changes(&before, &after).join("\n"))
            }
        }
    }
}

fn parse(side: &Side<'_>) -> Result<Value> {
    let value: Value =
        serde_yaml::from_str(side.body).map_err(|e| StackflowError::TemplateError {
            file: PathBuf::from(&side.label),
            message: e.to_string(),
        })?;
    // An undeployed stack has an empty remote body
    Ok(match value {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other,
    })
}

/// Added (`+`), removed (`-`) and changed (`~`) key paths, remote -> local
pub fn structural_changes(remote: &Value, local: &Value) -> Vec<String> {
    let mut changes = Vec::new();
    walk("", remote, local, &mut changes);
    changes
}

fn walk(path: &str, remote: &Value, local: &Value, changes: &mut Vec<String>) {
    match (remote, local) {
        (Value::Mapping(before), Value::Mapping(after)) => {
            for (key, value) in after {
                let child = join_key(path, key);
                match before.get(key) {
                    Some(old) => walk(&child, old, value, changes),
                    None => changes.push(format!("+ {child}")),
                }
            }
            for key in before.keys().filter(|key| !after.contains_key(*key)) {
                changes.push(format!("- {}", join_key(path, key)));
            }
        }
        (Value::Sequence(before), Value::Sequence(after)) => {
            for index in 0..before.len().max(after.len()) {
                let child = format!("{path}[{index}]");
                match (before.get(index), after.get(index)) {
                    (Some(old), Some(new)) => walk(&child, old, new, changes),
                    (None, Some(_)) => changes.push(format!("+ {child}")),
                    (Some(_), None) => changes.push(format!("- {child}")),
                    (None, None) => {}
                }
            }
        }
        (Value::Tagged(before), Value::Tagged(after)) if before.tag == after.tag => {
            walk(path, &before.value, &after.value, changes)
        }
        _ if remote != local => {
            let at = if path.is_empty() { "." } else { path };
            changes.push(format!("~ {at}: {} -> {}", render(remote), render(local)));
        }
        _ => {}
    }
}

fn join_key(path: &str, key: &Value) -> String {
    let key = render(key);
    if path.is_empty() {
        key
    } else {
        format!("{path}.{key}")
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Sequence(items) => format!("<sequence of {}>", items.len()),
        Value::Mapping(map) => format!("<mapping of {}>", map.len()),
        Value::Tagged(tagged) => format!("{} {}", tagged.tag, render(&tagged.value)),
    }
}
