//! User variables from `--var-file` and `--var`

use anyhow::{Context, bail};
use serde_yaml::{Mapping, Value};
use stackflow_core::Variables;
use stackflow_core::loader::deep_merge;
use std::path::PathBuf;
use tracing::debug;

/// Build the `var` context for template rendering
///
/// Files apply in order, replacing top-level keys unless `merge_keys` asks for
/// a deep merge. `--var` values always apply last.
pub fn load_variables(
    var_files: &[PathBuf],
    vars: &[String],
    merge_keys: bool,
) -> anyhow::Result<Variables> {
    let mut merged = Value::Mapping(Mapping::new());

    for path in var_files {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read var file {}", path.display()))?;
        let file: Value = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse var file {}", path.display()))?;
        let file = match file {
            Value::Mapping(mapping) => mapping,
            Value::Null => continue,
            _ => bail!("var file {} must contain a mapping", path.display()),
        };

        if merge_keys {
            deep_merge(&mut merged, Value::Mapping(file));
        } else if let Value::Mapping(base) = &mut merged {
            for (key, value) in file {
                if base.contains_key(&key) {
                    debug!(key = ?key, file = %path.display(), "Var file overrides key");
                }
                base.insert(key, value);
            }
        }
    }

    for var in vars {
        let (key, value) = parse_var(var)?;
        set_nested(&mut merged, &key, value);
    }

    match serde_json::to_value(&merged).context("variables must use string keys")? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Ok(Variables::new()),
    }
}

/// Split `a.b=value` into its key path and value
fn parse_var(var: &str) -> anyhow::Result<(Vec<String>, String)> {
    let Some((key, value)) = var.split_once('=') else {
        bail!("invalid --var '{var}', expected KEY=VALUE");
    };
    let path: Vec<String> = key.split('.').map(str::to_string).collect();
    if path.iter().any(|part| part.is_empty()) {
        bail!("invalid --var key '{key}'");
    }
    Ok((path, value.to_string()))
}

fn set_nested(root: &mut Value, path: &[String], value: String) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut current = root;
    for part in parents {
        let key = Value::String(part.clone());
        let Value::Mapping(map) = current else {
            return;
        };
        let child = map
            .entry(key)
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if !child.is_mapping() {
            debug!(key = %part, "--var replaces a non-mapping value");
            *child = Value::Mapping(Mapping::new());
        }
        current = child;
    }

    if let Value::Mapping(map) = current {
        if map.contains_key(last.as_str()) {
            debug!(key = %last, "--var overrides key");
        }
        map.insert(Value::String(last.clone()), Value::String(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_var_sets_nested_keys() {
        let vars = load_variables(
            &[],
            &["region=eu-west-1".to_string(), "db.size=large".to_string()],
            false,
        )
        .unwrap();

        assert_eq!(vars["region"], json!("eu-west-1"));
        assert_eq!(vars["db"], json!({"size": "large"}));
    }

    #[test]
    fn test_later_files_replace_top_level_keys() {
        let dir = tempfile::tempdir().unwrap();
        let base = write(&dir, "base.yaml", "db:\n  size: small\n  engine: postgres\n");
        let prod = write(&dir, "prod.yaml", "db:\n  size: large\n");

        let vars = load_variables(&[base, prod], &[], false).unwrap();
        assert_eq!(vars["db"], json!({"size": "large"}));
    }

    #[test]
    fn test_merge_keys_deep_merges_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = write(&dir, "base.yaml", "db:\n  size: small\n  engine: postgres\n");
        let prod = write(&dir, "prod.yaml", "db:\n  size: large\n");

        let vars = load_variables(&[base, prod], &[], true).unwrap();
        assert_eq!(vars["db"], json!({"size": "large", "engine": "postgres"}));
    }

    #[test]
    fn test_var_applies_after_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(&dir, "vars.yaml", "env: dev\nreplicas: 2\n");

        let vars = load_variables(&[file], &["env=prod".to_string()], false).unwrap();
        assert_eq!(vars["env"], json!("prod"));
        assert_eq!(vars["replicas"], json!(2));
    }

    #[test]
    fn test_invalid_var() {
        assert!(load_variables(&[], &["novalue".to_string()], false).is_err());
        assert!(load_variables(&[], &["a..b=1".to_string()], false).is_err());
    }

    #[test]
    fn test_var_file_must_be_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(&dir, "list.yaml", "- a\n- b\n");
        assert!(load_variables(&[file], &[], false).is_err());
    }
}
