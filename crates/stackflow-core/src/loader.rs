//! Configuration loader
//!
//! Ties discovery, template rendering and YAML parsing together:
//!
//! 1. discover stack files and their `config.yaml` chains
//! 2. render every file with Tera (`var`, `env`, `project_root`)
//! 3. deep-merge group configs, then the stack file, in order
//! 4. turn the merged mapping into a [`StackConfig`], parsing resolver tags

use crate::discovery::{DiscoveredStack, discover_stacks};
use crate::error::{Result, StackflowError};
use crate::model::{ParamValue, ResolverRef, StackConfig, StackId, literal_to_string};
use crate::template::{TemplateProcessor, Variables};
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

const STACK_OUTPUT_TAG: &str = "stack_output";
const STACK_NAME_TAG: &str = "stack_name";

/// Keys whose sequences accumulate down the config chain instead of replacing
const ACCUMULATING_KEYS: &[&str] = &["dependencies"];

/// Load every stack below `<project_root>/config`
#[instrument(skip(project_root, vars), fields(project_root = %project_root.display()))]
pub fn load_stack_configs(project_root: &Path, vars: &Variables) -> Result<Vec<StackConfig>> {
    debug!("Step 1: Discovering stack files");
    let discovered = discover_stacks(project_root)?;

    debug!("Step 2: Preparing template processor");
    let mut processor = prepare_template_processor(project_root, vars);

    debug!("Step 3: Rendering and merging configuration");
    let mut group_cache: HashMap<PathBuf, Mapping> = HashMap::new();
    let mut configs = Vec::with_capacity(discovered.len());
    for stack in &discovered {
        let merged = merged_mapping(stack, &mut processor, &mut group_cache)?;
        configs.push(build_stack_config(stack, merged)?);
    }

    info!(stacks = configs.len(), "Project loaded successfully");
    Ok(configs)
}

fn prepare_template_processor(project_root: &Path, vars: &Variables) -> TemplateProcessor {
    let mut processor = TemplateProcessor::new();
    processor.add_variable(
        "project_root",
        serde_json::Value::String(project_root.to_string_lossy().into_owned()),
    );
    processor.add_env_variables();
    processor.add_variable("var", serde_json::Value::Object(vars.clone()));
    processor
}

fn merged_mapping(
    stack: &DiscoveredStack,
    processor: &mut TemplateProcessor,
    group_cache: &mut HashMap<PathBuf, Mapping>,
) -> Result<Mapping> {
    let mut merged = Mapping::new();
    for group in &stack.group_configs {
        let mapping = match group_cache.get(group) {
            Some(mapping) => mapping.clone(),
            None => {
                let mapping = render_mapping(group, processor)?;
                group_cache.insert(group.clone(), mapping.clone());
                mapping
            }
        };
        merge_config(&mut merged, mapping);
    }
    drop_inherited_self_reference(&mut merged, &stack.id);
    merge_config(&mut merged, render_mapping(&stack.path, processor)?);
    Ok(merged)
}

/// A group config listing one of its own members does not make that member
/// depend on itself. Self-references written in the stack file are kept.
fn drop_inherited_self_reference(merged: &mut Mapping, id: &StackId) {
    if let Some(Value::Sequence(dependencies)) = merged.get_mut("dependencies") {
        dependencies.retain(|dep| {
            dep.as_str()
                .is_none_or(|reference| StackId::from_reference(reference) != *id)
        });
    }
}

fn render_mapping(path: &Path, processor: &mut TemplateProcessor) -> Result<Mapping> {
    let rendered = processor.render_file(path)?;
    if rendered.trim().is_empty() {
        return Ok(Mapping::new());
    }
    match serde_yaml::from_str::<Value>(&rendered) {
        Ok(Value::Mapping(mapping)) => Ok(mapping),
        Ok(Value::Null) => Ok(Mapping::new()),
        Ok(_) => Err(StackflowError::ConfigFile {
            path: path.to_path_buf(),
            message: "top level must be a mapping".to_string(),
        }),
        Err(e) => Err(StackflowError::ConfigFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

/// Merge one level of configuration on top of another
fn merge_config(base: &mut Mapping, overlay: Mapping) {
    for (key, value) in overlay {
        let accumulates = key
            .as_str()
            .is_some_and(|k| ACCUMULATING_KEYS.contains(&k));
        match (base.get_mut(&key), value) {
            (Some(Value::Sequence(existing)), Value::Sequence(more)) if accumulates => {
                for item in more {
                    if !existing.contains(&item) {
                        existing.push(item);
                    }
                }
            }
            (Some(existing), value) => deep_merge(existing, value),
            (None, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Recursive merge: mappings merge key by key, anything else is replaced
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn build_stack_config(stack: &DiscoveredStack, mut merged: Mapping) -> Result<StackConfig> {
    let path = &stack.path;

    let template_path: PathBuf =
        take(&mut merged, "template_path", path)?.ok_or_else(|| StackflowError::ConfigFile {
            path: path.clone(),
            message: "missing required key 'template_path'".to_string(),
        })?;
    let project_code: Option<String> = take(&mut merged, "project_code", path)?;
    let external_name = take::<String>(&mut merged, "stack_name", path)?
        .unwrap_or_else(|| stack.id.default_external_name(project_code.as_deref()));

    let mut config = StackConfig::new(stack.id.clone(), template_path).with_external_name(external_name);

    let dependencies: Vec<String> = take(&mut merged, "dependencies", path)?.unwrap_or_default();
    config.dependencies = dependencies.iter().map(|d| StackId::from_reference(d)).collect();

    if let Some(parameters) = merged.remove("parameters") {
        config.parameters = parse_parameters(parameters, path)?;
    }
    if let Some(user_data) = merged.remove("user_data") {
        config.user_data = yaml_to_json(user_data, path)?;
    }

    let tags: BTreeMap<String, serde_json::Value> = take(&mut merged, "stack_tags", path)?.unwrap_or_default();
    config.tags = tags
        .into_iter()
        .map(|(k, v)| (k, literal_to_string(&v)))
        .collect();

    config.protect = take(&mut merged, "protect", path)?.unwrap_or(false);
    config.region = take(&mut merged, "region", path)?;

    for key in merged.keys().filter_map(Value::as_str) {
        debug!(stack = %stack.id, key, "Ignoring unrecognised key");
    }

    debug!(
        stack = %config.id,
        external_name = %config.external_name,
        dependencies = config.dependencies.len(),
        parameters = config.parameters.len(),
        "Built stack config"
    );
    Ok(config)
}

fn take<T: DeserializeOwned>(map: &mut Mapping, key: &str, path: &Path) -> Result<Option<T>> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_yaml::from_value(value)
            .map(Some)
            .map_err(|e| StackflowError::ConfigFile {
                path: path.to_path_buf(),
                message: format!("invalid '{key}': {e}"),
            }),
    }
}

fn parse_parameters(value: Value, path: &Path) -> Result<BTreeMap<String, ParamValue>> {
    let Value::Mapping(mapping) = value else {
        return Err(StackflowError::ConfigFile {
            path: path.to_path_buf(),
            message: "'parameters' must be a mapping".to_string(),
        });
    };

    let mut parameters = BTreeMap::new();
    for (key, value) in mapping {
        let key = key
            .as_str()
            .ok_or_else(|| StackflowError::ConfigFile {
                path: path.to_path_buf(),
                message: "parameter names must be strings".to_string(),
            })?
            .to_string();
        parameters.insert(key, parse_param_value(value, path)?);
    }
    Ok(parameters)
}

/// Parse one parameter value, turning resolver tags into [`ResolverRef`]s
pub fn parse_param_value(value: Value, path: &Path) -> Result<ParamValue> {
    match value {
        Value::Tagged(tagged) => {
            let argument = tagged.value.as_str().ok_or_else(|| StackflowError::ConfigFile {
                path: path.to_path_buf(),
                message: format!("resolver {} takes a string argument", tagged.tag),
            })?;
            if tagged.tag == STACK_OUTPUT_TAG {
                let (source, key) =
                    argument
                        .split_once("::")
                        .ok_or_else(|| StackflowError::ConfigFile {
                            path: path.to_path_buf(),
                            message: format!(
                                "!stack_output expects '<stack>::<OutputKey>', got '{argument}'"
                            ),
                        })?;
                Ok(ParamValue::Resolver(ResolverRef::output(
                    StackId::from_reference(source),
                    key.trim(),
                )))
            } else if tagged.tag == STACK_NAME_TAG {
                Ok(ParamValue::Resolver(ResolverRef::external_name(
                    StackId::from_reference(argument),
                )))
            } else {
                Err(StackflowError::ConfigFile {
                    path: path.to_path_buf(),
                    message: format!("unknown resolver {}", tagged.tag),
                })
            }
        }
        Value::Sequence(items) => {
            let items = items
                .into_iter()
                .map(|item| parse_param_value(item, path))
                .collect::<Result<Vec<_>>>()?;
            if items.iter().all(|item| matches!(item, ParamValue::Literal(_))) {
                let literals = items
                    .into_iter()
                    .filter_map(|item| match item {
                        ParamValue::Literal(v) => Some(v),
                        _ => None,
                    })
                    .collect();
                Ok(ParamValue::Literal(serde_json::Value::Array(literals)))
            } else {
                Ok(ParamValue::List(items))
            }
        }
        other => Ok(ParamValue::Literal(yaml_to_json(other, path)?)),
    }
}

fn yaml_to_json(value: Value, path: &Path) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StackflowError::ConfigFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
