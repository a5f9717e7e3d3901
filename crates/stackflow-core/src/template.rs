//! Template rendering
//!
//! Configuration files and `.j2`/`.tera` stack templates are rendered with
//! Tera before they are parsed or sent to the backend.

use crate::error::{Result, StackflowError};
use serde_json::{Map, Value};
use std::path::Path;
use tera::{Context, Tera};
use tracing::{debug, info};

/// Environment variables visible to templates, by prefix
const ALLOWED_ENV_PREFIXES: &[&str] = &["STACKFLOW_", "CI_", "APP_"];

/// File extensions rendered as templates; anything else is read verbatim
const TEMPLATE_EXTENSIONS: &[&str] = &["j2", "tera"];

/// Variable context
pub type Variables = Map<String, Value>;

/// Tera renderer with an accumulated context
pub struct TemplateProcessor {
    tera: Tera,
    context: Context,
}

impl TemplateProcessor {
    pub fn new() -> Self {
        Self {
            tera: Tera::default(),
            context: Context::new(),
        }
    }

    pub fn add_variable(&mut self, key: impl Into<String>, value: Value) {
        self.context.insert(key.into(), &value);
    }

    pub fn add_variables(&mut self, variables: Variables) {
        for (key, value) in variables {
            self.context.insert(key, &value);
        }
    }

    /// Expose filtered environment variables as `env.<NAME>`
    ///
    /// Only `STACKFLOW_*`, `CI_*` and `APP_*` are visible.
    #[tracing::instrument(skip(self))]
    pub fn add_env_variables(&mut self) {
        let env: Variables = std::env::vars()
            .filter(|(key, _)| {
                ALLOWED_ENV_PREFIXES
                    .iter()
                    .any(|prefix| key.starts_with(prefix))
            })
            .inspect(|(key, _)| debug!(key = %key, "Adding environment variable"))
            .map(|(key, value)| (key, Value::String(value)))
            .collect();

        info!(env_var_count = env.len(), "Added filtered environment variables");
        self.context.insert("env", &Value::Object(env));
    }

    pub fn render_str(&mut self, template: &str) -> Result<String> {
        self.tera
            .render_str(template, &self.context)
            .map_err(|e| StackflowError::TemplateRenderError(extract_tera_error_detail(&e)))
    }

    pub fn render_file(&mut self, path: &Path) -> Result<String> {
        let content = std::fs::read_to_string(path).map_err(|e| StackflowError::TemplateError {
            file: path.to_path_buf(),
            message: e.to_string(),
        })?;

        self.render_str(&content).map_err(|e| match e {
            StackflowError::TemplateRenderError(message) => StackflowError::TemplateError {
                file: path.to_path_buf(),
                message,
            },
            e => e,
        })
    }
}

impl Default for TemplateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a template file is rendered rather than read verbatim
pub fn is_template_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEMPLATE_EXTENSIONS.contains(&ext))
}

fn extract_tera_error_detail(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }
    let full_error = details.join(" | ");

    // "Variable `xxx` not found in context"
    if full_error.contains("not found in context")
        && let Some(start) = full_error.find("Variable `")
        && let Some(end) = full_error[start..].find("` not found")
    {
        let var_name = &full_error[start + 10..start + end];
        return format!(
            "Undefined variable: `{}`\nHint: pass it with --var or --var-file",
            var_name
        );
    }

    if full_error.contains("Filter") && full_error.contains("not found") {
        return format!("Undefined filter\nDetail: {full_error}");
    }

    full_error
}
