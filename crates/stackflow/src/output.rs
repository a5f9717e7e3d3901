//! Rendering of plans and plan results

use clap::ValueEnum;
use colored::Colorize;
use stackflow_core::{ActionOutput, Plan, PlanResult, StackOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Yaml,
    Json,
}

/// Batches a mutating command would run
pub fn render_plan(plan: &Plan) -> String {
    let mut out = format!(
        "{} {} stack(s) in {} batch(es):\n",
        plan.command().to_string().bold(),
        plan.len(),
        plan.batches().len()
    );
    for batch in plan.batches() {
        let stacks: Vec<&str> = batch.stacks.iter().map(|id| id.as_str()).collect();
        out.push_str(&format!("  {}. {}\n", batch.index + 1, stacks.join(", ").cyan()));
    }
    out
}

pub fn render_result(result: &PlanResult, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(result)?,
        OutputFormat::Yaml => serde_yaml::to_string(result)?,
        OutputFormat::Text => render_text(result),
    })
}

fn render_text(result: &PlanResult) -> String {
    let mut out = String::new();

    for (id, outcome) in &result.stacks {
        let label = match outcome {
            StackOutcome::Succeeded { .. } => outcome.label().green(),
            StackOutcome::Failed { .. } => outcome.label().red().bold(),
            StackOutcome::Skipped { .. } => outcome.label().yellow(),
        };
        out.push_str(&format!("{} {}", id.as_str().cyan().bold(), label));

        let detail = match outcome {
            StackOutcome::Succeeded { value } => render_value(value),
            StackOutcome::Failed { kind, message } => format!("[{kind}] {message}"),
            StackOutcome::Skipped { reason } => reason.to_string(),
        };
        if detail.contains('\n') {
            out.push('\n');
            for line in detail.lines() {
                out.push_str("  ");
                out.push_str(line);
                out.push('\n');
            }
        } else {
            out.push_str(": ");
            out.push_str(&detail);
            out.push('\n');
        }
    }

    let summary = result.summary();
    out.push_str(&format!(
        "\n{}: {} succeeded, {} failed, {} skipped\n",
        result.command,
        summary.succeeded.to_string().green(),
        summary.failed.to_string().red(),
        summary.skipped.to_string().yellow()
    ));
    out
}

fn render_value(value: &ActionOutput) -> String {
    match value {
        ActionOutput::Outputs(outputs) if !outputs.is_empty() => outputs
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n"),
        ActionOutput::Outputs(_) => "(no outputs)".to_string(),
        other => other.to_string(),
    }
}
