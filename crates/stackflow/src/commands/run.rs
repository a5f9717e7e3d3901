use crate::GlobalOpts;
use crate::output::{self, OutputFormat};
use crate::vars;
use anyhow::Context;
use colored::Colorize;
use stackflow_cloud::{LocalBackend, StackBackend};
use stackflow_core::{
    Command, Differ, ExecutionContext, StackflowError, build_graph, compile_plan, execute,
    find_project_root, load_stack_configs,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Load the project, compile `command` for `path` and run it
///
/// Returns whether every stack succeeded.
pub async fn handle(
    opts: &GlobalOpts,
    command: Command,
    path: &str,
    differ: Differ,
) -> anyhow::Result<bool> {
    let project_root = project_root(opts)?;
    info!(project_root = %project_root.display(), command = %command, path, "Starting");

    let variables = vars::load_variables(&opts.var_files, &opts.vars, opts.merge_keys)?;
    let settings = stackflow_config::load_settings(&project_root)
        .map_err(StackflowError::from)
        .context("failed to load settings")?;

    let mut ctx = ExecutionContext::new(&project_root)
        .with_settings(&settings)
        .with_differ(differ);
    if opts.max_concurrency.is_some() {
        ctx = ctx.with_max_concurrency(opts.max_concurrency);
    }

    // Construction errors abort before anything touches the backend
    let configs = load_stack_configs(&project_root, &variables)?;
    let graph = Arc::new(build_graph(configs)?);
    let plan = compile_plan(graph, command, path, opts.ignore_dependencies)?;
    let ctx = ctx.with_variables(variables);

    if command.is_mutating() && !opts.yes {
        print!("{}", output::render_plan(&plan));
        println!(
            "{}",
            "Nothing was changed. Re-run with --yes to apply.".yellow()
        );
        return Ok(true);
    }
    if opts.ignore_dependencies {
        warn!("Dependencies are ignored; stacks may run before the stacks they need");
    }

    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{}",
                "Interrupt received, waiting for running stacks to finish...".yellow()
            );
            cancel.cancel();
        }
    });

    let backend: Arc<dyn StackBackend> = Arc::new(LocalBackend::new(&project_root));
    info!(backend = backend.name(), "Executing plan");
    let result = execute(&plan, backend, &ctx).await;

    let rendered = output::render_result(&result, opts.output)?;
    match opts.output {
        OutputFormat::Text => print!("{rendered}"),
        _ => println!("{}", rendered.trim_end()),
    }

    Ok(result.is_success())
}

fn project_root(opts: &GlobalOpts) -> anyhow::Result<PathBuf> {
    match &opts.dir {
        Some(dir) => {
            if !dir.join(stackflow_core::discovery::CONFIG_DIR).is_dir() {
                return Err(StackflowError::ProjectRootNotFound(dir.clone()).into());
            }
            Ok(dir.clone())
        }
        None => Ok(find_project_root()?),
    }
}
