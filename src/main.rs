use anyhow::Result;
use clap::Parser;
use console::style;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use smalipatch::batch::{BatchOrchestrator, BatchSummary, FileReport, FileStatus};
use smalipatch::cli::{Cli, Command};
use smalipatch::config::{self, Config};
use smalipatch::error::PatchError;
use smalipatch::plan::{self, PatchPlan};
use smalipatch::presets::Preset;
use smalipatch::toolchain::Toolchain;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("smalipatch=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let mut config = config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Patch {
            presets,
            plan,
            root,
            dry_run,
            workers,
            json,
        } => {
            if let Some(root) = root {
                config.root = root;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            let plans = collect_plans(&presets, plan)?;
            run_patch(&config, plans, dry_run, json)
        }
        Command::Disassemble { dex, out_dir } => {
            let toolchain = Toolchain::from_config(&config);
            toolchain.check()?;
            toolchain.disassemble(&dex, &out_dir)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Assemble { smali_dir, out_dex } => {
            let toolchain = Toolchain::from_config(&config);
            toolchain.check()?;
            toolchain.assemble(&smali_dir, &out_dex)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Unpack { dir } => {
            let toolchain = Toolchain::from_config(&config);
            toolchain.check()?;
            Ok(print_tool_results(toolchain.disassemble_all(&dir)?))
        }
        Command::Repack { dir } => {
            let toolchain = Toolchain::from_config(&config);
            toolchain.check()?;
            Ok(print_tool_results(toolchain.assemble_all(&dir)?))
        }
    }
}

fn collect_plans(presets: &[Preset], plan_file: Option<PathBuf>) -> Result<Vec<PatchPlan>> {
    let mut plans: Vec<PatchPlan> = presets.iter().map(|preset| preset.plan()).collect();
    match plan_file {
        Some(path) => plans.extend(plan::load_plans(&path)?),
        None if presets.is_empty() => plans.extend(Preset::ALL.iter().map(|preset| preset.plan())),
        None => {}
    }
    Ok(plans)
}

fn run_patch(config: &Config, plans: Vec<PatchPlan>, dry_run: bool, json: bool) -> Result<ExitCode> {
    let orchestrator = BatchOrchestrator::from_config(config).dry_run(dry_run);
    let mut total = BatchSummary::default();
    let mut plan_reports = Vec::new();

    for plan in &plans {
        if plan.optional && !config.enable_mod {
            warn!(plan = %plan.name, "skipped, mods disabled");
            plan_reports.push(json!({ "name": plan.name, "ran": false }));
            continue;
        }
        let summary = orchestrator.run(&plan.targets, plan);
        plan_reports.push(json!({
            "name": plan.name,
            "ran": true,
            "patched": summary.patched,
            "unchanged": summary.unchanged,
            "skipped": summary.skipped,
            "failed": summary.failed,
        }));
        if !json {
            print_plan(&plan.name, &summary, dry_run);
        }
        total.merge(summary);
    }

    if json {
        let files: Vec<_> = total.files.iter().map(file_json).collect();
        let output = json!({
            "root": config.root.display().to_string(),
            "dry_run": dry_run,
            "patched": total.patched,
            "unchanged": total.unchanged,
            "skipped": total.skipped,
            "failed": total.failed,
            "plans": plan_reports,
            "files": files,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "\n{} {} patched, {} unchanged, {} skipped, {} failed",
            style("Summary:").bold(),
            style(total.patched).green(),
            total.unchanged,
            style(total.skipped).yellow(),
            style(total.failed).red()
        );
    }

    Ok(if total.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_plan(name: &str, summary: &BatchSummary, dry_run: bool) {
    println!("{}", style(format!("[{name}]")).cyan().bold());
    for file in &summary.files {
        let label = match file.status {
            FileStatus::Patched if dry_run => style("would patch").green(),
            FileStatus::Patched => style("patched").green(),
            FileStatus::Unchanged => style("unchanged").dim(),
            FileStatus::Skipped => style("not found").yellow(),
            FileStatus::Failed => style("failed").red(),
        };
        println!("  {label} {}", file.relative);

        let Some(result) = &file.result else {
            continue;
        };
        let mut rule_errors = result.rule_errors().peekable();
        if rule_errors.peek().is_none() {
            if let Some(error) = &result.error {
                println!("    {}", style(error).red());
            }
        }
        for (rule, error) in rule_errors {
            println!("    {} {rule}: {error}", style("rule failed").red());
        }
        if dry_run {
            if let Some(diff) = &result.diff {
                println!("{diff}");
            }
        }
    }
}

fn file_json(file: &FileReport) -> serde_json::Value {
    let result = file.result.as_ref();
    json!({
        "file": file.relative,
        "status": file.status,
        "error": result.and_then(|r| r.error.as_ref()).map(error_json),
        "rules": result.map(|r| {
            r.rules
                .iter()
                .map(|report| json!({
                    "rule": report.rule,
                    "outcome": format!("{:?}", report.outcome),
                }))
                .collect::<Vec<_>>()
        }),
    })
}

fn error_json(error: &PatchError) -> serde_json::Value {
    json!({ "kind": error.kind(), "message": error.to_string() })
}

fn print_tool_results(results: Vec<(PathBuf, Result<(), PatchError>)>) -> ExitCode {
    let mut failed = 0;
    for (path, result) in &results {
        match result {
            Ok(()) => println!("{} {}", style("ok").green(), path.display()),
            Err(error) => {
                failed += 1;
                println!("{} {}: {error}", style("failed").red(), path.display());
            }
        }
    }
    println!(
        "\n{} {} of {} succeeded",
        style("Summary:").bold(),
        results.len() - failed,
        results.len()
    );
    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
