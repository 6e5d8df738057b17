//! CLI output formatting

use crate::{
    core::{state::Outcome, Pipeline, Verdict},
    execution::{ExecutionEvent, ExecutionReport},
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format an instance outcome for display
pub fn format_outcome(outcome: Outcome) -> String {
    match outcome {
        Outcome::Pending => style("PENDING").dim().to_string(),
        Outcome::Running => style("RUNNING").yellow().to_string(),
        Outcome::Success => style("SUCCESS").green().to_string(),
        Outcome::Failure => style("FAILURE").red().to_string(),
        Outcome::Skipped => style("SKIPPED").dim().to_string(),
        Outcome::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a verdict for display
pub fn format_verdict(verdict: Verdict) -> String {
    match verdict {
        Verdict::Success => style("SUCCESS").green().bold().to_string(),
        Verdict::Failure => style("FAILURE").red().bold().to_string(),
        Verdict::Cancelled => style("CANCELLED").yellow().bold().to_string(),
    }
}

/// Format a run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let icon = match summary.verdict {
        Verdict::Success => CHECK,
        Verdict::Failure => CROSS,
        Verdict::Cancelled => WARN,
    };

    format!(
        "{} {} - {} - {} ({}/{} succeeded) - {} on {} - {}",
        icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.pipeline_name).bold(),
        format_verdict(summary.verdict),
        summary.succeeded,
        summary.total(),
        summary.event,
        if summary.branch.is_empty() { "-" } else { &summary.branch },
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            run_id,
            pipeline_name,
            instances,
        } => format!(
            "{} Starting pipeline {} ({}, {} instances)",
            ROCKET,
            style(pipeline_name).bold(),
            style(&run_id.to_string()[..8]).dim(),
            instances
        ),
        ExecutionEvent::InstanceStarted { instance } => {
            format!("{} {}", SPINNER, style(instance).cyan())
        }
        ExecutionEvent::InstanceFinished {
            instance,
            outcome: Outcome::Success,
            ..
        } => format!("{} {}", CHECK, style(instance).green()),
        ExecutionEvent::InstanceFinished {
            instance,
            outcome,
            reason,
        } => format!(
            "{} {} {}: {}",
            CROSS,
            style(instance).red(),
            format_outcome(*outcome),
            style(reason.as_deref().unwrap_or("no reason given")).dim()
        ),
        ExecutionEvent::InstanceSkipped { instance, reason } => {
            format!("{} {} ({})", SKIP, style(instance).dim(), style(reason).dim())
        }
        ExecutionEvent::InstanceCancelled { instance } => {
            format!("{} {} cancelled", WARN, style(instance).yellow())
        }
        ExecutionEvent::FailFastTriggered { instance } => format!(
            "{} Fail-fast triggered by {}",
            WARN,
            style(instance).red()
        ),
        ExecutionEvent::PipelineCompleted { run_id, verdict } => format!(
            "{} Pipeline ({}) finished: {}",
            INFO,
            style(&run_id.to_string()[..8]).dim(),
            format_verdict(*verdict)
        ),
    }
}

/// Format the final report: one line per non-success instance
pub fn format_report(report: &ExecutionReport) -> String {
    let mut lines = vec![format!(
        "{} {} {}",
        if report.verdict == Verdict::Success { CHECK } else { CROSS },
        style(&report.pipeline_name).bold(),
        format_verdict(report.verdict)
    )];

    for inst in report.non_success() {
        let mut line = format!("  {} {}", format_outcome(inst.outcome), inst.name);
        if !inst.critical {
            line.push_str(&style(" [non-critical]").dim().to_string());
        }
        if let Some(reason) = &inst.reason {
            line.push_str(&format!(" - {}", style(reason).dim()));
        }
        lines.push(line);
    }
    for job in &report.collapsed_jobs {
        lines.push(format!(
            "  {} {} - {}",
            format_outcome(Outcome::Skipped),
            job.job_id,
            style(&job.reason).dim()
        ));
    }
    for warning in &report.warnings {
        lines.push(format!("  {}{}", WARN, style(warning).yellow()));
    }
    if let Some(post) = &report.post_run {
        lines.push(format!(
            "  post-run {}: {}",
            style(&post.name).bold(),
            format_outcome(post.outcome)
        ));
    }

    lines.join("\n")
}

/// Format the dispatch plan of a pipeline
/// Summary of a valid pipeline: sizes and the topological order
pub fn format_validation(pipeline: &Pipeline) -> String {
    let mut lines = vec![
        format!("{} Pipeline configuration is valid!", CHECK),
        format!("  Name: {}", style(&pipeline.name).bold()),
        format!("  Jobs: {}", style(pipeline.definitions().len()).cyan()),
        format!("  Instances: {}", style(pipeline.instances.len()).cyan()),
        format!("  Order: {}", pipeline.graph().order().join(" -> ")),
    ];
    if !pipeline.collapsed.is_empty() {
        lines.push(format!(
            "  Collapsed: {}",
            style(pipeline.collapsed.keys().cloned().collect::<Vec<_>>().join(", ")).yellow()
        ));
    }
    lines.join("\n")
}

pub fn format_plan(pipeline: &Pipeline) -> String {
    let mut order: Vec<usize> = (0..pipeline.instances.len()).collect();
    order.sort_by_key(|&idx| pipeline.dispatch_key(idx));

    let mut lines = vec![format!(
        "{} {} ({} instances)",
        INFO,
        style(&pipeline.name).bold(),
        pipeline.instances.len()
    )];
    for idx in order {
        let inst = &pipeline.instances[idx];
        let rank = pipeline.graph().rank(&inst.job_id);
        let deps = pipeline.graph().dependencies(&inst.job_id);
        let mut line = format!("  [{}] {}", rank, style(inst.name()).cyan());
        if !deps.is_empty() {
            line.push_str(&format!(" <- {}", deps.join(", ")));
        }
        if let Some(def) = pipeline.definition(&inst.job_id) {
            line.push_str(&format!(" if {}", style(&def.condition).dim()));
        }
        if let Some(chain) = pipeline.cache_chain(idx) {
            line.push_str(&format!(" cache {}", style(chain.keys.join(" | ")).dim()));
        }
        lines.push(line);
    }
    for (job, reason) in &pipeline.collapsed {
        lines.push(format!("  {} {} ({})", SKIP, style(job).dim(), reason));
    }
    lines.join("\n")
}
