//! `lyncs-provision provision` command

use std::time::Instant;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::{GlobalArgs, MessageFormat, ProvisionArgs};
use crate::commands::load_session;
use provision::provision::{Orchestrator, ProvisionEvent, ProvisionState, SystemSteps};
use provision::util::diagnostic::emit;

/// Returns `Ok(false)` when a non-optional library failed.
pub fn execute(global: &GlobalArgs, args: ProvisionArgs) -> Result<bool> {
    let mut session = load_session(global, &args.selection)?;
    if let Some(jobs) = args.jobs {
        session.ctx.jobs = jobs.max(1);
    }
    if args.offline {
        session.ctx.offline = true;
    }
    let ctx = &session.ctx;
    let json = args.message_format == MessageFormat::Json;

    let progress = if json || session.graph.is_empty() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(session.graph.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    };

    let observer = |event: &ProvisionEvent| {
        if json {
            println!("{}", event.to_json());
            return;
        }
        if let ProvisionEvent::LibraryState {
            library, state, ..
        } = event
        {
            match state.as_str() {
                "fetching" | "patching" | "building" => {
                    progress.set_message(format!("{} ({})", library, state));
                }
                "verified" | "gated-out" | "failed" => progress.inc(1),
                _ => {}
            }
        }
    };

    let start = Instant::now();
    let steps = SystemSteps;
    let report = Orchestrator::new(ctx, &steps)
        .with_observer(&observer)
        .run(&session.graph);
    let elapsed = start.elapsed();
    progress.finish_and_clear();

    if json {
        println!(
            "{}",
            ProvisionEvent::finished(&report, elapsed.as_millis() as u64).to_json()
        );
    } else {
        for outcome in &report.outcomes {
            match &outcome.state {
                ProvisionState::Verified(result) => eprintln!(
                    "{:>12} {} ({}, {})",
                    "Found",
                    outcome.library,
                    result.origin,
                    result.root.display()
                ),
                ProvisionState::GatedOut { reason } => {
                    eprintln!("{:>12} {} ({})", "Skipped", outcome.library, reason)
                }
                ProvisionState::Failed(err) => eprintln!(
                    "{:>12} {} ({})",
                    "Failed",
                    outcome.library,
                    err.sub_step()
                ),
                other => eprintln!("{:>12} {} ({})", "Unsettled", outcome.library, other),
            }
        }
    }

    if !args.no_export {
        let path = args
            .export_file
            .clone()
            .unwrap_or_else(|| args.export_format.default_path(&ctx.install_root));
        args.export_format.write(&report.exports(), &path)?;
        tracing::debug!("exported results to {}", path.display());
    }

    if let Some(failure) = report.first_failure() {
        emit(&failure.to_diagnostic(), session.gctx.color());
    }

    if !report.success() {
        eprintln!(
            "{:>12} {} librar{} failed after {:.2}s",
            "Error",
            report.count("failed"),
            if report.count("failed") == 1 { "y" } else { "ies" },
            elapsed.as_secs_f64()
        );
        return Ok(false);
    }

    if !json {
        eprintln!(
            "    Finished provisioning {} librar{} ({} skipped) in {:.2}s",
            report.count("verified"),
            if report.count("verified") == 1 { "y" } else { "ies" },
            report.count("gated-out"),
            elapsed.as_secs_f64()
        );
    }
    Ok(true)
}
