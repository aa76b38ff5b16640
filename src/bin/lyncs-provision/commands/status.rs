//! `lyncs-provision status` command
//!
//! Reports, per library, whether its markers are present. Reads only.

use anyhow::Result;
use serde_json::json;

use crate::cli::{GlobalArgs, MessageFormat, StatusArgs};
use crate::commands::load_session;
use provision::provision::orchestrator::candidate_roots;
use provision::provision::{locator, preview, PlannedAction};

pub fn execute(global: &GlobalArgs, args: StatusArgs) -> Result<()> {
    let session = load_session(global, &args.selection)?;
    let ctx = &session.ctx;
    let plan = preview(&session.graph, ctx);

    for (spec, entry) in session.graph.order().into_iter().zip(&plan) {
        let enabled = !matches!(entry.action, PlannedAction::GatedOut { .. });
        let roots = candidate_roots(spec, ctx);
        let location = match locator::locate(spec, roots.iter().copied()) {
            Some(location) => location,
            None => locator::check(spec, roots[0]),
        };
        let found = location.is_found();

        if args.message_format == MessageFormat::Json {
            println!(
                "{}",
                json!({
                    "library": spec.name,
                    "enabled": enabled,
                    "found": found,
                    "root": location.root,
                    "missing": location.missing,
                })
            );
            continue;
        }

        let label = match (enabled, found) {
            (_, true) => "found",
            (true, false) => "missing",
            (false, false) => "disabled",
        };
        println!("{:<12} {:<9} {}", spec.name, label, location.root.display());
        if enabled && !found {
            for marker in &location.missing {
                println!("{:<12} {:<9}   - {}", "", "", marker.display());
            }
        }
    }

    Ok(())
}
