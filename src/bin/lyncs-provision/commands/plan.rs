//! `lyncs-provision plan` command

use anyhow::Result;

use crate::cli::{GlobalArgs, PlanArgs};
use crate::commands::load_session;
use provision::provision::preview;

pub fn execute(global: &GlobalArgs, args: PlanArgs) -> Result<()> {
    let session = load_session(global, &args.selection)?;
    let ctx = &session.ctx;

    println!("manifest:     {}", session.manifest.path.display());
    println!("install root: {}", ctx.install_root.display());
    println!("scratch root: {}", ctx.scratch_root.display());
    println!("build type:   {}", ctx.build_type);
    println!();

    for entry in preview(&session.graph, ctx) {
        if entry.requires.is_empty() {
            println!("{}: {}", entry.library, entry.action);
        } else {
            println!(
                "{} (requires {}): {}",
                entry.library,
                entry.requires.join(", "),
                entry.action
            );
        }
    }

    Ok(())
}
