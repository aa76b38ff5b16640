//! `lyncs-provision clean` command

use anyhow::Result;

use crate::cli::{CleanArgs, GlobalArgs, SelectionArgs};
use crate::commands::load_session;
use provision::util::fs::remove_dir_all_if_exists;

pub fn execute(global: &GlobalArgs, args: CleanArgs) -> Result<()> {
    let selection = SelectionArgs {
        defines: Vec::new(),
        only: args.only.clone(),
    };
    let session = load_session(global, &selection)?;
    let ctx = &session.ctx;

    if args.only.is_empty() {
        remove_dir_all_if_exists(&ctx.scratch_root)?;
        eprintln!("     Removed {}", ctx.scratch_root.display());
    } else {
        for spec in session.graph.order() {
            if !args.only.contains(&spec.name) {
                continue;
            }
            let scratch = ctx.scratch_dir(spec);
            remove_dir_all_if_exists(&scratch)?;
            eprintln!("     Removed {}", scratch.display());
        }
    }

    if args.install {
        remove_dir_all_if_exists(&ctx.install_root)?;
        eprintln!("     Removed {}", ctx.install_root.display());
    }

    Ok(())
}
