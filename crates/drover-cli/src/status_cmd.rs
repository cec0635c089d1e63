//! The `drover status` command: read-only view of a project's durable
//! state.

use std::path::Path;

use anyhow::Result;

use drover_store::ProjectStore;

pub fn show(project_dir: &Path) -> Result<()> {
    let store = ProjectStore::new(project_dir);

    if !store.has_checklist() {
        println!("{}: no feature checklist yet (run has not initialized)", project_dir.display());
        return Ok(());
    }

    let checklist = store.load_checklist()?;
    let passing = checklist.passing_count();
    let total = checklist.len();
    println!("project: {}", project_dir.display());
    println!("features: {passing}/{total} passing");

    for (index, entry) in checklist.entries().iter().enumerate() {
        let mark = if entry.passes { "pass" } else { "    " };
        println!("  [{mark}] {:>3}. ({}) {}", index + 1, entry.category, entry.description);
    }

    match store.load_checkpoint()? {
        Some(checkpoint) => {
            println!(
                "checkpoint: iteration {}, updated {}",
                checkpoint.iteration,
                checkpoint.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            if let Some(marker) = &checkpoint.tree_marker {
                println!("tree: {marker}");
            }
        }
        None => println!("checkpoint: none (initializer has not completed)"),
    }

    // Journal consistency, so a corrupted rewrite is visible here
    // rather than discovered mid-run.
    let check = store.journal().verify(&checklist)?;
    if !check.is_consistent() {
        println!("warning: checklist does not replay from its journal:");
        for issue in &check.issues {
            println!("  - {issue}");
        }
    }

    Ok(())
}
