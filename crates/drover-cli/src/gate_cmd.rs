//! The `drover gate-check` command: evaluate one command against the
//! security gate, for operators tuning or auditing the policy.

use std::path::Path;

use anyhow::Result;

use drover_core::gate;

pub fn check(command: &str, dir: &Path) -> Result<()> {
    let decision = gate::evaluate(command, dir, None);

    let verdict = if decision.allowed { "ALLOW" } else { "DENY" };
    println!("{verdict}: {}", decision.normalized_command);
    println!("reason: {}", decision.reason);

    if !decision.allowed {
        std::process::exit(1);
    }
    Ok(())
}
