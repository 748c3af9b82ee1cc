//! Self-check command

use anyhow::{Result, bail};
use weave_template::selfcheck;

pub fn execute() -> Result<()> {
    let outcomes = selfcheck::run();
    let failed: Vec<_> = outcomes.iter().filter(|o| !o.passed()).collect();

    for outcome in &outcomes {
        match &outcome.failure {
            None => eprintln!("ok      {}", outcome.name),
            Some(failure) => eprintln!("FAILED  {}: {failure}", outcome.name),
        }
    }

    if !failed.is_empty() {
        bail!("{} of {} checks failed", failed.len(), outcomes.len());
    }
    eprintln!("{} checks passed", outcomes.len());
    Ok(())
}
