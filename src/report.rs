//! Operator-facing console output: banners, step headers, the final summary block
//! and the post-mutation convergence check.
use anyhow::Result;

use crate::error::UpkeepError;

const RULE: &str = "------------------------------------------------------------";

pub fn banner(title: &str, dry_run: bool) {
    println!("\n{RULE}\n{title}\n{RULE}");
    if dry_run {
        println!("Mode: DRY RUN (no data will be modified)\n");
    } else {
        println!("Mode: LIVE (data will be modified)\n");
    }
}

pub fn step(n: usize, title: &str) {
    println!("\n--- STEP {n}: {title} ---\n");
}

/// Labelled counters printed as the closing block of a run.
#[derive(Debug, Clone)]
pub struct Summary {
    title: String,
    dry_run: bool,
    lines: Vec<(String, String)>,
}

impl Summary {
    pub fn new(title: impl Into<String>, dry_run: bool) -> Self {
        Self {
            title: title.into(),
            dry_run,
            lines: Vec::new(),
        }
    }

    pub fn count(mut self, label: impl Into<String>, n: usize) -> Self {
        self.lines.push((label.into(), n.to_string()));
        self
    }

    pub fn line(mut self, label: impl Into<String>, value: impl ToString) -> Self {
        self.lines.push((label.into(), value.to_string()));
        self
    }

    pub fn render(&self) -> String {
        let width = self.lines.iter().map(|(l, _)| l.len()).max().unwrap_or(0);
        let mut out = format!("\n{RULE}\n{}", self.title);
        if self.dry_run {
            out.push_str(" [DRY RUN]");
        }
        out.push_str(&format!("\n{RULE}\n"));
        for (label, value) in &self.lines {
            out.push_str(&format!("  {label:<width$}  {value}\n"));
        }
        if self.dry_run {
            out.push_str("\nDRY RUN - no changes were made\n");
        }
        out.push_str(RULE);
        out
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }
}

/// Outcome of re-running a discovery count after the writes of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub remaining: i64,
    pub dry_run: bool,
}

impl Verification {
    pub fn new(remaining: i64, dry_run: bool) -> Self {
        Self { remaining, dry_run }
    }

    pub fn converged(&self) -> bool {
        self.remaining == 0
    }

    /// Remaining rows are expected in dry-run; in a live run they are a failure.
    pub fn check(&self, subject: &str) -> Result<()> {
        if self.converged() {
            println!("[OK] no {subject} left to fix");
            return Ok(());
        }
        if self.dry_run {
            println!("[DRY RUN] {} {subject} would still be pending", self.remaining);
            return Ok(());
        }
        println!("[WARN] still {} {subject} after the pass", self.remaining);
        Err(UpkeepError::NotConverged {
            remaining: self.remaining,
        }
        .into())
    }
}
