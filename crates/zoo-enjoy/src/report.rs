//! Append-only results log
//!
//! Every block is formatted in memory first and written with a single
//! `write_all`, so an interrupted process never leaves half a line behind.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::stats::{AgentAggregate, FinalAggregate, RunStats, Summary};

/// Plain-text log that is only ever appended to
#[derive(Debug, Clone)]
pub struct ResultsLog {
    path: PathBuf,
}

impl ResultsLog {
    /// Log at `path`; the file is created on first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `block`, which must consist of complete lines
    pub fn append(&self, block: &str) -> std::io::Result<()> {
        debug_assert!(block.is_empty() || block.ends_with('\n'));
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(block.as_bytes())
    }
}

/// `[a, b, c]` with full float precision
pub fn format_list(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|v| format!("{v:?}")).collect();
    format!("[{}]", items.join(", "))
}

fn titled(title: &str, values: &[f64]) -> String {
    format!("{title}: {}\n{}\n", Summary::of(values), format_list(values))
}

/// Header opening the block of agent `index`
pub fn agent_header(index: u32) -> String {
    format!("======== Agent {index} ========\n")
}

/// One line describing a finished run
pub fn run_line(label: &str, run: &RunStats) -> String {
    let mut line = format!(
        "Checkpoint {label}: {} episodes, reward {}, length {}",
        run.episodes(),
        run.reward(),
        run.length(),
    );
    if let Some(rate) = run.success_rate() {
        line.push_str(&format!(", success {:.2}%", rate * 100.0));
    }
    if run.interrupted {
        line.push_str(" (interrupted)");
    }
    line.push('\n');
    line
}

/// Per-agent block over its runs
pub fn global_block(agent: &AgentAggregate) -> String {
    [
        titled("Global reward", &agent.rewards),
        titled("Global std", &agent.stds),
        titled("Global values", &agent.values),
    ]
    .concat()
}

/// Cross-agent block
pub fn final_block(total: &FinalAggregate) -> String {
    [
        titled("Final reward", &total.rewards()),
        titled("Final std", &total.stds()),
        titled("Final global", &total.values()),
    ]
    .concat()
}
