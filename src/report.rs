//! Run reporting
//!
//! A [`Reporter`] is created once per process run and handed to every
//! pipeline entry point. Each message is printed to stdout, emitted as a
//! `tracing` event and, when a log file is configured, appended to it as
//!
//! ```text
//! 2024-05-01-14:03:22    INFO: Accuracy d1-d2: 0.8125
//! ```
//!
//! `new_exp` messages start with three blank lines to separate runs in a
//! shared log file. Reporting an error never aborts the process; callers
//! propagate their `Result` as usual.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H:%M:%S";

/// Kind of a reported message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    NewExp,
    Info,
    Warning,
    Error,
}

impl MessageKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewExp => "new_exp",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Format one log-file line
pub fn format_message(kind: MessageKind, timestamp: &str, message: &str) -> String {
    let prefix = if kind == MessageKind::NewExp { "\n\n\n" } else { "" };
    format!(
        "{}{}    {}: {}\n",
        prefix,
        timestamp,
        kind.name().to_uppercase(),
        message
    )
}

/// Console + log-file reporter
#[derive(Debug, Clone)]
pub struct Reporter {
    log_path: Option<PathBuf>,
    echo: bool,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter {
    /// Report to stdout only
    pub fn new() -> Self {
        Self {
            log_path: None,
            echo: true,
        }
    }

    /// Report to stdout and append to `dir/file_name`
    pub fn with_log_file(dir: &Path, file_name: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
        Ok(Self {
            log_path: Some(dir.join(file_name)),
            echo: true,
        })
    }

    /// Stop printing to stdout (log file and tracing only)
    pub fn silent(mut self) -> Self {
        self.echo = false;
        self
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn new_exp(&self, message: &str) {
        self.report(MessageKind::NewExp, message);
    }

    pub fn info(&self, message: &str) {
        self.report(MessageKind::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.report(MessageKind::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.report(MessageKind::Error, message);
    }

    pub fn report(&self, kind: MessageKind, message: &str) {
        if self.echo {
            println!("{}", message);
        }

        match kind {
            MessageKind::Warning => tracing::warn!(kind = kind.name(), "{}", message),
            MessageKind::Error => tracing::error!(kind = kind.name(), "{}", message),
            MessageKind::NewExp | MessageKind::Info => {
                tracing::debug!(kind = kind.name(), "{}", message)
            }
        }

        if let Some(path) = &self.log_path {
            let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
            let line = format_message(kind, &timestamp, message);
            if let Err(e) = append(path, &line) {
                tracing::warn!("Failed to write log file {}: {}", path.display(), e);
            }
        }
    }
}

fn append(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}
