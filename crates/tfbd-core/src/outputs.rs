//! Step outputs for the workflow host (`$GITHUB_OUTPUT`).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::domain::Result;

/// `name=value`, or a heredoc with a random delimiter for multi-line values.
pub fn format_output(name: &str, value: &str) -> String {
    if value.contains('\n') || value.contains('\r') {
        let delimiter = format!("ghadelimiter_{}", uuid::Uuid::new_v4());
        format!("{name}<<{delimiter}\n{value}\n{delimiter}\n")
    } else {
        format!("{name}={value}\n")
    }
}

/// Appends outputs to a file. Without a file outputs are only logged.
#[derive(Debug, Clone, Default)]
pub struct OutputWriter {
    path: Option<PathBuf>,
}

impl OutputWriter {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var_os("GITHUB_OUTPUT").map(PathBuf::from))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set(&self, name: &str, value: impl AsRef<str>) -> Result<()> {
        let value = value.as_ref();
        debug!(output = name, value = value, "step output");
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(format_output(name, value).as_bytes())?;
        Ok(())
    }

    /// Write `value` as compact JSON, e.g. a list of var files.
    pub fn set_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        self.set(name, serde_json::to_string(value)?)
    }

    pub fn set_bool(&self, name: &str, value: bool) -> Result<()> {
        self.set(name, if value { "true" } else { "false" })
    }
}
