use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

/// The auto-accept switch, mirrored to a one-word file (`true`/`false`) so it
/// survives restarts.
#[derive(Debug)]
pub struct AutoAcceptFlag {
    path: PathBuf,
    enabled: bool,
}

impl AutoAcceptFlag {
    /// Reads the flag, creating the file with `false` when it is missing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            fs::write(path, false.to_string())
                .with_context(|| format!("failed to create {}", path.display()))?;
            return Ok(Self {
                path: path.to_path_buf(),
                enabled: false,
            });
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let enabled = match raw.trim().parse::<bool>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(
                    target: "admin",
                    path = %path.display(),
                    content = raw.trim(),
                    "unreadable auto-accept flag, assuming disabled"
                );
                false
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            enabled,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Persists the flipped value and returns it. The in-memory value only
    /// changes once the file is written.
    pub fn toggle(&mut self) -> Result<bool> {
        let next = !self.enabled;
        fs::write(&self.path, next.to_string())
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        self.enabled = next;
        Ok(next)
    }
}
