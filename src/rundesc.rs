//! Run description storage and key-path lookup.
//!
//! The run description is a nested YAML mapping with heterogeneous values.
//! Lookups return `Result` so callers can pattern-match for legacy-key
//! fallback instead of treating absence as a crash; the `Req` wrapper
//! couples fatal lookups to rollback of the in-progress run directory.

use crate::fspath::{expanded_path, resolved_path};
use crate::prepare::fatal;
use anyhow::{Context, Result};
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// A parsed run description document.
#[derive(Debug)]
pub struct RunDesc {
    doc: Value,
}

/// Non-fatal lookup failure: the key path is absent from the document.
#[derive(Debug, Clone, thiserror::Error)]
#[error("\"{keys}\" key not found")]
pub struct KeyLookup {
    pub keys: String,
}

/// Render a key path the way it appears in error messages.
pub fn dotted(keys: &[&str]) -> String {
    keys.join(": ")
}

impl RunDesc {
    pub fn load(desc_file: &Path) -> Result<Self> {
        let text = fs::read_to_string(desc_file)
            .with_context(|| format!("read run description {}", desc_file.display()))?;
        Self::from_yaml(&text)
            .with_context(|| format!("parse run description {}", desc_file.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let doc = serde_yaml::from_str(text).context("parse run description YAML")?;
        Ok(Self { doc })
    }

    /// Traverse the nested mapping by successive keys.
    pub fn lookup(&self, keys: &[&str]) -> Result<&Value, KeyLookup> {
        let mut value = &self.doc;
        for key in keys {
            value = value.get(*key).ok_or_else(|| KeyLookup {
                keys: dotted(keys),
            })?;
        }
        Ok(value)
    }

    /// Try each key path in order; the error names the last path tried.
    pub fn lookup_first<'a>(&'a self, alternates: &[&[&str]]) -> Result<&'a Value, KeyLookup> {
        let mut last_miss = KeyLookup {
            keys: String::new(),
        };
        for keys in alternates {
            match self.lookup(keys) {
                Ok(value) => return Ok(value),
                Err(miss) => last_miss = miss,
            }
        }
        Err(last_miss)
    }
}

/// Required-value lookups with the fatal-configuration-error policy:
/// a miss logs a dotted-key message, rolls back the run directory when one
/// is under construction, and yields `PrepareError::Config`.
pub struct Req<'a> {
    desc: &'a RunDesc,
    run_dir: Option<&'a Path>,
}

impl<'a> Req<'a> {
    pub fn new(desc: &'a RunDesc, run_dir: Option<&'a Path>) -> Self {
        Self { desc, run_dir }
    }

    pub fn value(&self, keys: &[&str]) -> Result<&'a Value> {
        self.desc
            .lookup(keys)
            .map_err(|_| self.missing_key(&dotted(keys)))
    }

    pub fn first_of<'k>(
        &self,
        alternates: &[&'k [&'k str]],
    ) -> Result<(&'a Value, &'k [&'k str])> {
        for &keys in alternates {
            if let Ok(value) = self.desc.lookup(keys) {
                return Ok((value, keys));
            }
        }
        let last = alternates.last().copied().unwrap_or_default();
        Err(self.missing_key(&dotted(last)))
    }

    pub fn string(&self, keys: &[&str]) -> Result<String> {
        self.value(keys).and_then(|value| self.as_string(value, keys))
    }

    pub fn string_first(&self, alternates: &[&[&str]]) -> Result<String> {
        let (value, keys) = self.first_of(alternates)?;
        self.as_string(value, keys)
    }

    /// Value as a path with environment/user variables expanded.
    pub fn expanded(&self, keys: &[&str]) -> Result<PathBuf> {
        let text = self.string(keys)?;
        Ok(expanded_path(&text))
    }

    /// Value as an expanded, canonicalized path that must exist on disk.
    pub fn resolved(&self, keys: &[&str]) -> Result<PathBuf> {
        let text = self.string(keys)?;
        self.check_resolved(&text, keys)
    }

    pub fn resolved_first(&self, alternates: &[&[&str]]) -> Result<PathBuf> {
        let (value, keys) = self.first_of(alternates)?;
        let text = self.as_string(value, keys)?;
        self.check_resolved(&text, keys)
    }

    /// Like `resolved`, but an absent key is `None` rather than fatal;
    /// a present key naming a nonexistent path is still fatal.
    pub fn resolved_optional(&self, keys: &[&str]) -> Result<Option<PathBuf>> {
        match self.desc.lookup(keys) {
            Err(_) => Ok(None),
            Ok(value) => {
                let text = self.as_string(value, keys)?;
                self.check_resolved(&text, keys).map(Some)
            }
        }
    }

    fn check_resolved(&self, text: &str, keys: &[&str]) -> Result<PathBuf> {
        let path = resolved_path(text);
        if !path.exists() {
            return Err(fatal(
                self.run_dir,
                format!(
                    "{} path from \"{}\" key not found - please check your \
                     run description YAML file",
                    path.display(),
                    dotted(keys)
                ),
            ));
        }
        Ok(path)
    }

    fn as_string(&self, value: &Value, keys: &[&str]) -> Result<String> {
        match value {
            Value::String(text) => Ok(text.clone()),
            Value::Number(number) => Ok(number.to_string()),
            _ => Err(fatal(
                self.run_dir,
                format!(
                    "\"{}\" value must be a string - please check your \
                     run description YAML file",
                    dotted(keys)
                ),
            )),
        }
    }

    fn missing_key(&self, keys: &str) -> anyhow::Error {
        fatal(
            self.run_dir,
            format!("\"{keys}\" key not found - please check your run description YAML file"),
        )
    }
}
