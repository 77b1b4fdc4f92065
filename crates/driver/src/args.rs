// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Normalised mount-s3 argument set.
//!
//! User mount options arrive free-form from the orchestrator (`region
//! us-east-1`, `--allow-other`, `uid=1000`...). They are normalised into
//! the `--key=value` shape mount-s3 takes, dangerous flags are dropped,
//! fstab-style options are rejected, and the set is deduplicated while
//! preserving order.

use thiserror::Error;

/// Flags users may not pass: they would detach the process from the
/// supervisor or never mount at all.
const DISALLOWED: &[&str] = &["--foreground", "-f", "--help", "-h", "--version", "-v"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgsError {
    #[error("fstab-style option {0:?} is not supported")]
    FstabStyle(String),
}

/// Ordered, deduplicated argument list for the FUSE process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountArgs {
    args: Vec<String>,
}

impl MountArgs {
    /// Normalise raw mount flags.
    pub fn parse<I, S>(flags: I) -> Result<Self, ArgsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = MountArgs::default();
        for raw in flags {
            let trimmed = raw.as_ref().trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut arg = trimmed.split_whitespace().collect::<Vec<_>>().join("=");
            if !arg.starts_with('-') {
                arg = format!("--{}", arg);
            }
            if DISALLOWED.contains(&key_of(&arg)) {
                continue;
            }
            if arg.starts_with("-o") && !arg.starts_with("--") {
                return Err(ArgsError::FstabStyle(arg));
            }
            args.push_if_absent(&arg);
        }
        Ok(args)
    }

    /// Whether any argument has this key (`--gid` matches both `--gid` and
    /// `--gid=5`).
    pub fn has_key(&self, key: &str) -> bool {
        self.args.iter().any(|arg| key_of(arg) == key)
    }

    /// Value of `--key=value`, if the key is present.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|arg| key_of(arg) == key)
            .map(|arg| arg.split_once('=').map(|(_, v)| v).unwrap_or(""))
    }

    /// Remove every argument with this key, returning the first removed
    /// value (empty string for a bare flag).
    pub fn remove_key(&mut self, key: &str) -> Option<String> {
        let value = self.value_of(key).map(str::to_owned);
        self.args.retain(|arg| key_of(arg) != key);
        value
    }

    /// Append unless an argument with the same key already exists.
    pub fn push_if_absent(&mut self, arg: &str) {
        if !self.has_key(key_of(arg)) {
            self.args.push(arg.to_string());
        }
    }

    pub fn push(&mut self, arg: String) {
        self.args.push(arg);
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.args
    }
}

fn key_of(arg: &str) -> &str {
    arg.split_once('=').map(|(k, _)| k).unwrap_or(arg)
}

#[cfg(test)]
#[path = "args_tests.rs"]
mod tests;
