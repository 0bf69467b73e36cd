//! Environment variable overrides with type checking.
//!
//! Every `TRADE_*` variable is parsed into the field it overrides. Bad
//! values are collected rather than failing on the first one, so a single
//! run reports every mistake.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while reading an override.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: &'static str,
        value: String,
    },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },
}

/// Override parser bound to one variable prefix.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Parser for the `TRADE_` prefix.
    pub fn new() -> Self {
        Self::with_prefix("TRADE_")
    }

    pub fn with_prefix(prefix: &'static str) -> Self {
        Self {
            prefix,
            errors: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn raw(&self, name: &str) -> Option<(String, String)> {
        let var = self.var_name(name);
        env::var(&var).ok().map(|value| (var, value))
    }

    /// Override `target` with a boolean.
    ///
    /// Accepts 1/true/yes/on and 0/false/no/off/"".
    pub fn bool(&mut self, name: &str, target: &mut bool) {
        let Some((var, value)) = self.raw(name) else {
            return;
        };
        match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => *target = true,
            "0" | "false" | "no" | "off" | "" => *target = false,
            _ => self.errors.push(EnvError::InvalidValue {
                var,
                expected: "boolean (true/false/1/0/yes/no)",
                value,
            }),
        }
    }

    /// Override `target` with a number inside `min..=max`.
    pub fn number<T>(&mut self, name: &str, target: &mut T, min: T, max: T)
    where
        T: FromStr + PartialOrd + ToString + Copy,
    {
        let Some((var, value)) = self.raw(name) else {
            return;
        };
        match value.trim().parse::<T>() {
            Ok(n) if n >= min && n <= max => *target = n,
            Ok(n) => self.errors.push(EnvError::OutOfRange {
                var,
                value: n.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            }),
            Err(_) => self.errors.push(EnvError::InvalidValue {
                var,
                expected: "number",
                value,
            }),
        }
    }

    pub fn string(&mut self, name: &str, target: &mut String) {
        if let Some((_, value)) = self.raw(name) {
            *target = value;
        }
    }

    /// Override an optional path, expanding a leading `~/`.
    ///
    /// An empty value clears the path.
    pub fn path(&mut self, name: &str, target: &mut Option<PathBuf>) {
        let Some((_, value)) = self.raw(name) else {
            return;
        };
        *target = if value.is_empty() {
            None
        } else {
            Some(expand_home(&value))
        };
    }

    /// Override a list from a comma-separated value.
    pub fn list<T: FromStr>(&mut self, name: &str, target: &mut Vec<T>) {
        let Some((var, value)) = self.raw(name) else {
            return;
        };
        let parsed: Result<Vec<T>, _> = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<T>)
            .collect();
        match parsed {
            Ok(items) => *target = items,
            Err(_) => self.errors.push(EnvError::InvalidValue {
                var,
                expected: "comma-separated list",
                value,
            }),
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn expand_home(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(stripped) => match dirs::home_dir() {
            Some(home) => home.join(stripped),
            None => PathBuf::from(value),
        },
        None => PathBuf::from(value),
    }
}
