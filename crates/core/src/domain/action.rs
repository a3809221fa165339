// Action Domain Model

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{DomainError, Result};

/// Dot-separated symbolic operation name, e.g. `req.verify`.
///
/// The first segment is the openssl subcommand; every following segment is
/// emitted as a dash-prefixed flag (`req.verify` -> `req -verify`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Action(String);

impl Action {
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if s.is_empty() {
            return Err(DomainError::InvalidAction(s));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First segment of the action
    pub fn subcommand(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    /// Subcommand token followed by one `-segment` token per remaining segment
    pub fn tokens(&self) -> Vec<String> {
        self.0
            .split('.')
            .enumerate()
            .map(|(i, segment)| {
                if i == 0 {
                    segment.to_string()
                } else {
                    format!("-{}", segment)
                }
            })
            .collect()
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Action {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Action {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.0
    }
}
