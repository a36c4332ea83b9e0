//! Command validation for the ops engine
//!
//! Every command string the engine might execute passes through this crate
//! first. Validation is layered: a unified forbidden catalog is checked
//! before the ordered whitelist of allowed command shapes, and forbidden
//! always outranks allowed. Validation is purely functional; the only
//! failure mode is an invalid built-in pattern at startup.

pub mod forbidden;
pub mod rules;

pub use forbidden::{ForbiddenCatalog, OverlayMatcher};
pub use rules::{builtin_rules, AllowRule, AllowedRisk};

use ops_common::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Risk classification of a single command string
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommandRisk {
    Safe,
    LowRisk,
    MediumRisk,
    HighRisk,
    Forbidden,
}

impl CommandRisk {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandRisk::Safe => "safe",
            CommandRisk::LowRisk => "low_risk",
            CommandRisk::MediumRisk => "medium_risk",
            CommandRisk::HighRisk => "high_risk",
            CommandRisk::Forbidden => "forbidden",
        }
    }
}

impl fmt::Display for CommandRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for one command string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub allowed: bool,
    pub risk: CommandRisk,
    /// Descriptive reason: the rule that matched, or why nothing did
    pub matched_rule: String,
    pub requires_approval: bool,
}

impl Verdict {
    fn forbidden(reason: String) -> Self {
        Self {
            allowed: false,
            risk: CommandRisk::Forbidden,
            matched_rule: reason,
            requires_approval: false,
        }
    }
}

/// Pattern-based allow/deny classifier for shell command strings
pub struct CommandValidator {
    forbidden: ForbiddenCatalog,
    rules: Vec<AllowRule>,
}

impl CommandValidator {
    /// Compile the built-in catalogs. Any invalid pattern is fatal.
    pub fn new() -> Result<Self> {
        Ok(Self {
            forbidden: ForbiddenCatalog::builtin()?,
            rules: builtin_rules()?,
        })
    }

    /// Classify a command string. Evaluation order is significant:
    /// empty check, forbidden catalog, then first whitelist match wins.
    pub fn validate(&self, command: &str) -> Verdict {
        let command = command.trim();

        if command.is_empty() {
            return Verdict::forbidden("Empty command".to_string());
        }

        if let Some(hit) = self.forbidden.match_command(command) {
            debug!(command, pattern = hit.pattern, "command matched forbidden pattern");
            return Verdict::forbidden(format!("Forbidden command pattern: {}", hit.pattern));
        }

        for rule in &self.rules {
            if rule.matches(command) {
                return Verdict {
                    allowed: true,
                    risk: rule.risk.as_command_risk(),
                    matched_rule: format!("Matched: {}", rule.name),
                    requires_approval: rule.requires_approval,
                };
            }
        }

        Verdict::forbidden("Command not in whitelist".to_string())
    }

    /// The policy engine's stricter overlay: substring and path scanning
    /// on a resolved action command.
    pub fn scan_overlay(&self, command: &str) -> Option<String> {
        self.forbidden.match_overlay(command)
    }

    /// Rule names grouped by risk class, for the control surface.
    pub fn list_allowed(&self) -> Vec<(&'static str, AllowedRisk, bool)> {
        self.rules
            .iter()
            .map(|r| (r.name, r.risk, r.requires_approval))
            .collect()
    }
}
