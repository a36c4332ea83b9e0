//! Declarative action catalog
//!
//! Action definitions are loaded from a directory of TOML files at startup
//! and immutable afterwards. The loader is strict: unknown keys, unknown
//! precondition or safety-check types, non-positive timeouts, duplicate
//! names and command templates that fail validation all refuse startup.

use once_cell::sync::Lazy;
use ops_common::{Error, Result, RiskLevel, Tier};
use ops_validator::CommandValidator;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder pattern is valid"));

/// Typed precondition on an action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Precondition {
    /// Run only when disk usage is at or above the threshold
    DiskUsageThreshold { threshold: f64 },
    /// Run only when the named service reports healthy
    ServiceHealth { service: String },
    /// Run only within the given local-hour window
    ScheduledWindow { start_hour: u8, end_hour: u8 },
    /// Run only when memory usage is at or above the threshold
    MemoryThreshold { threshold: f64 },
}

/// Typed safety rule applied to the resolved command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SafetyCheck {
    /// The command must not contain any write-operation keyword
    ReadOnly,
    /// The command must reference at least one whitelisted path
    PathWhitelist { paths: Vec<String> },
    /// Cap on approved restarts of this action per hour
    RestartLimit { max_per_hour: u32 },
}

fn default_timeout() -> u64 {
    60
}

/// One declaratively defined unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionDefinition {
    pub name: String,
    pub tier: Tier,
    pub category: String,
    pub command: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub auto_execute: bool,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    #[serde(default)]
    pub safety_checks: Vec<SafetyCheck>,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub description: Option<String>,
}

impl ActionDefinition {
    /// Render the command template with the given parameters. Placeholders
    /// without a parameter are left in place so validation can reject them.
    pub fn render_command(&self, params: &HashMap<String, String>) -> String {
        render_template(&self.command, params)
    }

    /// Render the template with a benign sample value per placeholder,
    /// used for load-time validation.
    fn render_sample(&self) -> String {
        PLACEHOLDER.replace_all(&self.command, "sample").into_owned()
    }
}

/// Substitute `{name}` placeholders in a command template
pub fn render_template(template: &str, params: &HashMap<String, String>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in params {
        rendered = rendered.replace(&format!("{{{}}}", key), value);
    }
    rendered
}

/// Immutable, validated map of action name to definition
pub struct ActionCatalog {
    actions: HashMap<String, Arc<ActionDefinition>>,
}

impl ActionCatalog {
    /// Build a catalog from already-parsed definitions, enforcing the
    /// load-time invariants.
    pub fn from_definitions(
        definitions: Vec<ActionDefinition>,
        validator: &CommandValidator,
    ) -> Result<Self> {
        let mut actions = HashMap::with_capacity(definitions.len());

        for definition in definitions {
            if definition.timeout_seconds == 0 {
                return Err(Error::Configuration(format!(
                    "action {}: timeout_seconds must be positive",
                    definition.name
                )));
            }

            if definition.tier == Tier::Proactive
                && definition.auto_execute
                && definition.requires_approval
            {
                return Err(Error::Configuration(format!(
                    "action {}: a proactive auto-execute action cannot also require approval",
                    definition.name
                )));
            }

            let sample = definition.render_sample();
            let verdict = validator.validate(&sample);
            if !verdict.allowed {
                return Err(Error::Configuration(format!(
                    "action {}: command template rejected by validator: {}",
                    definition.name, verdict.matched_rule
                )));
            }

            if actions.contains_key(&definition.name) {
                return Err(Error::Configuration(format!(
                    "duplicate action definition: {}",
                    definition.name
                )));
            }
            actions.insert(definition.name.clone(), Arc::new(definition));
        }

        Ok(Self { actions })
    }

    /// Load every `*.toml` definition under a directory
    pub fn load_dir(dir: &Path, validator: &CommandValidator) -> Result<Self> {
        let mut definitions = Vec::new();

        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Configuration(format!("cannot read actions dir {}: {}", dir.display(), e))
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        for path in paths {
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                Error::Configuration(format!("cannot read {}: {}", path.display(), e))
            })?;
            let definition: ActionDefinition = toml::from_str(&raw).map_err(|e| {
                Error::Configuration(format!("invalid action definition {}: {}", path.display(), e))
            })?;
            info!(action = %definition.name, file = %path.display(), "loaded action definition");
            definitions.push(definition);
        }

        Self::from_definitions(definitions, validator)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ActionDefinition>> {
        self.actions.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// All definitions, unordered
    pub fn all(&self) -> Vec<Arc<ActionDefinition>> {
        self.actions.values().cloned().collect()
    }

    /// Definitions of one tier, sorted by name for stable iteration
    pub fn tier(&self, tier: Tier) -> Vec<Arc<ActionDefinition>> {
        let mut actions: Vec<_> = self
            .actions
            .values()
            .filter(|a| a.tier == tier)
            .cloned()
            .collect();
        actions.sort_by(|a, b| a.name.cmp(&b.name));
        actions
    }
}
