//! Ordered whitelist of allowed command shapes
//!
//! Rules are a tagged sum over the allowed risk classes only, so a
//! forbidden entry can never carry an approval flag. Order matters: the
//! first rule whose pattern matches wins, and the catalog runs from most
//! specific to most general.

use crate::CommandRisk;
use ops_common::{Error, Result};
use regex::Regex;

/// Risk classes an allow rule may carry. Forbidden is not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowedRisk {
    Safe,
    Low,
    Medium,
    High,
}

impl AllowedRisk {
    pub fn as_command_risk(&self) -> CommandRisk {
        match self {
            AllowedRisk::Safe => CommandRisk::Safe,
            AllowedRisk::Low => CommandRisk::LowRisk,
            AllowedRisk::Medium => CommandRisk::MediumRisk,
            AllowedRisk::High => CommandRisk::HighRisk,
        }
    }
}

/// One whitelisted command shape
pub struct AllowRule {
    pub name: &'static str,
    pub description: &'static str,
    pub risk: AllowedRisk,
    pub requires_approval: bool,
    patterns: Vec<Regex>,
}

impl AllowRule {
    fn new(
        name: &'static str,
        description: &'static str,
        risk: AllowedRisk,
        requires_approval: bool,
        patterns: &[&str],
    ) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let regex = Regex::new(pattern).map_err(|e| {
                Error::Configuration(format!("invalid pattern for rule {}: {}", name, e))
            })?;
            compiled.push(regex);
        }
        Ok(Self {
            name,
            description,
            risk,
            requires_approval,
            patterns: compiled,
        })
    }

    pub fn matches(&self, command: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(command))
    }
}

/// Build the built-in rule catalog. Any invalid pattern is a startup error.
pub fn builtin_rules() -> Result<Vec<AllowRule>> {
    use AllowedRisk::*;

    let rules = vec![
        // Read-only host inspection
        AllowRule::new("ls", "List directory contents", Safe, false, &[r"^ls(\s+-[alhLRt]+)?(\s+[\w\./\-]+)*$"])?,
        AllowRule::new("cat", "Display file contents", Safe, false, &[r"^cat(\s+[\w\./\-]+)+$"])?,
        AllowRule::new("head", "Display first lines of file", Safe, false, &[r"^head(\s+-n\s+\d+)?(\s+[\w\./\-]+)+$"])?,
        AllowRule::new("tail", "Display last lines of file", Safe, false, &[r"^tail(\s+-n\s+\d+)?(\s+-f)?(\s+[\w\./\-]+)+$"])?,
        AllowRule::new("pwd", "Print working directory", Safe, false, &[r"^pwd$"])?,
        AllowRule::new("echo", "Print text", Safe, false, &[r"^echo\s+.*$"])?,
        AllowRule::new("date", "Display date/time", Safe, false, &[r"^date(\s+.*)?$"])?,
        AllowRule::new("whoami", "Display current user", Safe, false, &[r"^whoami$"])?,
        AllowRule::new("hostname", "Display hostname", Safe, false, &[r"^hostname$"])?,
        AllowRule::new("uptime", "Show system uptime", Safe, false, &[r"^uptime$"])?,
        AllowRule::new("df", "Show disk usage", Safe, false, &[r"^df(\s+-[hkT]+)?(\s+[\w\./\-]+)?$"])?,
        AllowRule::new("free", "Show memory usage", Safe, false, &[r"^free(\s+-[hm]+)?$"])?,
        AllowRule::new("ps", "Show running processes", Safe, false, &[r"^ps(\s+(aux|ef|-ef))?$"])?,
        AllowRule::new("top", "Show system resources", Safe, false, &[r"^top(\s+-[bn]\s+\d+)?$"])?,
        AllowRule::new("ping", "Probe network reachability", Safe, false, &[r"^ping\s+-c\s+\d+(\s+-W\s+\d+)?\s+[\w\.\:\-]+$"])?,
        AllowRule::new("nslookup", "Resolve a hostname", Safe, false, &[r"^nslookup\s+[\w\.\-]+$"])?,
        // Container inspection
        AllowRule::new("docker ps", "List containers", Safe, false, &[r"^docker\s+ps(\s+-a)?(\s+--no-trunc)?(\s+--format\s+'[^']*')?$"])?,
        AllowRule::new("docker images", "List images", Safe, false, &[r"^docker\s+images(\s+--filter\s+\S+)?(\s+--format\s+'[^']*')?(\s+-q)?$"])?,
        AllowRule::new("docker logs", "View container logs", Low, false, &[r"^docker\s+logs(\s+--tail\s+\d+)?(\s+-f)?\s+[\w\-]+$"])?,
        AllowRule::new("docker inspect", "Inspect container or image", Safe, false, &[r"^docker\s+inspect(\s+--format\s+'[^']*')?\s+[\w\-/:\.]+$"])?,
        AllowRule::new("docker stats", "Sample container resource usage", Safe, false, &[r"^docker\s+stats\s+--no-stream(\s+--format\s+'[^']*')?(\s+[\w\-]+)?$"])?,
        AllowRule::new("docker system df", "Show docker storage usage", Safe, false, &[r"^docker\s+system\s+df(\s+--format\s+'[^']*')?(\s+-v)?$"])?,
        AllowRule::new("docker network inspect", "Inspect a docker network", Safe, false, &[r"^docker\s+network\s+inspect\s+[\w\-]+$"])?,
        AllowRule::new("docker manifest inspect", "Inspect a registry manifest", Safe, false, &[r"^docker\s+manifest\s+inspect\s+[\w\-/:\.]+$"])?,
        // Source control inspection
        AllowRule::new("git status", "Show git status", Safe, false, &[r"^git\s+status$"])?,
        AllowRule::new("git log", "Show git log", Safe, false, &[r"^git\s+log(\s+--oneline)?(\s+-n\s+\d+)?$"])?,
        AllowRule::new("git diff", "Show git diff", Safe, false, &[r"^git\s+diff(\s+[\w\./\-]+)?$"])?,
        // Service lifecycle
        AllowRule::new("docker compose up", "Start compose services", Medium, true, &[r"^docker\s+compose(\s+-f\s+[\w\./\-]+)?\s+up(\s+-d)?(\s+[\w\-]+)?$"])?,
        AllowRule::new("docker compose down", "Stop compose services", Medium, true, &[r"^docker\s+compose(\s+-f\s+[\w\./\-]+)?\s+down$"])?,
        AllowRule::new("docker compose restart", "Restart compose services", Medium, true, &[r"^docker\s+compose(\s+-f\s+[\w\./\-]+)?\s+restart(\s+[\w\-]+)?$"])?,
        AllowRule::new("docker stop", "Stop a container", Medium, true, &[r"^docker\s+stop\s+[\w\-]+$"])?,
        AllowRule::new("docker start", "Start a container", Medium, true, &[r"^docker\s+start\s+[\w\-]+$"])?,
        AllowRule::new("docker restart", "Restart a container", Medium, true, &[r"^docker\s+restart\s+[\w\-]+$"])?,
        AllowRule::new("systemctl status", "Check a systemd unit", Low, false, &[r"^systemctl\s+status\s+[\w\-\.]+$"])?,
        AllowRule::new("systemctl restart", "Restart a systemd unit", Medium, true, &[r"^(sudo\s+)?systemctl\s+restart\s+[\w\-\.]+$"])?,
        // Filesystem changes
        AllowRule::new("mkdir", "Create directory", Low, false, &[r"^mkdir(\s+-p)?\s+[\w\./\-]+$"])?,
        AllowRule::new("touch", "Create file", Low, false, &[r"^touch\s+[\w\./\-]+$"])?,
        AllowRule::new("cp", "Copy files", Medium, true, &[r"^cp(\s+-[rp]+)?\s+[\w\./\-]+\s+[\w\./\-]+$"])?,
        AllowRule::new("mv", "Move files", Medium, true, &[r"^mv\s+[\w\./\-]+\s+[\w\./\-]+$"])?,
        // Destructive maintenance
        AllowRule::new("docker rm", "Remove a container", High, true, &[r"^docker\s+rm(\s+-f)?\s+[\w\-]+$"])?,
        AllowRule::new("docker rmi", "Remove an image", High, true, &[r"^docker\s+rmi(\s+-f)?\s+[\w\-/:\.]+$"])?,
        AllowRule::new("docker volume rm", "Remove a volume", High, true, &[r"^docker\s+volume\s+rm\s+[\w\-]+$"])?,
        AllowRule::new("docker system prune", "Prune unused docker data", Medium, true, &[r"^docker\s+system\s+prune\s+-f$"])?,
        AllowRule::new("docker image prune", "Prune dangling images", Medium, true, &[r"^docker\s+image\s+prune\s+-f$"])?,
        AllowRule::new("docker update", "Adjust container resource limits", High, true, &[r"^docker\s+update\s+--memory=\S+(\s+--cpus=\S+)?\s+[\w\-]+$"])?,
        AllowRule::new("rm", "Remove files (non-root)", High, true, &[r"^rm(\s+-[rf]+)?\s+[\w\./\-]+$"])?,
        AllowRule::new("git push", "Push to a git remote", High, true, &[r"^git\s+push(\s+origin)?(\s+[\w\-]+)?$"])?,
        AllowRule::new("systemctl stop", "Stop a systemd unit", High, true, &[r"^(sudo\s+)?systemctl\s+stop\s+[\w\-\.]+$"])?,
        AllowRule::new("certbot renew", "Force certificate renewal", High, true, &[r"^sudo\s+certbot\s+renew\s+--force-renewal$"])?,
        AllowRule::new("maintenance script", "Run an installed maintenance script", High, true, &[r"^sudo\s+/usr/local/bin/[\w\-\.]+\.sh(\s+[\w\-]+)?$"])?,
    ];

    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rules_compile() {
        let rules = builtin_rules().unwrap();
        assert!(rules.len() > 40);
    }

    #[test]
    fn first_match_wins_for_specific_docker_rules() {
        let rules = builtin_rules().unwrap();
        let hit = rules
            .iter()
            .find(|r| r.matches("docker logs --tail 50 web-1"))
            .unwrap();
        assert_eq!(hit.name, "docker logs");
        assert_eq!(hit.risk, AllowedRisk::Low);
    }

    #[test]
    fn format_arguments_are_accepted_when_quoted() {
        let rules = builtin_rules().unwrap();
        assert!(rules.iter().any(|r| r.matches("docker ps -a --format '{{json .}}'")));
        assert!(rules.iter().any(|r| r.matches("docker stats --no-stream --format '{{json .}}'")));
        assert!(rules.iter().any(|r| r.matches("docker inspect --format '{{.Created}}' nginx:latest")));
    }
}
