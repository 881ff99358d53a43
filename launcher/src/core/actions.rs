//! Auto-deploy action set parsing.

use serde::{Deserialize, Serialize};

/// One auto-deploy action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployAction {
    Install,
    Update,
    Start,
    Uninstall,
}

impl DeployAction {
    fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "install" => Some(DeployAction::Install),
            "update" => Some(DeployAction::Update),
            "start" => Some(DeployAction::Start),
            "uninstall" => Some(DeployAction::Uninstall),
            _ => None,
        }
    }
}

/// Enabled auto-deploy actions. A set: order in the configuration is irrelevant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployActions {
    pub install: bool,
    pub update: bool,
    pub start: bool,
    pub uninstall: bool,
}

impl DeployActions {
    /// Parse a comma-separated action list. Unknown tokens are dropped.
    pub fn parse(list: &str) -> Self {
        list.split(',')
            .filter_map(DeployAction::parse)
            .fold(Self::default(), |actions, action| actions.with(action))
    }

    pub fn with(mut self, action: DeployAction) -> Self {
        match action {
            DeployAction::Install => self.install = true,
            DeployAction::Update => self.update = true,
            DeployAction::Start => self.start = true,
            DeployAction::Uninstall => self.uninstall = true,
        }
        self
    }

    pub fn contains(&self, action: DeployAction) -> bool {
        match action {
            DeployAction::Install => self.install,
            DeployAction::Update => self.update,
            DeployAction::Start => self.start,
            DeployAction::Uninstall => self.uninstall,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.install || self.update || self.start || self.uninstall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trimmed_case_insensitive_tokens() {
        let actions = DeployActions::parse(" Install , START,bogus,,update ");
        assert!(actions.contains(DeployAction::Install));
        assert!(actions.contains(DeployAction::Start));
        assert!(actions.contains(DeployAction::Update));
        assert!(!actions.contains(DeployAction::Uninstall));
    }

    #[test]
    fn unknown_only_is_empty() {
        assert!(DeployActions::parse("deploy, restart").is_empty());
        assert!(DeployActions::parse("").is_empty());
    }
}
