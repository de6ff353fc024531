//! Plain data model for policy rules, mirroring the shapes the orchestrator hands this
//! component. No behavior lives here; the emitter and profile builder consume these types.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Audit,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PolicyEnabled {
    #[default]
    Enabled,
    Disabled,
}

/// An executable context that narrows a rule to only apply while running under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FromSource {
    Path { path: String },
    Directory { directory: String, recursive: bool },
}

impl FromSource {
    /// The string used both as the map key grouping rules by source and, for `Directory`,
    /// the emitted directive path.
    pub fn key(&self) -> String {
        match self {
            FromSource::Path { path } => path.clone(),
            FromSource::Directory { directory, recursive } => {
                if *recursive {
                    format!("{directory}{{*,**}}")
                } else {
                    format!("{directory}*")
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathRule {
    pub path: String,
    pub owner_only: bool,
    pub read_only: bool,
    pub action: Option<Action>,
    pub from_source: Vec<FromSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryRule {
    pub directory: String,
    pub recursive: bool,
    pub owner_only: bool,
    pub read_only: bool,
    pub action: Option<Action>,
    pub from_source: Vec<FromSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternRule {
    pub pattern: String,
    pub owner_only: bool,
    pub read_only: bool,
    pub action: Option<Action>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkRule {
    pub protocol: String,
    pub action: Option<Action>,
    pub from_source: Vec<FromSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityRule {
    pub capability: String,
    pub action: Option<Action>,
    pub from_source: Vec<FromSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSpec {
    pub match_paths: Vec<PathRule>,
    pub match_directories: Vec<DirectoryRule>,
    pub match_patterns: Vec<PatternRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSpec {
    pub match_paths: Vec<PathRule>,
    pub match_directories: Vec<DirectoryRule>,
    pub match_patterns: Vec<PatternRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSpec {
    pub match_protocols: Vec<NetworkRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitiesSpec {
    pub match_capabilities: Vec<CapabilityRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySpec {
    pub process: ProcessSpec,
    pub file: FileSpec,
    pub network: NetworkSpec,
    pub capabilities: CapabilitiesSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    pub name: String,
    pub spec: PolicySpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerGroup {
    pub namespace_name: String,
    pub container_group_name: String,
    pub containers: Vec<String>,
    pub apparmor_profiles: Vec<String>,
    #[serde(default)]
    pub policy_enabled: PolicyEnabled,
}

/// Stock AppArmor profile names that are never this component's to manage.
pub const STOCK_PROFILE_NAMES: &[&str] =
    &["docker-default", "unconfined", "cri-containerd.apparmor.d", ""];
