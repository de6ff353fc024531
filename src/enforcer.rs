//! Manages the lifecycle of managed AppArmor profiles on disk and in the kernel: bootstrap
//! cleanup, reference-counted registration, and update-in-place. All mutation is serialized
//! through a single mutex, mirroring the single-lock discipline of the system this was
//! distilled from.

use crate::config::Config;
use crate::error::EnforcerError;
use crate::logger::Logger;
use crate::profile::{self, GenerateResult};
use crate::types::{ContainerGroup, PolicyEnabled, SecurityPolicy, STOCK_PROFILE_NAMES};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

fn resolve_host_name() -> String {
    #[cfg(unix)]
    {
        let mut buf = [0u8; 256];
        if let Ok(name) = nix::unistd::gethostname(&mut buf) {
            if let Ok(s) = name.to_str() {
                return s.to_string();
            }
        }
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

pub struct Enforcer {
    pub host_name: String,
    config: Config,
    logger: Box<dyn Logger>,
    profiles: Mutex<HashMap<String, u32>>,
}

impl Enforcer {
    /// Builds the enforcer's in-memory state. Fails if the configured AppArmor directory
    /// cannot be read, since every other operation depends on it. Does not itself touch any
    /// profile file — call `bootstrap()` to run the stale-profile sweep explicitly.
    pub fn new(config: Config, logger: Box<dyn Logger>) -> Result<Self, EnforcerError> {
        let host_name = config.host_name.clone().unwrap_or_else(resolve_host_name);

        fs::read_dir(&config.apparmor_dir).map_err(|_| EnforcerError::Environment(config.apparmor_dir.clone()))?;

        Ok(Self { host_name, config, logger, profiles: Mutex::new(HashMap::new()) })
    }

    /// Removes any managed profile not currently in use by a running process. Every failure
    /// along the way is logged and skipped so one bad profile doesn't block the rest; this
    /// only returns an error if the AppArmor directory can no longer be read at all.
    pub fn bootstrap(&self) -> Result<(), EnforcerError> {
        let entries =
            fs::read_dir(&self.config.apparmor_dir).map_err(|_| EnforcerError::Environment(self.config.apparmor_dir.clone()))?;

        let in_use = in_use_profile_names(&self.config.proc_dir);

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    self.logger.errf(&format!("Failed to read {} ({e})", path.display()));
                    continue;
                }
            };

            if !profile::is_managed(&content) {
                continue;
            }
            if in_use.contains(file_name) {
                continue;
            }

            if let Err(e) = crate::parser::detach(&self.config.parser_bin, &path) {
                self.logger.errf(&format!("Failed to detach {} ({e})", path.display()));
                continue;
            }
            if let Err(e) = fs::remove_file(&path) {
                self.logger.errf(&format!("Failed to remove {} ({e})", path.display()));
                continue;
            }
            self.logger.printf(&format!("Removed an inactive AppArmor profile ({file_name})"));
        }

        Ok(())
    }

    fn profile_path(&self, name: &str) -> PathBuf {
        self.config.apparmor_dir.join(name)
    }

    /// Reads an existing profile and confirms it carries the managed marker before letting a
    /// caller touch it, so a foreign file is never silently overwritten or reloaded.
    fn check_managed(&self, path: &PathBuf, profile_name: &str) -> Result<(), EnforcerError> {
        let content = fs::read_to_string(path).map_err(|source| EnforcerError::Io { path: path.clone(), source })?;
        if !profile::is_managed(&content) {
            return Err(EnforcerError::NotManaged(profile_name.to_string()));
        }
        Ok(())
    }

    /// Registers a profile for use (`full = true`, reference-counted) or resets it to its
    /// skeleton without touching the refcount (`full = false`, used at startup while container
    /// state is rediscovered). Refuses to touch a file that exists but isn't managed by this
    /// component.
    pub fn register(&self, profile_name: &str, full: bool) -> bool {
        let path = self.profile_path(profile_name);
        let mut profiles = self.profiles.lock().unwrap();

        if path.exists() {
            if let Err(e) = self.check_managed(&path, profile_name) {
                match e {
                    EnforcerError::NotManaged(_) if full => self
                        .logger
                        .printf(&format!("Unable to register an AppArmor profile ({profile_name}) (out-of-control)")),
                    EnforcerError::NotManaged(_) => self.logger.printf(&format!(
                        "Unable to control the existing AppArmor profile ({profile_name}) (out-of-control)"
                    )),
                    _ if full => self.logger.printf(&format!("Unable to register an AppArmor profile ({profile_name}, {e})")),
                    _ => self
                        .logger
                        .printf(&format!("Unable to read the existing AppArmor profile ({profile_name}, {e})")),
                }
                return false;
            }
        } else {
            let new_profile = profile::default_skeleton(profile_name);
            if let Err(e) = fs::write(&path, new_profile) {
                self.logger.err(&e.to_string());
                return false;
            }
        }

        match crate::parser::replace(&self.config.parser_bin, &path) {
            Ok(()) => {
                if full {
                    let count = profiles.entry(profile_name.to_string()).or_insert(0);
                    *count += 1;
                    if *count == 1 {
                        self.logger.printf(&format!("Registered an AppArmor profile ({profile_name})"));
                    } else {
                        self.logger
                            .printf(&format!("Registered an AppArmor profile ({profile_name}, refCount: {count})"));
                    }
                } else {
                    profiles.remove(profile_name);
                    self.logger.printf(&format!("Initialize an AppArmor profile ({profile_name})"));
                }
                true
            }
            Err(e) => {
                self.logger.printf(&format!(
                    "Failed to {} an AppArmor profile ({profile_name}, {e})",
                    if full { "register" } else { "initialize" }
                ));
                false
            }
        }
    }

    /// Decrements the refcount (`full = true`) or forwards to `register(name, false)`
    /// (`full = false`). The file is never removed here; bootstrap cleanup removes it once it
    /// is both unreferenced and unused by any running process.
    pub fn unregister(&self, profile_name: &str, full: bool) -> bool {
        if !full {
            return self.register(profile_name, false);
        }

        let path = self.profile_path(profile_name);
        let mut profiles = self.profiles.lock().unwrap();

        if path.exists() {
            if let Err(e) = self.check_managed(&path, profile_name) {
                match e {
                    EnforcerError::NotManaged(_) => self
                        .logger
                        .printf(&format!("Unable to unregister an AppArmor profile ({profile_name}) (out-of-control)")),
                    _ => self
                        .logger
                        .printf(&format!("Unable to unregister an AppArmor profile ({profile_name}, {e})")),
                }
                return false;
            }
        }

        match profiles.get(profile_name).copied() {
            Some(count) if count > 1 => {
                profiles.insert(profile_name.to_string(), count - 1);
                self.logger
                    .printf(&format!("Unregistered an AppArmor profile ({profile_name}, refCount: {})", count - 1));
                true
            }
            Some(_) => {
                profiles.remove(profile_name);
                self.logger.printf(&format!("Unregistered an AppArmor profile ({profile_name})"));
                true
            }
            None => false,
        }
    }

    /// Regenerates a profile's body against `policies` and reports whether it changed, without
    /// writing or reloading anything. Used both internally by `update_profile` and directly by
    /// the CLI's dry-run `compile` path.
    pub fn generate(&self, profile_name: &str, policies: &[SecurityPolicy]) -> Result<GenerateResult, EnforcerError> {
        let path = self.profile_path(profile_name);
        let old_text = fs::read_to_string(&path).map_err(|source| EnforcerError::Io { path: path.clone(), source })?;
        Ok(profile::generate(&old_text, policies))
    }

    /// Regenerates, writes, and reloads a profile if its content changed.
    pub fn update_profile(&self, group: &ContainerGroup, profile_name: &str, policies: &[SecurityPolicy]) {
        let result = match self.generate(profile_name, policies) {
            Ok(r) => r,
            Err(e) => {
                self.logger.err(&e.to_string());
                return;
            }
        };

        if !result.changed {
            return;
        }

        let path = self.profile_path(profile_name);
        if let Err(e) = write_and_sync(&path, &result.text) {
            self.logger.err(&e.to_string());
            return;
        }

        match crate::parser::replace(&self.config.parser_bin, &path) {
            Ok(()) => self.logger.printf(&format!(
                "Updated {} security rules to {}/{}/{}",
                result.count, group.namespace_name, group.container_group_name, profile_name
            )),
            Err(e) => self.logger.printf(&format!(
                "Failed to update {} security rules to {}/{}/{} ({e})",
                result.count, group.namespace_name, group.container_group_name, profile_name
            )),
        }
    }

    /// Updates every distinct, non-stock profile referenced by the group's containers. Passes
    /// an empty policy set when the group's policies are disabled, which regenerates each
    /// profile back down to its default-open skeleton rather than leaving stale rules in place.
    pub fn update_security_policies(&self, group: &ContainerGroup, policies: &[SecurityPolicy]) {
        let mut profile_names = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for container in &group.containers {
            if let Some(name) = group_profile_for(group, container) {
                if STOCK_PROFILE_NAMES.contains(&name.as_str()) {
                    continue;
                }
                if seen.insert(name.clone()) {
                    profile_names.push(name);
                }
            }
        }

        let effective_policies: &[SecurityPolicy] = match group.policy_enabled {
            PolicyEnabled::Enabled => policies,
            PolicyEnabled::Disabled => &[],
        };

        for profile_name in &profile_names {
            self.update_profile(group, profile_name, effective_policies);
        }
    }
}

/// `ContainerGroup.apparmor_profiles` is a flat list in this data model rather than a
/// container-name-keyed map (see `types::ContainerGroup`); the single-container-group usage
/// this compiler serves makes a positional container-index lookup equivalent to the keyed
/// lookup the policy source performs.
fn group_profile_for(group: &ContainerGroup, container: &str) -> Option<String> {
    let idx = group.containers.iter().position(|c| c == container)?;
    group.apparmor_profiles.get(idx).cloned()
}

/// Writes the profile text and fsyncs it before returning, so a crash between the write and
/// the parser reload can't leave a profile whose content was never flushed to disk.
fn write_and_sync(path: &std::path::Path, text: &str) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(text.as_bytes())?;
    file.sync_all()
}

fn in_use_profile_names(proc_dir: &std::path::Path) -> std::collections::HashSet<String> {
    let mut names = std::collections::HashSet::new();
    let Ok(entries) = fs::read_dir(proc_dir) else {
        return names;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(pid_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if pid_name.parse::<u32>().is_err() {
            continue;
        }
        let attr_path = path.join("attr/current");
        if let Ok(content) = fs::read_to_string(&attr_path) {
            if let Some(first_line) = content.lines().next() {
                if let Some(word) = first_line.split(' ').next() {
                    names.insert(word.to_string());
                }
            }
        }
    }
    names
}
