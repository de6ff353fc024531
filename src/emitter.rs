//! Pure rule-to-directive translation. Each `emit_*` function takes one typed rule and appends
//! its canonical AppArmor directive line into the right accumulator, deduplicating and
//! partitioning by from-source along the way. No I/O, no policy-set iteration order decisions —
//! those live in `profile`.

use crate::types::{Action, CapabilityRule, DirectoryRule, FromSource, NetworkRule, PathRule, PatternRule};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    ProcessAllow,
    ProcessAudit,
    ProcessBlock,
    FileAllow,
    FileAudit,
    FileBlock,
    NetworkAllow,
    NetworkBlock,
    CapabilityAllow,
    CapabilityBlock,
}

#[derive(Debug, Default)]
pub struct Accumulators {
    pub process_allow: Vec<String>,
    pub process_audit: Vec<String>,
    pub process_block: Vec<String>,
    pub file_allow: Vec<String>,
    pub file_audit: Vec<String>,
    pub file_block: Vec<String>,
    pub network_allow: Vec<String>,
    pub network_block: Vec<String>,
    pub capability_allow: Vec<String>,
    pub capability_block: Vec<String>,
    pub from_sources: BTreeMap<String, Vec<String>>,
}

fn push_dedup(list: &mut Vec<String>, line: String) {
    if !list.contains(&line) {
        list.push(line);
    }
}

impl Accumulators {
    fn bucket_mut(&mut self, bucket: Bucket) -> &mut Vec<String> {
        match bucket {
            Bucket::ProcessAllow => &mut self.process_allow,
            Bucket::ProcessAudit => &mut self.process_audit,
            Bucket::ProcessBlock => &mut self.process_block,
            Bucket::FileAllow => &mut self.file_allow,
            Bucket::FileAudit => &mut self.file_audit,
            Bucket::FileBlock => &mut self.file_block,
            Bucket::NetworkAllow => &mut self.network_allow,
            Bucket::NetworkBlock => &mut self.network_block,
            Bucket::CapabilityAllow => &mut self.capability_allow,
            Bucket::CapabilityBlock => &mut self.capability_block,
        }
    }

    /// Route one generated line either into the matching global bucket, or (when the rule
    /// names a from-source) into each named source's own line list instead.
    fn emit(&mut self, bucket: Bucket, sources: &[FromSource], line: String) {
        if sources.is_empty() {
            push_dedup(self.bucket_mut(bucket), line);
        } else {
            for s in sources {
                let entry = self.from_sources.entry(s.key()).or_default();
                push_dedup(entry, line.clone());
            }
        }
    }
}

fn dir_pattern(directory: &str, recursive: bool) -> String {
    if recursive {
        format!("{directory}{{*,**}}")
    } else {
        format!("{directory}*")
    }
}

// -- process --

pub fn process_path(acc: &mut Accumulators, rule: &PathRule) {
    let (bucket, line) = match rule.action.unwrap_or(Action::Allow) {
        Action::Allow | Action::Audit => {
            let line = if rule.owner_only {
                format!("  owner {} ix,\n", rule.path)
            } else {
                format!("  {} ix,\n", rule.path)
            };
            let bucket = if rule.action == Some(Action::Audit) {
                Bucket::ProcessAudit
            } else {
                Bucket::ProcessAllow
            };
            (bucket, line)
        }
        Action::Block => {
            let line = if rule.owner_only {
                format!("  owner {} ix,\n", rule.path)
            } else {
                format!("  deny {} x,\n", rule.path)
            };
            (Bucket::ProcessBlock, line)
        }
    };
    acc.emit(bucket, &rule.from_source, line);
}

pub fn process_directory(acc: &mut Accumulators, rule: &DirectoryRule) {
    let pattern = dir_pattern(&rule.directory, rule.recursive);
    let (bucket, line) = match rule.action.unwrap_or(Action::Allow) {
        Action::Allow | Action::Audit => {
            let line = if rule.owner_only {
                format!("  owner {pattern} ix,\n")
            } else {
                format!("  {pattern} ix,\n")
            };
            let bucket = if rule.action == Some(Action::Audit) {
                Bucket::ProcessAudit
            } else {
                Bucket::ProcessAllow
            };
            (bucket, line)
        }
        Action::Block => {
            let line = if rule.owner_only {
                format!("  owner {pattern} ix,\n")
            } else {
                format!("  deny {pattern} x,\n")
            };
            (Bucket::ProcessBlock, line)
        }
    };
    acc.emit(bucket, &rule.from_source, line);
}

pub fn process_pattern(acc: &mut Accumulators, rule: &PatternRule) {
    let (bucket, line) = match rule.action.unwrap_or(Action::Allow) {
        Action::Allow | Action::Audit => {
            // Quirk: the non-owner allow/audit case appends an extra `*` that the path and
            // directory shapes do not. Preserve it.
            let line = if rule.owner_only {
                format!("  owner {} ix,\n", rule.pattern)
            } else {
                format!("  {}* ix,\n", rule.pattern)
            };
            let bucket = if rule.action == Some(Action::Audit) {
                Bucket::ProcessAudit
            } else {
                Bucket::ProcessAllow
            };
            (bucket, line)
        }
        Action::Block => {
            let line = if rule.owner_only {
                format!("  owner {} ix,\n", rule.pattern)
            } else {
                format!("  deny {} x,\n", rule.pattern)
            };
            (Bucket::ProcessBlock, line)
        }
    };
    acc.emit(bucket, &[], line);
}

// -- file --

fn file_suffix(read_only: bool) -> &'static str {
    if read_only {
        "r"
    } else {
        "rw"
    }
}

pub fn file_path(acc: &mut Accumulators, rule: &PathRule) {
    let (bucket, line) = match rule.action.unwrap_or(Action::Allow) {
        Action::Allow | Action::Audit => {
            let line = if rule.owner_only {
                format!("  owner {} {},\n", rule.path, file_suffix(rule.read_only))
            } else {
                format!("  {} {},\n", rule.path, file_suffix(rule.read_only))
            };
            let bucket = if rule.action == Some(Action::Audit) {
                Bucket::FileAudit
            } else {
                Bucket::FileAllow
            };
            (bucket, line)
        }
        Action::Block => {
            let line = if rule.owner_only {
                // Narrows rather than denies: an owner-scoped allow is stricter than the
                // unscoped rule it replaces.
                format!("  owner {} {},\n", rule.path, file_suffix(rule.read_only))
            } else if rule.read_only {
                format!("  deny {} w,\n", rule.path)
            } else {
                format!("  deny {} rw,\n", rule.path)
            };
            (Bucket::FileBlock, line)
        }
    };
    acc.emit(bucket, &rule.from_source, line);
}

pub fn file_directory(acc: &mut Accumulators, rule: &DirectoryRule) {
    let pattern = dir_pattern(&rule.directory, rule.recursive);
    let (bucket, line) = match rule.action.unwrap_or(Action::Allow) {
        Action::Allow | Action::Audit => {
            let line = if rule.owner_only {
                format!("  owner {pattern} {},\n", file_suffix(rule.read_only))
            } else {
                format!("  {pattern} {},\n", file_suffix(rule.read_only))
            };
            let bucket = if rule.action == Some(Action::Audit) {
                Bucket::FileAudit
            } else {
                Bucket::FileAllow
            };
            (bucket, line)
        }
        Action::Block => {
            let line = if rule.owner_only {
                format!("  owner {pattern} {},\n", file_suffix(rule.read_only))
            } else if rule.read_only {
                format!("  deny {pattern} w,\n")
            } else {
                format!("  deny {pattern} rw,\n")
            };
            (Bucket::FileBlock, line)
        }
    };
    acc.emit(bucket, &rule.from_source, line);
}

pub fn file_pattern(acc: &mut Accumulators, rule: &PatternRule) {
    let (bucket, line) = match rule.action.unwrap_or(Action::Allow) {
        Action::Allow | Action::Audit => {
            let line = if rule.owner_only {
                format!("  owner {} {},\n", rule.pattern, file_suffix(rule.read_only))
            } else {
                format!("  {} {},\n", rule.pattern, file_suffix(rule.read_only))
            };
            let bucket = if rule.action == Some(Action::Audit) {
                Bucket::FileAudit
            } else {
                Bucket::FileAllow
            };
            (bucket, line)
        }
        Action::Block => {
            let line = if rule.owner_only {
                format!("  owner {} {},\n", rule.pattern, file_suffix(rule.read_only))
            } else if rule.read_only {
                format!("  deny {} w,\n", rule.pattern)
            } else {
                format!("  deny {} rw,\n", rule.pattern)
            };
            (Bucket::FileBlock, line)
        }
    };
    acc.emit(bucket, &[], line);
}

// -- network / capability --

/// Network rules only support Allow/Block; an Audit-tagged rule matches neither branch in the
/// original dispatch and is silently dropped rather than granted.
pub fn network(acc: &mut Accumulators, rule: &NetworkRule) {
    let (bucket, line) = match rule.action.unwrap_or(Action::Allow) {
        Action::Allow => (Bucket::NetworkAllow, format!("  network {},\n", rule.protocol)),
        Action::Block => (Bucket::NetworkBlock, format!("  deny network {},\n", rule.protocol)),
        Action::Audit => return,
    };
    acc.emit(bucket, &rule.from_source, line);
}

/// Capability rules only support Allow/Block; see `network` for the Audit-is-dropped rationale.
pub fn capability(acc: &mut Accumulators, rule: &CapabilityRule) {
    let (bucket, line) = match rule.action.unwrap_or(Action::Allow) {
        Action::Allow => (Bucket::CapabilityAllow, format!("  capability {},\n", rule.capability)),
        Action::Block => (Bucket::CapabilityBlock, format!("  deny capability {},\n", rule.capability)),
        Action::Audit => return,
    };
    acc.emit(bucket, &rule.from_source, line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FromSource;

    fn allow_path(path: &str, owner_only: bool) -> PathRule {
        PathRule { path: path.into(), owner_only, action: Some(Action::Allow), ..Default::default() }
    }

    #[test]
    fn process_allow_plain() {
        let mut acc = Accumulators::default();
        process_path(&mut acc, &allow_path("/usr/bin/curl", false));
        assert_eq!(acc.process_allow, vec!["  /usr/bin/curl ix,\n".to_string()]);
    }

    #[test]
    fn process_allow_owner_only() {
        let mut acc = Accumulators::default();
        process_path(&mut acc, &allow_path("/usr/bin/curl", true));
        assert_eq!(acc.process_allow, vec!["  owner /usr/bin/curl ix,\n".to_string()]);
    }

    #[test]
    fn process_block_owner_only_narrows_instead_of_denying() {
        let mut acc = Accumulators::default();
        let rule = PathRule { path: "/usr/bin/curl".into(), owner_only: true, action: Some(Action::Block), ..Default::default() };
        process_path(&mut acc, &rule);
        assert_eq!(acc.process_block, vec!["  owner /usr/bin/curl ix,\n".to_string()]);
    }

    #[test]
    fn process_block_plain_denies() {
        let mut acc = Accumulators::default();
        let rule = PathRule { path: "/usr/bin/curl".into(), owner_only: false, action: Some(Action::Block), ..Default::default() };
        process_path(&mut acc, &rule);
        assert_eq!(acc.process_block, vec!["  deny /usr/bin/curl x,\n".to_string()]);
    }

    #[test]
    fn process_pattern_allow_appends_extra_star() {
        let mut acc = Accumulators::default();
        let rule = PatternRule { pattern: "/usr/bin/*".into(), owner_only: false, action: Some(Action::Allow), ..Default::default() };
        process_pattern(&mut acc, &rule);
        assert_eq!(acc.process_allow, vec!["  /usr/bin/** ix,\n".to_string()]);
    }

    #[test]
    fn process_pattern_owner_only_allow_has_no_extra_star() {
        let mut acc = Accumulators::default();
        let rule = PatternRule { pattern: "/usr/bin/*".into(), owner_only: true, action: Some(Action::Allow), ..Default::default() };
        process_pattern(&mut acc, &rule);
        assert_eq!(acc.process_allow, vec!["  owner /usr/bin/* ix,\n".to_string()]);
    }

    #[test]
    fn file_block_readonly_nonowner_denies_write_only() {
        let mut acc = Accumulators::default();
        let rule = PathRule { path: "/etc/passwd".into(), read_only: true, action: Some(Action::Block), ..Default::default() };
        file_path(&mut acc, &rule);
        assert_eq!(acc.file_block, vec!["  deny /etc/passwd w,\n".to_string()]);
    }

    #[test]
    fn file_block_readonly_owner_narrows_to_allow() {
        let mut acc = Accumulators::default();
        let rule = PathRule { path: "/etc/passwd".into(), read_only: true, owner_only: true, action: Some(Action::Block), ..Default::default() };
        file_path(&mut acc, &rule);
        assert_eq!(acc.file_block, vec!["  owner /etc/passwd r,\n".to_string()]);
    }

    #[test]
    fn dedup_keeps_first_insertion() {
        let mut acc = Accumulators::default();
        process_path(&mut acc, &allow_path("/usr/bin/curl", false));
        process_path(&mut acc, &allow_path("/usr/bin/curl", false));
        assert_eq!(acc.process_allow.len(), 1);
    }

    #[test]
    fn from_source_routes_away_from_global() {
        let mut acc = Accumulators::default();
        let rule = PathRule {
            path: "/usr/bin/curl".into(),
            action: Some(Action::Allow),
            from_source: vec![FromSource::Path { path: "/bin/sh".into() }],
            ..Default::default()
        };
        process_path(&mut acc, &rule);
        assert!(acc.process_allow.is_empty());
        assert_eq!(acc.from_sources.get("/bin/sh").unwrap(), &vec!["  /usr/bin/curl ix,\n".to_string()]);
    }

    #[test]
    fn from_source_directory_key_uses_recursive_glob() {
        let mut acc = Accumulators::default();
        let rule = NetworkRule {
            protocol: "raw".into(),
            action: Some(Action::Block),
            from_source: vec![FromSource::Directory { directory: "/usr/bin/".into(), recursive: true }],
        };
        network(&mut acc, &rule);
        assert!(acc.from_sources.contains_key("/usr/bin/{*,**}"));
    }

    #[test]
    fn network_audit_emits_nothing() {
        let mut acc = Accumulators::default();
        let rule = NetworkRule { protocol: "inet".into(), action: Some(Action::Audit), from_source: vec![] };
        network(&mut acc, &rule);
        assert!(acc.network_allow.is_empty());
        assert!(acc.network_block.is_empty());
    }

    #[test]
    fn capability_audit_emits_nothing() {
        let mut acc = Accumulators::default();
        let rule = CapabilityRule { capability: "net_raw".into(), action: Some(Action::Audit), from_source: vec![] };
        capability(&mut acc, &rule);
        assert!(acc.capability_allow.is_empty());
        assert!(acc.capability_block.is_empty());
    }
}
