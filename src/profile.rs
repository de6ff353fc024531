//! Orchestrates the emitter across a policy set and produces the PRE/POLICY/POST sections of
//! a profile, splicing preserved user regions back in from whatever profile text already sits
//! on disk.

use crate::emitter::{self, Accumulators};
use crate::types::SecurityPolicy;

/// The literal marker embedded in every profile this component manages. Checked against file
/// content (not parsed out of a header field) so any profile written by any version of this
/// compiler is recognized.
pub const MANAGED_MARKER: &str = "KubeArmor";

const POST_BLOCK: &str = "\
  /lib/x86_64-linux-gnu/{*,**} r,

  deny @{PROC}/{*,**^[0-9*],sys/kernel/shm*} wkx,
  deny @{PROC}/sysrq-trigger rwklx,
  deny @{PROC}/mem rwklx,
  deny @{PROC}/kmem rwklx,
  deny @{PROC}/kcore rwklx,

  deny mount,

  deny /sys/[^f]*/** wklx,
  deny /sys/f[^s]*/** wklx,
  deny /sys/fs/[^c]*/** wklx,
  deny /sys/fs/c[^g]*/** wklx,
  deny /sys/fs/cg[^r]*/** wklx,
  deny /sys/firmware/efi/efivars/** rwklx,
  deny /sys/kernel/security/** rwklx,
";

/// The skeleton written for a brand-new profile: empty POLICY body, every default-open toggle
/// present (nothing has been allowed yet, so every domain is implicitly open).
pub fn default_skeleton(profile_name: &str) -> String {
    format!(
        "## == Managed by {marker} == ##\n\
         \n\
         #include <tunables/global>\n\
         \n\
         profile {name} flags=(attach_disconnected,mediate_deleted) {{\n\
         \x20\x20## == PRE START == ##\n\
         \x20\x20#include <abstractions/base>\n\
         \x20\x20umount,\n\
         \x20\x20file,\n\
         \x20\x20network,\n\
         \x20\x20capability,\n\
         \x20\x20## == PRE END == ##\n\
         \n\
         \x20\x20## == POLICY START == ##\n\
         \x20\x20## == POLICY END == ##\n\
         \n\
         \x20\x20## == POST START == ##\n\
         {post}\x20\x20## == POST END == ##\n\
         }}\n",
        marker = MANAGED_MARKER,
        name = profile_name,
        post = POST_BLOCK,
    )
}

#[derive(Debug, Default)]
struct Regions {
    head: Vec<String>,
    pre_mid: Vec<String>,
    mid_post: Vec<String>,
    foot: Vec<String>,
}

/// Splits existing profile text into the regions this compiler preserves (HEAD, PRE-MIDDLE,
/// MIDDLE-POST, FOOT) and discards everything inside PRE/POLICY/POST/NATIVE bodies, since those
/// are always regenerated. A `NATIVE POLICY` region is recognized only to be dropped.
fn parse_regions(old_text: &str) -> Regions {
    let mut regions = Regions::default();
    let mut pos = "HEAD";

    for line in old_text.lines() {
        let marked = |needle: &str| line.contains(needle);

        if marked("## == PRE START == ##") {
            pos = "PRE";
            continue;
        } else if marked("## == PRE END == ##") {
            pos = "PRE-MIDDLE";
            continue;
        } else if marked("## == POLICY START == ##") {
            pos = "POLICY";
            continue;
        } else if marked("## == POLICY END == ##") {
            pos = "MIDDLE-POST";
            continue;
        } else if marked("## == POST START == ##") {
            pos = "POST";
            continue;
        } else if marked("## == POST END == ##") {
            pos = "FOOT";
            continue;
        } else if marked("## == NATIVE POLICY START == ##") {
            pos = "NATIVE-START";
            continue;
        } else if marked("## == NATIVE POLICY END == ##") {
            pos = "NATIVE-END";
            continue;
        }

        match pos {
            "HEAD" => regions.head.push(format!("{line}\n")),
            "PRE-MIDDLE" => regions.pre_mid.push(format!("{line}\n")),
            "MIDDLE-POST" => regions.mid_post.push(format!("{line}\n")),
            "FOOT" => regions.foot.push(format!("{line}\n")),
            _ => {}
        }
    }

    regions
}

fn pre_block(process_has_lines: bool, file_has_lines: bool, network_has_lines: bool, capability_has_lines: bool) -> String {
    let mut s = String::from("  ## == PRE START == ##\n  #include <abstractions/base>\n  umount,\n");
    if !process_has_lines && !file_has_lines {
        s.push_str("  file,\n");
    }
    if !network_has_lines {
        s.push_str("  network,\n");
    }
    if !capability_has_lines {
        s.push_str("  capability,\n");
    }
    s.push_str("  ## == PRE END == ##\n");
    s
}

/// Renders one from-source child profile. `lines` is that source's own deduped directive list;
/// `global_process`/`global_file`/`global_network`/`global_capability` report whether the
/// corresponding *global* allow bucket has any lines, since a child's default-open toggle stays
/// closed if the parent profile already opened it implicitly.
fn render_from_source(
    source: &str,
    lines: &[String],
    global_process_has_lines: bool,
    global_file_has_lines: bool,
    global_network_has_lines: bool,
    global_capability_has_lines: bool,
) -> String {
    let mut file_domain = true;
    let mut network_domain = true;
    let mut capability_domain = true;

    for line in lines {
        if line.contains("  network") {
            network_domain = false;
            continue;
        }
        if line.contains("  capability") {
            capability_domain = false;
            continue;
        }
        file_domain = false;
    }

    let mut s = String::new();
    s.push_str(&format!("  {source} cx,\n"));
    s.push_str(&format!("  profile {source} {{\n"));
    s.push_str(&format!("    {source} rix,\n"));
    s.push_str(&format!("    ## == PRE START ({source}) == ##\n"));
    s.push_str("    #include <abstractions/base>\n");
    s.push_str("    umount,\n");
    if file_domain && !global_process_has_lines && !global_file_has_lines {
        s.push_str("    file,\n");
    }
    if network_domain && !global_network_has_lines {
        s.push_str("    network,\n");
    }
    if capability_domain && !global_capability_has_lines {
        s.push_str("    capability,\n");
    }
    s.push_str(&format!("    ## == PRE END ({source}) == ##\n\n"));
    s.push_str(&format!("    ## == POLICY START ({source}) == ##\n"));
    for line in lines {
        s.push_str("  ");
        s.push_str(line);
    }
    s.push_str(&format!("    ## == POLICY END ({source}) == ##\n\n"));
    s.push_str(&format!("    ## == POST START ({source}) == ##\n"));
    for line in POST_BLOCK.lines() {
        if line.is_empty() {
            s.push('\n');
        } else {
            s.push_str("  ");
            s.push_str(line);
            s.push('\n');
        }
    }
    s.push_str(&format!("    ## == POST END ({source}) == ##\n"));
    s.push_str("  }\n");
    s
}

/// Dispatches one policy's Process/File rules using the shape-priority `else if` chain the
/// original enforces: within a section, only the first non-empty shape (Paths, then
/// Directories, then Patterns) is ever emitted.
fn dispatch_policy(acc: &mut Accumulators, policy: &SecurityPolicy) {
    let proc = &policy.spec.process;
    if !proc.match_paths.is_empty() {
        for r in &proc.match_paths {
            emitter::process_path(acc, r);
        }
    } else if !proc.match_directories.is_empty() {
        for r in &proc.match_directories {
            emitter::process_directory(acc, r);
        }
    } else if !proc.match_patterns.is_empty() {
        for r in &proc.match_patterns {
            emitter::process_pattern(acc, r);
        }
    }

    let file = &policy.spec.file;
    if !file.match_paths.is_empty() {
        for r in &file.match_paths {
            emitter::file_path(acc, r);
        }
    } else if !file.match_directories.is_empty() {
        for r in &file.match_directories {
            emitter::file_directory(acc, r);
        }
    } else if !file.match_patterns.is_empty() {
        for r in &file.match_patterns {
            emitter::file_pattern(acc, r);
        }
    }

    for r in &policy.spec.network.match_protocols {
        emitter::network(acc, r);
    }
    for r in &policy.spec.capabilities.match_capabilities {
        emitter::capability(acc, r);
    }
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub count: usize,
    pub text: String,
    pub changed: bool,
}

/// Regenerates a profile's body from `policies`, splicing in the PRE-MIDDLE and MIDDLE-POST
/// regions preserved from `old_text` and dropping any NATIVE POLICY region. `changed` is false
/// iff the rendered text is byte-identical to `old_text`.
pub fn generate(old_text: &str, policies: &[SecurityPolicy]) -> GenerateResult {
    let mut acc = Accumulators::default();
    for policy in policies {
        dispatch_policy(&mut acc, policy);
    }

    let global_process_has_lines = !acc.process_allow.is_empty();
    let global_file_has_lines = !acc.file_allow.is_empty();
    let global_network_has_lines = !acc.network_allow.is_empty();
    let global_capability_has_lines = !acc.capability_allow.is_empty();

    let mut count = 0usize;
    let mut body_from_source = String::new();
    // BTreeMap iteration is already sorted; this makes rendering order deterministic, unlike
    // the unordered map iteration this was distilled from.
    for (source, lines) in &acc.from_sources {
        count += lines.len();
        body_from_source.push_str(&render_from_source(
            source,
            lines,
            global_process_has_lines,
            global_file_has_lines,
            global_network_has_lines,
            global_capability_has_lines,
        ));
    }

    let mut policy_body = String::new();
    for line in &acc.process_allow {
        policy_body.push_str(line);
    }
    for line in &acc.file_allow {
        policy_body.push_str(line);
    }
    for line in &acc.network_allow {
        policy_body.push_str(line);
    }
    for line in &acc.capability_allow {
        policy_body.push_str(line);
    }
    count += acc.process_allow.len() + acc.file_allow.len() + acc.network_allow.len() + acc.capability_allow.len();

    for line in &acc.process_audit {
        policy_body.push_str(line);
    }
    for line in &acc.file_audit {
        policy_body.push_str(line);
    }
    count += acc.process_audit.len() + acc.file_audit.len();

    for line in &acc.process_block {
        policy_body.push_str(line);
    }
    for line in &acc.file_block {
        policy_body.push_str(line);
    }
    for line in &acc.network_block {
        policy_body.push_str(line);
    }
    for line in &acc.capability_block {
        policy_body.push_str(line);
    }
    count += acc.process_block.len() + acc.file_block.len() + acc.network_block.len() + acc.capability_block.len();

    let head = pre_block(
        global_process_has_lines,
        global_file_has_lines,
        global_network_has_lines,
        global_capability_has_lines,
    );

    let regions = parse_regions(old_text);

    let mut new_text = String::new();
    for line in &regions.head {
        new_text.push_str(line);
    }
    new_text.push_str(&head);
    for line in &regions.pre_mid {
        new_text.push_str(line);
    }
    new_text.push_str("  ## == POLICY START == ##\n");
    new_text.push_str(&body_from_source);
    new_text.push_str(&policy_body);
    new_text.push_str("  ## == POLICY END == ##\n");
    for line in &regions.mid_post {
        new_text.push_str(line);
    }
    new_text.push_str("  ## == POST START == ##\n");
    new_text.push_str(POST_BLOCK);
    new_text.push_str("  ## == POST END == ##\n");
    for line in &regions.foot {
        new_text.push_str(line);
    }

    let changed = new_text != old_text;
    GenerateResult { count, text: new_text, changed }
}

/// True iff `content` contains the literal marker this compiler writes into every profile it
/// manages. Files without it are never touched.
pub fn is_managed(content: &str) -> bool {
    content.contains(MANAGED_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, FileSpec, FromSource, NetworkRule, NetworkSpec, PathRule, PolicySpec, ProcessSpec, SecurityPolicy};

    fn policy_with(spec: PolicySpec) -> SecurityPolicy {
        SecurityPolicy { name: "test".into(), spec }
    }

    #[test]
    fn skeleton_is_managed_and_has_empty_policy() {
        let s = default_skeleton("web");
        assert!(is_managed(&s));
        assert!(s.contains("profile web flags=(attach_disconnected,mediate_deleted) {"));
        assert!(s.contains("## == POLICY START == ##\n  ## == POLICY END == ##\n"));
    }

    #[test]
    fn generate_is_idempotent_on_stable_input() {
        let old = default_skeleton("web");
        let policies = vec![];
        let first = generate(&old, &policies);
        assert!(!first.changed);
        let second = generate(&first.text, &policies);
        assert!(!second.changed);
        assert_eq!(first.text, second.text);
    }

    #[test]
    fn generate_no_allow_process_or_file_keeps_file_toggle() {
        let old = default_skeleton("web");
        let result = generate(&old, &[]);
        assert!(result.text.contains("  file,\n"));
        assert!(result.text.contains("  network,\n"));
        assert!(result.text.contains("  capability,\n"));
    }

    #[test]
    fn generate_allow_rule_suppresses_its_domain_toggle() {
        let old = default_skeleton("web");
        let rule = PathRule {
            path: "/etc/passwd".into(),
            owner_only: true,
            read_only: true,
            action: Some(Action::Allow),
            ..Default::default()
        };
        let policy = policy_with(PolicySpec {
            file: FileSpec { match_paths: vec![rule], ..Default::default() },
            ..Default::default()
        });
        let result = generate(&old, &[policy]);
        assert!(result.text.contains("  owner /etc/passwd r,\n"));
        assert!(!result.text.contains("  file,\n"));
        assert!(result.text.contains("  network,\n"));
        assert!(result.text.contains("  capability,\n"));
        assert_eq!(result.count, 1);
    }

    #[test]
    fn generate_from_source_creates_nested_profile() {
        let old = default_skeleton("web");
        let rule = NetworkRule {
            protocol: "raw".into(),
            action: Some(Action::Block),
            from_source: vec![FromSource::Path { path: "/bin/sh".into() }],
        };
        let policy = policy_with(PolicySpec {
            network: NetworkSpec { match_protocols: vec![rule] },
            ..Default::default()
        });
        let result = generate(&old, &[policy]);
        assert!(result.text.contains("profile /bin/sh {"));
        assert!(result.text.contains("    deny network raw,\n"));
        assert!(!result.text.contains("  deny network raw,\n\n")); // not duplicated globally
    }

    #[test]
    fn generate_preserves_user_regions() {
        let mut old = default_skeleton("web");
        old = old.replace(
            "## == PRE END == ##\n",
            "## == PRE END == ##\n  alias /custom -> /other,\n",
        );
        let result = generate(&old, &[]);
        assert!(result.text.contains("  alias /custom -> /other,\n"));
    }

    #[test]
    fn generate_drops_native_policy_region() {
        let mut old = default_skeleton("web");
        old = old.replace(
            "## == POST START == ##",
            "## == NATIVE POLICY START == ##\n  raw_native_rule,\n  ## == NATIVE POLICY END == ##\n  ## == POST START == ##",
        );
        let result = generate(&old, &[]);
        assert!(!result.text.contains("raw_native_rule"));
    }

    #[test]
    fn shape_priority_drops_lower_priority_shapes() {
        let old = default_skeleton("web");
        let path_rule = PathRule { path: "/bin/a".into(), action: Some(Action::Allow), ..Default::default() };
        let policy = policy_with(PolicySpec {
            process: ProcessSpec {
                match_paths: vec![path_rule],
                match_patterns: vec![crate::types::PatternRule {
                    pattern: "/bin/b".into(),
                    action: Some(Action::Allow),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        });
        let result = generate(&old, &[policy]);
        assert!(result.text.contains("/bin/a ix,\n"));
        assert!(!result.text.contains("/bin/b"));
    }
}
