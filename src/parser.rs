//! Synchronous invocation of the AppArmor user-space parser. Thin wrapper so the enforcer's
//! lifecycle logic doesn't have to deal with `std::process::Command` directly.

use crate::error::EnforcerError;
use std::path::Path;

/// Replace-and-wait-for-kernel-load: `apparmor_parser -r -W <path>`.
pub fn replace(parser_bin: &str, path: &Path) -> Result<(), EnforcerError> {
    run(parser_bin, &["-r", "-W", &path.to_string_lossy()])
}

/// Detach a profile from the kernel without touching the file: `apparmor_parser -R <path>`.
pub fn detach(parser_bin: &str, path: &Path) -> Result<(), EnforcerError> {
    run(parser_bin, &["-R", &path.to_string_lossy()])
}

fn run(parser_bin: &str, args: &[&str]) -> Result<(), EnforcerError> {
    let output = std::process::Command::new(parser_bin)
        .args(args)
        .output()
        .map_err(|e| EnforcerError::Parser {
            args: args.iter().map(|s| s.to_string()).collect(),
            stderr: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(EnforcerError::Parser {
            args: args.iter().map(|s| s.to_string()).collect(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(())
}
