//! Scans a compose file's text for `${VAR:?msg}` (required) and
//! `${VAR:-default}` (optional) interpolations (spec §4.1 phase 5).
//!
//! The corpus's regex precedent is komodo and `jj`, both of which reach
//! for `regex` rather than hand-rolled scanning for this class of
//! "extract interpolation placeholders from text" problem.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::error::{Error, Result};

#[derive(Debug, Default, Clone)]
pub struct EnvScanResult {
    pub required: HashSet<String>,
    pub optional: HashSet<String>,
}

fn interpolation_pattern() -> Regex {
    // Captures the variable name and everything else up to the closing
    // brace, so malformed variants (no colon before `-`/`?`) are still
    // matched and can be rejected explicitly rather than silently
    // skipped by a regex that simply fails to match them.
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)([^}]*)\}").expect("static regex is valid")
}

/// Scans for shell-style interpolations (spec §9): `${VAR:?msg}` is
/// required, `${VAR:-default}` is optional, bare `${VAR}` is required.
/// `${VAR-default}` (no colon) is a variant the spec explicitly calls out
/// as unsupported — rejected rather than silently treated as optional.
pub fn scan(compose_contents: &str) -> Result<EnvScanResult> {
    let pattern = interpolation_pattern();
    let mut result = EnvScanResult::default();
    for captures in pattern.captures_iter(compose_contents) {
        let name = captures[1].to_string();
        let suffix = captures.get(2).map(|m| m.as_str()).unwrap_or("");
        if suffix.is_empty() {
            result.required.insert(name);
        } else if suffix.starts_with(":?") {
            result.required.insert(name);
        } else if suffix.starts_with(":-") {
            result.optional.insert(name);
        } else {
            return Err(Error::ComposeInvalid(format!(
                "unsupported environment interpolation syntax for '{name}': \
                 only ${{{name}}}, ${{{name}:?msg}}, and ${{{name}:-default}} are supported"
            )));
        }
    }
    Ok(result)
}

/// Fails with `MissingRequiredEnv` listing every unset required var
/// (spec §4.1 phase 5). Vars with an optional/default syntax are never
/// blocking.
pub fn check_required(result: &EnvScanResult, available: &HashMap<String, String>) -> Result<()> {
    let mut missing: Vec<&String> = result
        .required
        .iter()
        .filter(|name| !available.contains_key(name.as_str()))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    missing.sort();
    let joined = missing
        .into_iter()
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    Err(Error::MissingRequiredEnv(joined))
}
