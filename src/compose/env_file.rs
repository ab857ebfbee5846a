//! Per-deployment env files passed to `docker compose --env-file` (spec
//! §4.5). Grounded on shipit's `link_shared_env` step, which also
//! materializes an env file on disk next to a release before invoking
//! compose, except here the file is transient rather than symlinked.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::Result;

/// Writes `vars` as `KEY=VALUE` lines to a uniquely named file under
/// `dir` and returns its path. The caller is responsible for deleting it
/// once the compose operation exits successfully (spec §4.5: "deleted on
/// successful exit of the operation" — left behind on failure so it can
/// be inspected).
pub fn write(dir: &Path, vars: &HashMap<String, String>) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!(".env.{}", Uuid::new_v4()));
    let mut contents = String::new();
    let mut keys: Vec<&String> = vars.keys().collect();
    keys.sort();
    for key in keys {
        let value = &vars[key];
        contents.push_str(key);
        contents.push('=');
        contents.push_str(&escape_value(value));
        contents.push('\n');
    }
    std::fs::write(&path, contents)?;
    Ok(path)
}

/// Best-effort cleanup; a missing file is not an error (spec §4.5
/// lifecycle: it may have already been removed by a prior attempt).
pub fn remove(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Compose env files don't support quoting; newlines are the only
/// character that would break the `KEY=VALUE` line format, so they're
/// stripped rather than escaped.
fn escape_value(value: &str) -> String {
    value.replace('\n', " ")
}
