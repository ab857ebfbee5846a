//! Traefik detection and zero-downtime routing switch (spec §4.6).
//!
//! Grounded on shipit's `traefik/mod.rs` (Traefik is treated as an
//! optional collaborator: absence degrades gracefully rather than
//! failing the deploy) and on komodo's `serde_yaml_ng`-based compose
//! parsing for emitting the override file; unlike shipit (which installs
//! Traefik over SSH), this module only detects and routes around an
//! already-running instance — installation is out of scope (spec §3).

pub mod health;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_yaml_ng::Value;

use crate::compose;
use crate::error::{Error, Result};

pub use health::wait_for_healthy;

pub struct RoutingInjector;

impl RoutingInjector {
    pub fn new() -> Self {
        Self
    }

    /// Traefik detection (spec §4.6): true iff a running container whose
    /// name contains "traefik" exists. Query failures degrade to `false`
    /// rather than propagating, so a Docker hiccup doesn't block a
    /// deploy that doesn't need routing.
    pub async fn is_running(&self) -> bool {
        compose::container_name_running("traefik").await
    }

    /// Emits `docker-compose.traefik.yml` next to `compose_file`
    /// containing a `traefik.http.routers.<service>.priority` label per
    /// service. Refuses to run if the compose file already assigns a
    /// router priority itself (spec §4.6: "refusing to clobber operator
    /// intent").
    pub fn generate_override(&self, compose_file: &Path, priority: u64) -> Result<PathBuf> {
        let override_path = compose_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("docker-compose.traefik.yml");
        if override_path.exists() {
            // Single-shot per worktree (spec §8): a prior call already
            // assigned every service a router priority, so this one would
            // silently clobber operator-visible routing state.
            return Err(Error::RoutingFailed(format!(
                "override already exists: {}",
                override_path.display()
            )));
        }

        let raw = std::fs::read_to_string(compose_file)
            .map_err(|e| Error::ComposeFileNotFound(format!("{}: {e}", compose_file.display())))?;
        let doc: Value = serde_yaml_ng::from_str(&raw)
            .map_err(|e| Error::ComposeInvalid(format!("malformed compose YAML: {e}")))?;

        let services = doc
            .get("services")
            .and_then(Value::as_mapping)
            .ok_or_else(|| Error::ComposeInvalid("compose file has no services".to_string()))?;

        let mut override_services: BTreeMap<String, ServiceOverride> = BTreeMap::new();
        for (name, definition) in services {
            let name = name
                .as_str()
                .ok_or_else(|| Error::ComposeInvalid("non-string service name".to_string()))?
                .to_string();

            if has_priority_label(definition) {
                return Err(Error::RoutingFailed(format!(
                    "service '{name}' already declares a traefik router priority label"
                )));
            }

            override_services.insert(
                name.clone(),
                ServiceOverride {
                    labels: vec![format!("traefik.http.routers.{name}.priority={priority}")],
                },
            );
        }

        let override_doc = ComposeOverride {
            services: override_services,
        };
        let rendered = serde_yaml_ng::to_string(&override_doc)
            .map_err(|e| Error::ComposeInvalid(format!("failed to render override: {e}")))?;

        std::fs::write(&override_path, rendered)?;
        Ok(override_path)
    }
}

impl Default for RoutingInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct ComposeOverride {
    services: BTreeMap<String, ServiceOverride>,
}

#[derive(Serialize)]
struct ServiceOverride {
    labels: Vec<String>,
}

fn has_priority_label(service: &Value) -> bool {
    let Some(labels) = service.get("labels") else {
        return false;
    };
    // Compose allows labels as a YAML sequence (`- key=value`) or a
    // mapping (`key: value`); check both shapes.
    if let Some(seq) = labels.as_sequence() {
        return seq.iter().any(|label| {
            label
                .as_str()
                .map(|s| is_priority_label(s))
                .unwrap_or(false)
        });
    }
    if let Some(map) = labels.as_mapping() {
        return map
            .keys()
            .filter_map(Value::as_str)
            .any(is_priority_label_key);
    }
    false
}

fn is_priority_label(entry: &str) -> bool {
    match entry.split_once('=') {
        Some((key, _)) => is_priority_label_key(key),
        None => false,
    }
}

fn is_priority_label_key(key: &str) -> bool {
    key.starts_with("traefik.http.routers.") && key.ends_with(".priority")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_compose(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("docker-compose.yml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn generates_priority_labels_per_service() {
        let dir = tempfile::tempdir().unwrap();
        let compose_file = write_compose(
            dir.path(),
            "services:\n  web:\n    image: nginx\n  db:\n    image: postgres\n",
        );

        let injector = RoutingInjector::new();
        let path = injector
            .generate_override(&compose_file, 1_700_000_000_000)
            .unwrap();
        let rendered = std::fs::read_to_string(&path).unwrap();
        assert!(rendered.contains("traefik.http.routers.web.priority=1700000000000"));
        assert!(rendered.contains("traefik.http.routers.db.priority=1700000000000"));
    }

    #[test]
    fn second_generation_in_the_same_worktree_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let compose_file = write_compose(dir.path(), "services:\n  web:\n    image: nginx\n");

        let injector = RoutingInjector::new();
        injector.generate_override(&compose_file, 1).unwrap();
        let second = injector.generate_override(&compose_file, 2);
        assert!(second.is_err());
    }

    #[test]
    fn refuses_to_clobber_existing_priority_label() {
        let dir = tempfile::tempdir().unwrap();
        let compose_file = write_compose(
            dir.path(),
            "services:\n  web:\n    image: nginx\n    labels:\n      - traefik.http.routers.web.priority=5\n",
        );

        let injector = RoutingInjector::new();
        let result = injector.generate_override(&compose_file, 42);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_malformed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let compose_file = write_compose(dir.path(), "services: [this, is, not, a, map");

        let injector = RoutingInjector::new();
        assert!(injector.generate_override(&compose_file, 1).is_err());
    }
}
