// ── Integration manifests ──
//
// A manifest lists integrations to register, in order:
//
//   [[integrations]]
//   name = "svc-a"
//   type = "api-service"
//   depends_on = ["db"]
//   config = { apiUrl = "http://localhost", autoDetectPort = true }

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use splice_core::{IntegrationKind, RegistrationRequest};

use crate::{ConfigError, invalid};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub integrations: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: IntegrationKind,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub metadata: Value,
    /// Names of entries declared earlier in the same manifest.
    #[serde(default, alias = "dependsOn")]
    pub depends_on: Vec<String>,
}

impl ManifestEntry {
    pub fn to_request(&self) -> RegistrationRequest {
        RegistrationRequest {
            name: self.name.clone(),
            kind: self.kind,
            config: self.config.clone(),
            metadata: self.metadata.clone(),
            depends_on: self.depends_on.clone(),
        }
    }
}

impl Manifest {
    /// Registration requests in declaration order.
    pub fn requests(&self) -> Vec<RegistrationRequest> {
        self.integrations.iter().map(ManifestEntry::to_request).collect()
    }

    /// Names are unique and every dependency is declared before its user.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (idx, entry) in self.integrations.iter().enumerate() {
            let field = format!("integrations[{idx}]");
            let name = entry.name.trim();
            if name.is_empty() {
                return Err(invalid(&field, "name is required"));
            }
            if let Some(missing) = entry.depends_on.iter().find(|d| !seen.contains(d.as_str())) {
                return Err(invalid(
                    &field,
                    format!("'{name}' depends on '{missing}', which is not declared before it"),
                ));
            }
            if !seen.insert(name) {
                return Err(invalid(&field, format!("duplicate name '{name}'")));
            }
        }
        Ok(())
    }
}

pub fn parse_manifest(text: &str, origin: &str) -> Result<Manifest, ConfigError> {
    let manifest: Manifest = toml::from_str(text).map_err(|source| ConfigError::Manifest {
        path: origin.to_owned(),
        source,
    })?;
    manifest.validate()?;
    Ok(manifest)
}

pub fn load_manifest(path: &Path) -> Result<Manifest, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_manifest(&text, &path.display().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SAMPLE: &str = r#"
[[integrations]]
name = "hooks"
type = "webhook"
config = { secret = "s3cret", event = "push" }

[[integrations]]
name = "svc-a"
type = "api-service"
depends_on = ["hooks"]
metadata = { tags = ["core"] }

[integrations.config]
apiUrl = "http://localhost"
autoDetectPort = true
skipHealthCheck = true
"#;

    #[test]
    fn parses_entries_in_order() {
        let manifest = parse_manifest(SAMPLE, "sample").unwrap();
        let requests = manifest.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].kind, IntegrationKind::Webhook);
        assert_eq!(requests[1].name, "svc-a");
        assert_eq!(requests[1].depends_on, vec!["hooks"]);
        assert_eq!(requests[1].config["autoDetectPort"], json!(true));
        assert_eq!(requests[1].metadata, json!({ "tags": ["core"] }));
    }

    #[test]
    fn rejects_forward_and_unknown_dependencies() {
        let text = r#"
[[integrations]]
name = "a"
type = "plugin"
depends_on = ["b"]

[[integrations]]
name = "b"
type = "plugin"
"#;
        let err = parse_manifest(text, "t").unwrap_err();
        assert!(err.to_string().contains("'a' depends on 'b'"));
    }

    #[test]
    fn rejects_duplicates_and_bad_types() {
        let dup = "[[integrations]]\nname = \"a\"\ntype = \"plugin\"\n\n[[integrations]]\nname = \"a\"\ntype = \"plugin\"\n";
        assert!(matches!(
            parse_manifest(dup, "t"),
            Err(ConfigError::Validation { .. })
        ));

        let bad = "[[integrations]]\nname = \"a\"\ntype = \"mainframe\"\n";
        assert!(matches!(
            parse_manifest(bad, "t"),
            Err(ConfigError::Manifest { .. })
        ));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(load_manifest(&path).unwrap().integrations.len(), 2);
        assert!(matches!(
            load_manifest(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
