use tracing::warn;

/// Recognized manifest keys; anything else is warned about and ignored.
const KNOWN_KEYS: &[&str] = &[
    "enabled",
    "module",
    "class",
    "dependencies",
    "capabilities",
    "config_file",
];

/// One `[plugin.<name>]` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub name: String,
    pub enabled: bool,
    pub module: String,
    pub class: String,
    pub dependencies: Vec<String>,
    pub capabilities: Vec<String>,
    pub config_file: Option<String>,
}

impl ManifestEntry {
    /// Constructor key into the plugin registry.
    pub fn locator(&self) -> String {
        format!("{}::{}", self.module, self.class)
    }
}

/// Parsed manifest: well-formed entries plus per-entry parse failures.
#[derive(Debug, Default)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
    /// (plugin name, reason) for malformed entries.
    pub malformed: Vec<(String, String)>,
}

impl Manifest {
    /// Parse the manifest text. A missing or empty `[plugin]` table yields an
    /// empty manifest; a syntactically broken file is a hard error.
    pub fn parse(text: &str) -> Result<Self, String> {
        let value: toml::Value = text
            .parse()
            .map_err(|e| format!("manifest is not valid TOML: {e}"))?;

        let mut manifest = Manifest::default();
        let Some(plugins) = value.get("plugin").and_then(|v| v.as_table()) else {
            return Ok(manifest);
        };

        for (name, entry) in plugins {
            match parse_entry(name, entry) {
                Ok(parsed) => manifest.entries.push(parsed),
                Err(reason) => {
                    warn!(plugin = %name, %reason, "malformed manifest entry");
                    manifest.malformed.push((name.clone(), reason));
                }
            }
        }
        // Deterministic order regardless of TOML table iteration details.
        manifest.entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(manifest)
    }

    pub fn load(path: &str) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read manifest {path}: {e}"))?;
        Self::parse(&text)
    }
}

fn parse_entry(name: &str, value: &toml::Value) -> Result<ManifestEntry, String> {
    let table = value
        .as_table()
        .ok_or_else(|| "entry is not a table".to_string())?;

    for key in table.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            warn!(plugin = %name, key = %key, "unknown manifest key ignored");
        }
    }

    let enabled = table
        .get("enabled")
        .ok_or_else(|| "missing required key 'enabled'".to_string())?
        .as_bool()
        .ok_or_else(|| "'enabled' must be a boolean".to_string())?;
    let module = required_str(table, "module")?;
    let class = required_str(table, "class")?;

    Ok(ManifestEntry {
        name: name.to_string(),
        enabled,
        module,
        class,
        dependencies: string_list(table, "dependencies")?,
        capabilities: string_list(table, "capabilities")?,
        config_file: table
            .get("config_file")
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| "'config_file' must be a string".to_string())
            })
            .transpose()?,
    })
}

fn required_str(table: &toml::value::Table, key: &str) -> Result<String, String> {
    table
        .get(key)
        .ok_or_else(|| format!("missing required key '{key}'"))?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| format!("'{key}' must be a string"))
}

fn string_list(table: &toml::value::Table, key: &str) -> Result<Vec<String>, String> {
    match table.get(key) {
        None => Ok(Vec::new()),
        Some(v) => v
            .as_array()
            .ok_or_else(|| format!("'{key}' must be an array"))?
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("'{key}' entries must be strings"))
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_entry() {
        let manifest = Manifest::parse(
            r#"
[plugin.metrics]
enabled = true
module = "builtin"
class = "Metrics"
dependencies = ["base"]
capabilities = ["observability"]
config_file = "metrics.toml"
"#,
        )
        .unwrap();
        assert_eq!(manifest.entries.len(), 1);
        let e = &manifest.entries[0];
        assert_eq!(e.name, "metrics");
        assert_eq!(e.locator(), "builtin::Metrics");
        assert_eq!(e.dependencies, vec!["base"]);
        assert_eq!(e.config_file.as_deref(), Some("metrics.toml"));
    }

    #[test]
    fn missing_required_key_is_malformed_not_fatal() {
        let manifest = Manifest::parse(
            r#"
[plugin.broken]
enabled = true
module = "builtin"

[plugin.fine]
enabled = true
module = "builtin"
class = "Fine"
"#,
        )
        .unwrap();
        assert_eq!(manifest.entries.len(), 1);
        assert_eq!(manifest.entries[0].name, "fine");
        assert_eq!(manifest.malformed.len(), 1);
        assert_eq!(manifest.malformed[0].0, "broken");
        assert!(manifest.malformed[0].1.contains("class"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let manifest = Manifest::parse(
            r#"
[plugin.p]
enabled = false
module = "m"
class = "C"
experimental_flag = 42
"#,
        )
        .unwrap();
        assert_eq!(manifest.entries.len(), 1);
        assert!(!manifest.entries[0].enabled);
    }

    #[test]
    fn broken_toml_is_a_hard_error() {
        assert!(Manifest::parse("[plugin.p\nenabled = ").is_err());
    }

    #[test]
    fn empty_manifest_is_fine() {
        let manifest = Manifest::parse("").unwrap();
        assert!(manifest.entries.is_empty());
    }
}
