//! Gradle version catalogs (`gradle/libs.versions.toml`).
//!
//! Only the `[versions]`, `[libraries]` and `[plugins]` sections are read.
//! Library entries come in two shapes: a flat `"group:name:version"` string
//! or an inline table with `module =` / `group =` + `name =` and either
//! `version =` or `version.ref =`. Version references are resolved in a
//! second pass; malformed entries are silently dropped.

use std::collections::HashMap;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use toml::Value;

pub const CATALOG_RELATIVE_PATH: &str = "gradle/libs.versions.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryCoordinate {
    pub group: String,
    pub name: String,
    pub version: String,
    /// The `group:name` pair.
    pub module: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginCoordinate {
    pub id: String,
    pub version: String,
}

#[derive(Debug, Clone, Default)]
pub struct VersionCatalog {
    pub project_dir: Utf8PathBuf,
    pub versions: HashMap<String, String>,
    pub libraries: HashMap<String, LibraryCoordinate>,
    pub plugins: HashMap<String, PluginCoordinate>,
}

/// A version that may still point at a `[versions]` entry.
enum VersionRef {
    Literal(String),
    Reference(String),
    Missing,
}

impl VersionCatalog {
    pub fn parse_file(path: &Utf8Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("couldn't read version catalog {path}"))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let table: toml::Table = content.parse().context("couldn't parse version catalog")?;
        let mut catalog = VersionCatalog::default();

        if let Some(Value::Table(versions)) = table.get("versions") {
            for (key, value) in versions {
                if let Value::String(version) = value {
                    catalog.versions.insert(key.clone(), version.clone());
                }
            }
        }

        let mut pending: Vec<(String, LibraryCoordinate, VersionRef)> = Vec::new();
        if let Some(Value::Table(libraries)) = table.get("libraries") {
            for (key, value) in libraries {
                if let Some((library, version)) = parse_library(value) {
                    pending.push((key.clone(), library, version));
                }
            }
        }

        for (key, mut library, version) in pending {
            library.version = match version {
                VersionRef::Literal(version) => version,
                VersionRef::Reference(reference) => {
                    match catalog.versions.get(&reference) {
                        Some(version) => version.clone(),
                        // Dangling reference: drop the entry.
                        None => continue,
                    }
                }
                VersionRef::Missing => String::new(),
            };
            catalog.libraries.insert(key, library);
        }

        if let Some(Value::Table(plugins)) = table.get("plugins") {
            for (key, value) in plugins {
                if let Some((mut plugin, version)) = parse_plugin(value) {
                    plugin.version = match version {
                        VersionRef::Literal(version) => version,
                        VersionRef::Reference(reference) => {
                            match catalog.versions.get(&reference) {
                                Some(version) => version.clone(),
                                None => continue,
                            }
                        }
                        VersionRef::Missing => String::new(),
                    };
                    catalog.plugins.insert(key.clone(), plugin);
                }
            }
        }

        Ok(catalog)
    }

    pub fn library(&self, name: &str) -> Option<&LibraryCoordinate> {
        self.libraries.get(name)
    }

    /// Resolve a `libs.foo.bar` build-file reference: the dotted accessor
    /// maps to the entry `foo-bar`; the exact name is tried first.
    pub fn resolve_reference(&self, reference: &str) -> Option<&LibraryCoordinate> {
        self.libraries
            .get(reference)
            .or_else(|| self.libraries.get(&reference.replace('.', "-")))
    }

    pub fn library_version(&self, name: &str) -> Option<&str> {
        self.libraries
            .get(name)
            .map(|library| library.version.as_str())
            .filter(|version| !version.is_empty())
    }

    pub fn version(&self, reference: &str) -> Option<&str> {
        self.versions.get(reference).map(String::as_str)
    }

    pub fn plugin(&self, name: &str) -> Option<&PluginCoordinate> {
        self.plugins.get(name)
    }
}

fn parse_library(value: &Value) -> Option<(LibraryCoordinate, VersionRef)> {
    match value {
        Value::String(coordinate) => {
            let mut parts = coordinate.splitn(3, ':');
            let group = parts.next()?.trim().to_owned();
            let name = parts.next()?.trim().to_owned();
            if group.is_empty() || name.is_empty() {
                return None;
            }
            let version = match parts.next() {
                Some(version) => VersionRef::Literal(version.trim().to_owned()),
                None => VersionRef::Missing,
            };
            let module = format!("{group}:{name}");
            Some((
                LibraryCoordinate {
                    group,
                    name,
                    version: String::new(),
                    module,
                },
                version,
            ))
        }
        Value::Table(table) => {
            let (group, name) = if let Some(Value::String(module)) = table.get("module") {
                let (group, name) = module.split_once(':')?;
                (group.to_owned(), name.to_owned())
            } else {
                let group = table.get("group")?.as_str()?.to_owned();
                let name = table.get("name")?.as_str()?.to_owned();
                (group, name)
            };

            let module = format!("{group}:{name}");
            Some((
                LibraryCoordinate {
                    group,
                    name,
                    version: String::new(),
                    module,
                },
                parse_version(table),
            ))
        }
        _ => None,
    }
}

fn parse_plugin(value: &Value) -> Option<(PluginCoordinate, VersionRef)> {
    match value {
        // "id:version" shorthand
        Value::String(coordinate) => {
            let (id, version) = coordinate.split_once(':')?;
            Some((
                PluginCoordinate {
                    id: id.to_owned(),
                    version: String::new(),
                },
                VersionRef::Literal(version.to_owned()),
            ))
        }
        Value::Table(table) => {
            let id = table.get("id")?.as_str()?.to_owned();
            Some((
                PluginCoordinate {
                    id,
                    version: String::new(),
                },
                parse_version(table),
            ))
        }
        _ => None,
    }
}

/// `version = "1.2.3"` or `version.ref = "name"` (a nested table in TOML).
fn parse_version(table: &toml::Table) -> VersionRef {
    match table.get("version") {
        Some(Value::String(version)) => VersionRef::Literal(version.clone()),
        Some(Value::Table(nested)) => match nested.get("ref").and_then(Value::as_str) {
            Some(reference) => VersionRef::Reference(reference.to_owned()),
            None => VersionRef::Missing,
        },
        _ => VersionRef::Missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
[versions]
junit = "5.10.0"
kotlin = "1.9.22"

[libraries]
junit-jupiter = { module = "org.junit.jupiter:junit-jupiter", version.ref = "junit" }
slf4j = "org.slf4j:slf4j-api:2.0.9"
kotlin-stdlib = { group = "org.jetbrains.kotlin", name = "kotlin-stdlib", version = "1.9.22" }
dangling = { module = "a:b", version.ref = "nope" }
broken = 42

[plugins]
kotlin-jvm = { id = "org.jetbrains.kotlin.jvm", version.ref = "kotlin" }
"#;

    #[test]
    fn parses_all_three_sections() {
        let catalog = VersionCatalog::parse(CATALOG).unwrap();
        assert_eq!(catalog.version("junit"), Some("5.10.0"));
        assert_eq!(catalog.libraries.len(), 3);
        assert_eq!(
            catalog.plugin("kotlin-jvm").unwrap().version,
            "1.9.22"
        );
    }

    #[test]
    fn version_references_resolve_in_a_second_pass() {
        let catalog = VersionCatalog::parse(CATALOG).unwrap();
        let jupiter = catalog.library("junit-jupiter").unwrap();
        assert_eq!(jupiter.group, "org.junit.jupiter");
        assert_eq!(jupiter.name, "junit-jupiter");
        assert_eq!(jupiter.version, "5.10.0");
    }

    #[test]
    fn flat_and_table_forms_agree() {
        let catalog = VersionCatalog::parse(CATALOG).unwrap();
        assert_eq!(catalog.library_version("slf4j"), Some("2.0.9"));
        assert_eq!(catalog.library_version("kotlin-stdlib"), Some("1.9.22"));
    }

    #[test]
    fn malformed_entries_are_dropped_silently() {
        let catalog = VersionCatalog::parse(CATALOG).unwrap();
        assert!(catalog.library("broken").is_none());
        assert!(catalog.library("dangling").is_none());
    }

    #[test]
    fn dotted_references_map_to_hyphenated_entries() {
        let catalog = VersionCatalog::parse(CATALOG).unwrap();
        assert!(catalog.resolve_reference("junit.jupiter").is_some());
        assert!(catalog.resolve_reference("junit-jupiter").is_some());
        assert!(catalog.resolve_reference("unknown.thing").is_none());
    }
}
