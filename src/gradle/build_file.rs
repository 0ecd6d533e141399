//! Line-oriented `build.gradle.kts` parsing.
//!
//! The parser streams the build file tracking which block it is inside
//! (`dependencies { … }` or `plugins { … }`). It is deliberately not a
//! Kotlin parser; the recognised shapes cover what Gradle build files
//! declare in practice: project references, version-catalog accessors and
//! bare `"group:name[:version]"` coordinates.

use std::io::{BufRead, BufReader};
use std::sync::LazyLock;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

pub const BUILD_FILE_NAME: &str = "build.gradle.kts";

static DEPENDENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(implementation|testImplementation|api|compileOnly|runtimeOnly)\s*\(\s*(.+)\s*\)")
        .expect("dependency pattern")
});
static PROJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"project\s*\(\s*["']([^"']+)["']\s*\)"#).expect("project pattern")
});
static CATALOG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"libs\.([A-Za-z0-9_.]+)").expect("catalog pattern"));
static COORDINATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']([^"']+)["']"#).expect("coordinate pattern"));
static PLUGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(id|kotlin)\s*\(\s*["']([^"']+)["']\s*\)"#).expect("plugin pattern")
});

/// What a dependency line points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyRef {
    /// `project(":a:b")`
    Project(String),
    /// `libs.foo.bar` — resolved against the version catalog later.
    Catalog(String),
    /// `"group:name[:version]"`
    Coordinate {
        group: String,
        name: String,
        version: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct DeclaredDependency {
    pub configuration: String,
    pub reference: DependencyRef,
}

/// Parsed view of one `build.gradle.kts`.
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub project_dir: Utf8PathBuf,
    pub dependencies: Vec<DeclaredDependency>,
    pub plugins: Vec<String>,
}

impl BuildInfo {
    pub fn parse_file(path: &Utf8Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("couldn't open build file {path}"))?;
        let project_dir = path
            .parent()
            .map(Utf8Path::to_owned)
            .unwrap_or_else(|| Utf8PathBuf::from("."));
        Self::parse(BufReader::new(file), project_dir)
    }

    pub fn parse(reader: impl BufRead, project_dir: Utf8PathBuf) -> anyhow::Result<Self> {
        let mut info = BuildInfo {
            project_dir,
            dependencies: Vec::new(),
            plugins: Vec::new(),
        };

        let mut in_dependencies = false;
        let mut in_plugins = false;

        for line in reader.lines() {
            let line = line.context("couldn't read build file")?;
            let line = line.trim();

            if line.is_empty() || line.starts_with("//") {
                continue;
            }

            if line.contains("dependencies {") {
                in_dependencies = true;
                continue;
            }
            if line.contains("plugins {") {
                in_plugins = true;
                continue;
            }
            if line == "}" {
                in_dependencies = false;
                in_plugins = false;
                continue;
            }

            if in_dependencies
                && let Some(captures) = DEPENDENCY.captures(line)
            {
                let configuration = captures[1].to_owned();
                if let Some(reference) = parse_reference(&captures[2]) {
                    info.dependencies.push(DeclaredDependency {
                        configuration,
                        reference,
                    });
                }
            }

            if in_plugins
                && let Some(captures) = PLUGIN.captures(line)
            {
                info.plugins.push(captures[2].to_owned());
            }
        }

        Ok(info)
    }

    pub fn external_dependencies(&self) -> impl Iterator<Item = &DeclaredDependency> {
        self.dependencies
            .iter()
            .filter(|dep| !matches!(dep.reference, DependencyRef::Project(_)))
    }

    pub fn project_dependencies(&self) -> impl Iterator<Item = &DeclaredDependency> {
        self.dependencies
            .iter()
            .filter(|dep| matches!(dep.reference, DependencyRef::Project(_)))
    }

    pub fn has_plugin(&self, id: &str) -> bool {
        self.plugins.iter().any(|plugin| plugin == id)
    }
}

fn parse_reference(argument: &str) -> Option<DependencyRef> {
    if let Some(captures) = PROJECT.captures(argument) {
        return Some(DependencyRef::Project(captures[1].to_owned()));
    }

    if let Some(captures) = CATALOG.captures(argument) {
        return Some(DependencyRef::Catalog(captures[1].to_owned()));
    }

    let captures = COORDINATE.captures(argument)?;
    let mut parts = captures[1].splitn(3, ':');
    let group = parts.next()?.to_owned();
    let name = parts.next()?.to_owned();
    Some(DependencyRef::Coordinate {
        group,
        name,
        version: parts.next().map(str::to_owned),
    })
}
