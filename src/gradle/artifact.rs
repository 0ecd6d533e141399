//! Maven artifact resolution and download.
//!
//! An [`ArtifactDownload`] task owns one root coordinate. At construction
//! time the transitive closure is resolved by fetching and parsing POM
//! files; every resolved coordinate becomes part of the task's execute
//! plan. Downloads land in the Gradle-compatible cache under the injected
//! cache root, so artifacts are shared with an external Gradle install.

use std::collections::HashSet;
use std::io::Read;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::{RecvTimeoutError, bounded};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::core::Cancellation;
use crate::task::{DependencyInput, TaskResult};

pub const MAVEN_CENTRAL: &str = "https://repo1.maven.org/maven2";

/// The discoverer-id under which repositories are configured in
/// `fbs.conf.json`.
pub const CONFIG_ID: &str = "artifact-download";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Configuration record for the `artifact-download` discoverer-id.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default)]
    pub repositories: Vec<String>,
}

/// A Maven `group:name:version` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub group: String,
    pub name: String,
    pub version: String,
}

impl Coordinate {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.version)
    }
}

/// Downloads one artifact (plus its resolved transitives) into the local
/// Maven cache.
pub struct ArtifactDownload {
    coordinate: Coordinate,
    repositories: Vec<String>,
    /// Injected `<home>/.gradle/caches/modules-2/files-2.1` root.
    cache_root: Utf8PathBuf,
    local_path: Utf8PathBuf,
    cache_dir: Utf8PathBuf,
    transitives: Vec<Coordinate>,
}

impl ArtifactDownload {
    /// Resolves the transitive closure eagerly; resolution failures are
    /// downgraded to warnings and shrink the execute plan instead of
    /// failing construction.
    pub fn new(
        coordinate: Coordinate,
        repositories: Vec<String>,
        cache_root: &Utf8Path,
    ) -> Self {
        let local_path = jar_cache_path(cache_root, &coordinate);
        let cache_dir = local_path
            .parent()
            .map(Utf8Path::to_owned)
            .unwrap_or_else(|| cache_root.to_owned());

        let mut visited = HashSet::new();
        visited.insert(coordinate.to_string());
        let mut transitives = Vec::new();
        // Construction happens during planning, which carries no
        // cancellation signal of its own.
        let cancel = Cancellation::new();
        resolve_transitives(&coordinate, &repositories, &cancel, &mut visited, &mut transitives);

        Self {
            coordinate,
            repositories,
            cache_root: cache_root.to_owned(),
            local_path,
            cache_dir,
            transitives,
        }
    }

    pub fn coordinate(&self) -> &Coordinate {
        &self.coordinate
    }

    pub fn local_path(&self) -> &Utf8Path {
        &self.local_path
    }

    /// The directory the task logically operates in (its slot in the
    /// Maven cache).
    pub fn cache_dir(&self) -> &Utf8Path {
        &self.cache_dir
    }

    pub fn transitives(&self) -> &[Coordinate] {
        &self.transitives
    }

    pub(crate) fn write_own(&self, hasher: &mut Sha256) {
        hasher.update(b"artifact-download\0");
        hasher.update(self.coordinate.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(self.local_path.as_str().as_bytes());
        hasher.update([0]);
        // The repository list is configuration; order matters.
        for repository in &self.repositories {
            hasher.update(repository.as_bytes());
            hasher.update([0]);
        }
    }

    pub(crate) fn execute(
        &self,
        _work_dir: &Utf8Path,
        _inputs: &[DependencyInput],
        cancel: &Cancellation,
    ) -> TaskResult {
        self.download_all(cancel).into()
    }

    fn download_all(&self, cancel: &Cancellation) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let mut files = Vec::new();

        let root = self.fetch_one(&self.coordinate, cancel)?;
        files.push(root);

        for transitive in &self.transitives {
            match self.fetch_one(transitive, cancel) {
                Ok(path) => files.push(path),
                // One missing transitive is not worth failing the build
                // over; the compiler will complain if it mattered.
                Err(err) => warn!("skipping transitive {transitive}: {err:#}"),
            }
        }

        Ok(files)
    }

    /// Download one coordinate unless it is already cached. Returns the
    /// absolute jar path.
    fn fetch_one(
        &self,
        coordinate: &Coordinate,
        cancel: &Cancellation,
    ) -> anyhow::Result<Utf8PathBuf> {
        let path = jar_cache_path(&self.cache_root, coordinate);
        if path.is_file() {
            return Ok(path);
        }

        let dir = path.parent().expect("cache path has a parent");
        std::fs::create_dir_all(dir).with_context(|| format!("couldn't create {dir}"))?;

        let mut attempts = Vec::new();
        for repository in &self.repositories {
            if cancel.is_cancelled() {
                bail!("download of {coordinate} cancelled");
            }

            let url = jar_url(repository, coordinate);
            match http_get(cancel, &url) {
                Ok(body) => {
                    write_atomic(&path, &body)?;
                    return Ok(path);
                }
                Err(err) => attempts.push(format!("{url}: {err}")),
            }
        }

        Err(anyhow!(
            "couldn't download {coordinate} from any repository:\n{}",
            attempts.join("\n")
        ))
    }
}

/// `<root>/<group>/<name>/<version>/<name>-<version>.jar`, keeping the
/// dots in the group segment the way the Gradle cache does.
fn jar_cache_path(root: &Utf8Path, coordinate: &Coordinate) -> Utf8PathBuf {
    root.join(&coordinate.group)
        .join(&coordinate.name)
        .join(&coordinate.version)
        .join(format!("{}-{}.jar", coordinate.name, coordinate.version))
}

fn repo_base(repository: &str) -> &str {
    repository.trim_end_matches('/')
}

fn jar_url(repository: &str, coordinate: &Coordinate) -> String {
    format!(
        "{}/{}/{}/{}/{}-{}.jar",
        repo_base(repository),
        coordinate.group.replace('.', "/"),
        coordinate.name,
        coordinate.version,
        coordinate.name,
        coordinate.version,
    )
}

fn pom_url(repository: &str, coordinate: &Coordinate) -> String {
    format!(
        "{}/{}/{}/{}/{}-{}.pom",
        repo_base(repository),
        coordinate.group.replace('.', "/"),
        coordinate.name,
        coordinate.version,
        coordinate.name,
        coordinate.version,
    )
}

/// GET `url`, honouring the cancellation signal while the transfer is in
/// flight.
///
/// The blocking request runs on a helper thread; this thread polls the
/// cancellation flag and returns early on cancel, abandoning the in-flight
/// connection (the helper dies with its closed channel once the request
/// resolves).
fn http_get(cancel: &Cancellation, url: &str) -> anyhow::Result<Vec<u8>> {
    if cancel.is_cancelled() {
        bail!("request to {url} cancelled");
    }

    let (sender, receiver) = bounded(1);
    let request_url = url.to_owned();
    std::thread::spawn(move || {
        let result = ureq::get(&request_url)
            .timeout(HTTP_TIMEOUT)
            .call()
            .map_err(anyhow::Error::new)
            .and_then(|response| {
                let mut body = Vec::new();
                response
                    .into_reader()
                    .read_to_end(&mut body)
                    .context("couldn't read response body")?;
                Ok(body)
            });
        sender.send(result).ok();
    });

    loop {
        match receiver.recv_timeout(CANCEL_POLL_INTERVAL) {
            Ok(result) => return result,
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    bail!("request to {url} cancelled");
                }
            }
            Err(RecvTimeoutError::Disconnected) => bail!("request worker for {url} vanished"),
        }
    }
}

/// Save via a sibling temp file and rename, tolerating the race where a
/// concurrent download published the same path first.
fn write_atomic(path: &Utf8Path, body: &[u8]) -> anyhow::Result<()> {
    let dir = path.parent().expect("cache path has a parent");
    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("couldn't create temp file in {dir}"))?;
    std::io::Write::write_all(&mut temp, body).context("couldn't write artifact")?;

    if temp.persist(path).is_err() && !path.is_file() {
        bail!("couldn't persist artifact to {path}");
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct Pom {
    #[serde(default)]
    dependencies: PomDependencies,
}

#[derive(Debug, Default, Deserialize)]
struct PomDependencies {
    #[serde(default, rename = "dependency")]
    entries: Vec<PomDependency>,
}

#[derive(Debug, Deserialize)]
struct PomDependency {
    #[serde(rename = "groupId")]
    group_id: Option<String>,
    #[serde(rename = "artifactId")]
    artifact_id: Option<String>,
    version: Option<String>,
    scope: Option<String>,
    optional: Option<String>,
}

/// Walk the POM graph breadth-first from `coordinate`, appending every
/// compile-relevant dependency to `out`. Failures only warn.
fn resolve_transitives(
    coordinate: &Coordinate,
    repositories: &[String],
    cancel: &Cancellation,
    visited: &mut HashSet<String>,
    out: &mut Vec<Coordinate>,
) {
    let pom = match fetch_pom(coordinate, repositories, cancel) {
        Some(pom) => pom,
        // Some artifacts ship without a reachable POM; treat them as
        // leaves.
        None => return,
    };

    for entry in pom.dependencies.entries {
        if matches!(entry.scope.as_deref(), Some("test") | Some("provided")) {
            continue;
        }
        if entry.optional.as_deref() == Some("true") {
            continue;
        }

        let (Some(group), Some(name)) = (entry.group_id, entry.artifact_id) else {
            continue;
        };
        // Dependency-management indirection is out of scope; versionless
        // entries are skipped.
        let Some(version) = entry.version.filter(|v| !v.is_empty()) else {
            continue;
        };

        let dependency = Coordinate::new(group, name, version);
        if !visited.insert(dependency.to_string()) {
            continue;
        }

        out.push(dependency.clone());
        resolve_transitives(&dependency, repositories, cancel, visited, out);
    }
}

fn fetch_pom(coordinate: &Coordinate, repositories: &[String], cancel: &Cancellation) -> Option<Pom> {
    for repository in repositories {
        let url = pom_url(repository, coordinate);
        let body = match http_get(cancel, &url) {
            Ok(body) => body,
            Err(err) => {
                warn!("couldn't fetch {url}: {err:#}");
                continue;
            }
        };

        match quick_xml::de::from_str::<Pom>(&String::from_utf8_lossy(&body)) {
            Ok(pom) => return Some(pom),
            Err(err) => warn!("couldn't parse POM for {coordinate}: {err}"),
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_keeps_dotted_group() {
        let path = jar_cache_path(
            Utf8Path::new("/home/u/.gradle/caches/modules-2/files-2.1"),
            &Coordinate::new("org.junit.jupiter", "junit-jupiter", "5.10.0"),
        );
        assert_eq!(
            path,
            "/home/u/.gradle/caches/modules-2/files-2.1/org.junit.jupiter/junit-jupiter/5.10.0/junit-jupiter-5.10.0.jar"
        );
    }

    #[test]
    fn urls_slash_the_group() {
        let coordinate = Coordinate::new("org.slf4j", "slf4j-api", "2.0.9");
        assert_eq!(
            jar_url("https://repo1.maven.org/maven2/", &coordinate),
            "https://repo1.maven.org/maven2/org/slf4j/slf4j-api/2.0.9/slf4j-api-2.0.9.jar"
        );
        assert_eq!(
            pom_url(MAVEN_CENTRAL, &coordinate),
            "https://repo1.maven.org/maven2/org/slf4j/slf4j-api/2.0.9/slf4j-api-2.0.9.pom"
        );
    }

    #[test]
    fn pom_dependencies_filter_scope_and_optional() {
        const POM: &str = r#"<?xml version="1.0"?>
<project>
  <groupId>com.example</groupId>
  <artifactId>thing</artifactId>
  <version>1.0</version>
  <dependencies>
    <dependency>
      <groupId>com.example</groupId>
      <artifactId>keep</artifactId>
      <version>1.1</version>
    </dependency>
    <dependency>
      <groupId>com.example</groupId>
      <artifactId>test-only</artifactId>
      <version>1.0</version>
      <scope>test</scope>
    </dependency>
    <dependency>
      <groupId>com.example</groupId>
      <artifactId>opt</artifactId>
      <version>1.0</version>
      <optional>true</optional>
    </dependency>
    <dependency>
      <groupId>com.example</groupId>
      <artifactId>versionless</artifactId>
    </dependency>
  </dependencies>
</project>"#;

        let pom: Pom = quick_xml::de::from_str(POM).unwrap();
        assert_eq!(pom.dependencies.entries.len(), 4);

        // Mirror the filtering applied during resolution.
        let kept: Vec<_> = pom
            .dependencies
            .entries
            .into_iter()
            .filter(|e| !matches!(e.scope.as_deref(), Some("test") | Some("provided")))
            .filter(|e| e.optional.as_deref() != Some("true"))
            .filter(|e| e.version.as_deref().is_some_and(|v| !v.is_empty()))
            .collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].artifact_id.as_deref(), Some("keep"));
    }

    #[test]
    fn repository_list_is_part_of_the_configuration_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let coordinate = Coordinate::new("com.example", "thing", "1.0");

        let hash = |repositories: Vec<String>| {
            let mut hasher = Sha256::new();
            ArtifactDownload::new(coordinate.clone(), repositories, root).write_own(&mut hasher);
            crate::core::Hash32::finalize(hasher)
        };

        let default = hash(vec![]);
        assert_eq!(default, hash(vec![]));
        // Unreachable loopback port: the POM probe fails instantly and
        // only warns, which is all this test needs from it.
        assert_ne!(default, hash(vec!["http://127.0.0.1:9".into()]));
    }

    #[test]
    fn cancelled_request_aborts_before_connecting() {
        let cancel = Cancellation::new();
        cancel.cancel();
        let err = http_get(&cancel, "http://127.0.0.1:9/never").unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn already_cached_artifact_short_circuits() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let coordinate = Coordinate::new("com.example", "cached", "1.0");

        let jar = jar_cache_path(root, &coordinate);
        std::fs::create_dir_all(jar.parent().unwrap()).unwrap();
        std::fs::write(&jar, b"jar bytes").unwrap();

        // No repositories: the only way this can succeed is the cache.
        let task = ArtifactDownload::new(coordinate, vec![], root);
        let result = task.execute(Utf8Path::new("/tmp"), &[], &Cancellation::new());
        assert!(result.is_ok());
        assert_eq!(result.files, [jar]);
    }

    #[test]
    fn no_repositories_and_no_cache_is_a_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let task = ArtifactDownload::new(
            Coordinate::new("com.example", "missing", "1.0"),
            vec![],
            root,
        );

        let result = task.execute(Utf8Path::new("/tmp"), &[], &Cancellation::new());
        assert!(result.error.is_some());
    }
}
