//! Gradle compilation roots and their dependency stitching.
//!
//! A directory with a `build.gradle.kts` is a Gradle root. The root parses
//! the build file and the version catalog once, then stitches the edges no
//! single discoverer sees: the project jar aggregates the main compiles,
//! test code links against the jar, every compile depends on the declared
//! external artifacts, and test tasks get the JUnit console launcher plus
//! every compile task of the root.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

use crate::context::BuildContext;
use crate::discover::{CompilationRoot, StructureDiscoverer};
use crate::gradle::artifact::CONFIG_ID;
use crate::gradle::build_file::BUILD_FILE_NAME;
use crate::gradle::catalog::CATALOG_RELATIVE_PATH;
use crate::gradle::{
    ArtifactConfig, ArtifactDownload, BuildInfo, Coordinate, DeclaredDependency, DependencyRef,
    JarPackage, MAVEN_CENTRAL, VersionCatalog,
};
use crate::graph::Graph;
use crate::task::{Task, TaskPayload};

const CONSOLE_LAUNCHER: (&str, &str, &str) = (
    "org.junit.platform",
    "junit-platform-console-standalone",
    "1.10.0",
);

// Supported source roots: src/main/kotlin, src/test/kotlin, src/dev/kotlin,
// src/testFixtures/kotlin, src/integrationTest/kotlin. The dev set routes
// into main, the fixtures and integration sets into test.

fn is_main_source(dir: &Utf8Path) -> bool {
    let raw = dir.as_str();
    raw.contains("src/main") || raw.contains("src/dev")
}

fn is_test_source(dir: &Utf8Path) -> bool {
    let raw = dir.as_str();
    raw.contains("src/test") || raw.contains("src/integrationTest")
}

/// Probes directories for `build.gradle.kts`.
///
/// Roots are memoised per directory: stitching mutates shared per-root
/// state, so repeated probes of the same directory must hand out the same
/// instance.
pub struct GradleStructure {
    /// Injected Maven cache root (`<home>/.gradle/caches/modules-2/files-2.1`).
    artifact_cache: Utf8PathBuf,
    roots: Mutex<HashMap<Utf8PathBuf, Option<Arc<GradleRoot>>>>,
}

impl GradleStructure {
    pub fn new(artifact_cache: impl Into<Utf8PathBuf>) -> Self {
        Self {
            artifact_cache: artifact_cache.into(),
            roots: Mutex::new(HashMap::new()),
        }
    }
}

impl StructureDiscoverer for GradleStructure {
    fn name(&self) -> &'static str {
        "gradle"
    }

    fn probe(&self, dir: &Utf8Path) -> anyhow::Result<Option<Arc<dyn CompilationRoot>>> {
        let mut roots = self.roots.lock().unwrap();
        if let Some(cached) = roots.get(dir) {
            return Ok(cached.clone().map(|root| root as Arc<dyn CompilationRoot>));
        }

        let root = dir
            .join(BUILD_FILE_NAME)
            .is_file()
            .then(|| Arc::new(GradleRoot::new(dir, self.artifact_cache.clone())));
        roots.insert(dir.to_owned(), root.clone());

        Ok(root.map(|root| root as Arc<dyn CompilationRoot>))
    }
}

#[derive(Default)]
struct RootState {
    jar: Option<Arc<Task>>,
    jar_returned: bool,
    artifacts: Vec<Arc<Task>>,
    artifacts_resolved: bool,
    artifacts_returned: bool,
    /// All compile and test tasks seen so far, for the cross-join below.
    compiles: Vec<Arc<Task>>,
    junits: Vec<Arc<Task>>,
}

/// One Gradle project. Constructed when the structure discoverer first
/// recognises the directory, mutated during stitching, frozen afterwards.
pub struct GradleRoot {
    root_dir: Utf8PathBuf,
    artifact_cache: Utf8PathBuf,
    catalog: Option<Arc<VersionCatalog>>,
    build_info: Option<BuildInfo>,
    state: Mutex<RootState>,
}

impl GradleRoot {
    fn new(root_dir: &Utf8Path, artifact_cache: Utf8PathBuf) -> Self {
        let catalog = load_catalog(root_dir);
        let build_info = load_build_info(root_dir);

        Self {
            root_dir: root_dir.to_owned(),
            artifact_cache,
            catalog,
            build_info,
            state: Mutex::new(RootState::default()),
        }
    }

    pub fn build_info(&self) -> Option<&BuildInfo> {
        self.build_info.as_ref()
    }

    fn repositories(&self, context: &BuildContext) -> Vec<String> {
        if let Some(config) = &context.config
            && let Ok(Some(artifact_config)) = config.discoverer::<ArtifactConfig>(CONFIG_ID)
        {
            return artifact_config.repositories;
        }
        vec![MAVEN_CENTRAL.to_owned()]
    }

    /// Resolve a declared external dependency to a concrete coordinate,
    /// consulting the version catalog for `libs.*` references and missing
    /// versions. `None` when resolution fails; the dependency is then
    /// simply not downloadable and is dropped.
    fn resolve_external(&self, declared: &DeclaredDependency) -> Option<Coordinate> {
        match &declared.reference {
            DependencyRef::Project(_) => None,
            DependencyRef::Catalog(reference) => {
                let catalog = self.catalog.as_ref()?;
                let library = catalog.resolve_reference(reference)?;
                if library.version.is_empty() {
                    return None;
                }
                Some(Coordinate::new(
                    library.group.clone(),
                    library.name.clone(),
                    library.version.clone(),
                ))
            }
            DependencyRef::Coordinate {
                group,
                name,
                version,
            } => {
                let version = version.clone().or_else(|| {
                    self.catalog
                        .as_ref()
                        .and_then(|catalog| catalog.library_version(&format!("{group}-{name}")))
                        .map(str::to_owned)
                })?;
                Some(Coordinate::new(group.clone(), name.clone(), version))
            }
        }
    }

    fn new_artifact(&self, coordinate: Coordinate, repositories: &[String]) -> Arc<Task> {
        Task::new(TaskPayload::Artifact(ArtifactDownload::new(
            coordinate,
            repositories.to_vec(),
            &self.artifact_cache,
        )))
    }
}

impl CompilationRoot for GradleRoot {
    fn root_dir(&self) -> &Utf8Path {
        &self.root_dir
    }

    fn kind(&self) -> &'static str {
        "gradle"
    }

    fn build_context(&self, _dir: &Utf8Path) -> BuildContext {
        let mut context = BuildContext::new();
        if let Some(catalog) = &self.catalog {
            context.catalog = Some(Arc::clone(catalog));
        }
        context
    }

    fn stitch_dependencies(
        &self,
        _dir: &Utf8Path,
        tasks: Vec<Arc<Task>>,
        context: &BuildContext,
    ) -> Vec<Arc<Task>> {
        let repositories = self.repositories(context);
        let mut out = tasks.clone();

        let mut compiles = Vec::new();
        let mut main_compiles = Vec::new();
        let mut test_compiles = Vec::new();
        let mut junits = Vec::new();

        for task in &tasks {
            match task.payload() {
                TaskPayload::KotlinCompile(compile) => {
                    compiles.push(Arc::clone(task));
                    if is_main_source(compile.source_dir()) {
                        main_compiles.push(Arc::clone(task));
                    }
                    if is_test_source(compile.source_dir()) {
                        test_compiles.push(Arc::clone(task));
                    }
                }
                TaskPayload::Junit(_) => junits.push(Arc::clone(task)),
                _ => {}
            }
        }

        let mut state = self.state.lock().unwrap();

        // One jar per project, aggregating the main-source compiles.
        if !main_compiles.is_empty() && state.jar.is_none() {
            state.jar = Some(Task::new(TaskPayload::Jar(JarPackage::new(
                self.root_dir.clone(),
                Vec::new(),
            ))));
        }
        if let Some(jar) = state.jar.clone() {
            for compile in &main_compiles {
                jar.add_dependency(compile);
            }
            if !main_compiles.is_empty() && !state.jar_returned {
                out.push(Arc::clone(&jar));
                state.jar_returned = true;
            } else if !test_compiles.is_empty() {
                // Graph insertion dedupes, so re-offering is harmless.
                out.push(Arc::clone(&jar));
            }
        }

        // Artifact downloads for the declared external dependencies,
        // resolved once per root.
        if !state.artifacts_resolved {
            if let Some(info) = &self.build_info {
                let mut seen = HashSet::new();
                for declared in info.external_dependencies() {
                    let Some(coordinate) = self.resolve_external(declared) else {
                        continue;
                    };
                    if !seen.insert(coordinate.clone()) {
                        continue;
                    }
                    let task = self.new_artifact(coordinate, &repositories);
                    state.artifacts.push(task);
                }
            }
            state.artifacts_resolved = true;
        }
        if !state.artifacts.is_empty() && !state.artifacts_returned {
            out.extend(state.artifacts.iter().cloned());
            state.artifacts_returned = true;
        }

        // Compiled code links against the downloaded artifacts.
        for compile in &compiles {
            for artifact in &state.artifacts {
                compile.add_dependency(artifact);
            }
        }

        // Test code links against the project jar; test runs need it too.
        if let Some(jar) = state.jar.clone() {
            for compile in &test_compiles {
                compile.add_dependency(&jar);
            }
            for junit in &junits {
                junit.add_dependency(&jar);
            }
        }

        // Test execution needs the console launcher on the classpath.
        if !junits.is_empty() {
            let launcher = state
                .artifacts
                .iter()
                .find(|artifact| match artifact.payload() {
                    TaskPayload::Artifact(download) => {
                        download.coordinate().name == CONSOLE_LAUNCHER.1
                    }
                    _ => false,
                })
                .cloned();
            let launcher = match launcher {
                Some(found) => found,
                None => {
                    let coordinate = Coordinate::new(
                        CONSOLE_LAUNCHER.0,
                        CONSOLE_LAUNCHER.1,
                        CONSOLE_LAUNCHER.2,
                    );
                    let task = self.new_artifact(coordinate, &repositories);
                    state.artifacts.push(Arc::clone(&task));
                    out.push(Arc::clone(&task));
                    task
                }
            };
            for junit in &junits {
                junit.add_dependency(&launcher);
            }
        }

        // Every test task depends on every compile task of this root; both
        // sides keep arriving as sibling directories are processed, so the
        // accumulated sets are cross-joined on every call.
        for compile in compiles {
            push_unique(&mut state.compiles, compile);
        }
        for junit in junits {
            push_unique(&mut state.junits, junit);
        }
        for junit in &state.junits {
            for compile in &state.compiles {
                junit.add_dependency(compile);
            }
        }

        out
    }

    /// Add peer-jar edges for declared `project("…")` dependencies, using
    /// the Gradle project path derived from the `settings.gradle*`
    /// ancestor.
    fn resolve_project_dependencies(
        &self,
        graph: &Graph,
        roots: &[Arc<dyn CompilationRoot>],
    ) -> anyhow::Result<()> {
        let Some(info) = &self.build_info else {
            return Ok(());
        };

        let mut jar_by_path: HashMap<String, Arc<Task>> = HashMap::new();
        for task in graph.tasks() {
            if !matches!(task.payload(), TaskPayload::Jar(_)) {
                continue;
            }
            for root in roots {
                if root.root_dir() == task.directory() {
                    if let Some(path) = project_path(root.root_dir()) {
                        jar_by_path.insert(path, Arc::clone(task));
                    }
                    break;
                }
            }
        }

        let own_jar = graph.tasks().find(|task| {
            matches!(task.payload(), TaskPayload::Jar(_)) && task.directory() == self.root_dir
        });
        let Some(own_jar) = own_jar else {
            return Ok(());
        };

        for declared in info.project_dependencies() {
            let DependencyRef::Project(path) = &declared.reference else {
                continue;
            };
            match jar_by_path.get(path) {
                Some(peer) if peer.own_hash() != own_jar.own_hash() => {
                    own_jar.add_dependency(peer);
                }
                Some(_) => {}
                None => warn!(
                    "project dependency {path} of {} has no jar task",
                    self.root_dir
                ),
            }
        }

        Ok(())
    }
}

fn push_unique(tasks: &mut Vec<Arc<Task>>, task: Arc<Task>) {
    let own = task.own_hash();
    if !tasks.iter().any(|existing| existing.own_hash() == own) {
        tasks.push(task);
    }
}

fn load_catalog(root_dir: &Utf8Path) -> Option<Arc<VersionCatalog>> {
    for dir in root_dir.ancestors() {
        let path = dir.join(CATALOG_RELATIVE_PATH);
        if !path.is_file() {
            continue;
        }
        return match VersionCatalog::parse_file(&path) {
            Ok(mut catalog) => {
                catalog.project_dir = root_dir.to_owned();
                Some(Arc::new(catalog))
            }
            Err(err) => {
                warn!("ignoring version catalog {path}: {err:#}");
                None
            }
        };
    }
    None
}

fn load_build_info(root_dir: &Utf8Path) -> Option<BuildInfo> {
    let path = root_dir.join(BUILD_FILE_NAME);
    match BuildInfo::parse_file(&path) {
        Ok(info) => Some(info),
        Err(err) => {
            warn!("ignoring build file {path}: {err:#}");
            None
        }
    }
}

/// Derive the Gradle project path (`a/b/c` → `:a:b:c`) relative to the
/// nearest ancestor holding a `settings.gradle` or `settings.gradle.kts`.
fn project_path(root_dir: &Utf8Path) -> Option<String> {
    let mut project_root = None;
    for ancestor in root_dir.ancestors().skip(1) {
        if ancestor.join("settings.gradle").is_file()
            || ancestor.join("settings.gradle.kts").is_file()
        {
            project_root = Some(ancestor);
            break;
        }
    }

    let relative = root_dir.strip_prefix(project_root?).ok()?;
    Some(format!(":{}", relative.as_str().replace('/', ":")))
}
