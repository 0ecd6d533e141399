use std::sync::{Arc, LazyLock};

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::context::BuildContext;
use crate::discover::{Discoverer, DiscoveryResult};
use crate::kotlin::{JunitTest, KotlinCompile};
use crate::task::{Task, TaskPayload};

/// Emits one compile task per directory that holds Kotlin sources.
///
/// The listing is non-recursive; nesting is expressed through the
/// potential-dependency mechanism instead, which offers the subdirectory
/// compile tasks as upstream edges.
pub struct KotlinDiscoverer;

impl Discoverer for KotlinDiscoverer {
    fn name(&self) -> &'static str {
        "kotlin"
    }

    fn discover(
        &self,
        dir: &Utf8Path,
        potential_deps: &[Arc<Task>],
        _context: &BuildContext,
    ) -> anyhow::Result<DiscoveryResult> {
        if !dir.is_dir() {
            return Ok(DiscoveryResult::default());
        }

        let sources = kotlin_files(dir)?;
        if sources.is_empty() {
            return Ok(DiscoveryResult::default());
        }

        let task = Task::new(TaskPayload::KotlinCompile(KotlinCompile::new(dir, sources)));
        for dep in potential_deps {
            if matches!(dep.payload(), TaskPayload::KotlinCompile(_)) {
                task.add_dependency(dep);
            }
        }

        Ok(DiscoveryResult::from_tasks(vec![task]))
    }
}

static JUNIT_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@Test\b|@org\.junit\.jupiter\.api\.Test|@org\.junit\.Test|import\s+org\.junit")
        .expect("junit marker pattern")
});

/// Emits one test task per Kotlin file that contains JUnit tests.
pub struct JunitDiscoverer;

impl Discoverer for JunitDiscoverer {
    fn name(&self) -> &'static str {
        "junit"
    }

    fn discover(
        &self,
        dir: &Utf8Path,
        potential_deps: &[Arc<Task>],
        _context: &BuildContext,
    ) -> anyhow::Result<DiscoveryResult> {
        if !dir.is_dir() {
            return Ok(DiscoveryResult::default());
        }

        let mut result = DiscoveryResult::default();

        for file in kotlin_files(dir)? {
            let content = match std::fs::read_to_string(dir.join(&file)) {
                Ok(content) => content,
                Err(err) => {
                    result
                        .errors
                        .push(anyhow::Error::new(err).context(format!("couldn't read {file}")));
                    continue;
                }
            };
            if !JUNIT_MARKERS.is_match(&content) {
                continue;
            }

            let class_name = file
                .file_stem()
                .unwrap_or(file.as_str())
                .to_owned();
            let task = Task::new(TaskPayload::Junit(JunitTest::new(file, dir, class_name)));
            for dep in potential_deps {
                if matches!(dep.payload(), TaskPayload::KotlinCompile(_)) {
                    task.add_dependency(dep);
                }
            }
            result.tasks.push(task);
        }

        Ok(result)
    }
}

/// The `.kt` files directly inside `dir`, sorted by name.
fn kotlin_files(dir: &Utf8Path) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("couldn't read directory {dir}"))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("couldn't read directory {dir}"))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.ends_with(".kt") {
            files.push(Utf8PathBuf::from(name));
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, Utf8PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        (tmp, dir)
    }

    #[test]
    fn kotlin_sources_become_one_compile_task() {
        let (_tmp, dir) = fixture();
        std::fs::write(dir.join("Main.kt"), "fun main() {}").unwrap();
        std::fs::write(dir.join("Util.kt"), "fun util() {}").unwrap();
        std::fs::write(dir.join("notes.txt"), "not kotlin").unwrap();

        let result = KotlinDiscoverer
            .discover(&dir, &[], &BuildContext::new())
            .unwrap();
        assert_eq!(result.tasks.len(), 1);

        let TaskPayload::KotlinCompile(compile) = result.tasks[0].payload() else {
            panic!("expected a compile task");
        };
        assert_eq!(compile.sources().len(), 2);
    }

    #[test]
    fn directories_without_sources_are_silent() {
        let (_tmp, dir) = fixture();
        let result = KotlinDiscoverer
            .discover(&dir, &[], &BuildContext::new())
            .unwrap();
        assert!(result.tasks.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn subdirectory_compiles_become_dependencies() {
        let (_tmp, dir) = fixture();
        std::fs::write(dir.join("Main.kt"), "fun main() {}").unwrap();

        let nested = Task::new(TaskPayload::KotlinCompile(KotlinCompile::new(
            dir.join("nested"),
            vec![Utf8PathBuf::from("Nested.kt")],
        )));

        let result = KotlinDiscoverer
            .discover(&dir, std::slice::from_ref(&nested), &BuildContext::new())
            .unwrap();
        assert!(result.tasks[0].has_dependency(&nested));
    }

    #[test]
    fn junit_probe_matches_annotated_files_only() {
        let (_tmp, dir) = fixture();
        std::fs::write(
            dir.join("MainTest.kt"),
            "import org.junit.jupiter.api.Test\nclass MainTest { @Test fun x() {} }",
        )
        .unwrap();
        std::fs::write(dir.join("Main.kt"), "fun main() {}").unwrap();

        let result = JunitDiscoverer
            .discover(&dir, &[], &BuildContext::new())
            .unwrap();
        assert_eq!(result.tasks.len(), 1);

        let TaskPayload::Junit(test) = result.tasks[0].payload() else {
            panic!("expected a junit task");
        };
        assert_eq!(test.class_name(), "MainTest");
        assert_eq!(test.test_file(), "MainTest.kt");
    }
}
