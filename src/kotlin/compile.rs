use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::core::Cancellation;
use crate::kotlin::classpath_entries;
use crate::process;
use crate::task::{DependencyInput, TaskResult, write_input_mtime};

/// Compiles the Kotlin sources of one directory with `kotlinc`.
pub struct KotlinCompile {
    source_dir: Utf8PathBuf,
    /// Relative source paths, in discovery order.
    sources: Vec<Utf8PathBuf>,
    /// Extra classpath entries beyond what dependencies provide.
    classpath: Vec<Utf8PathBuf>,
}

impl KotlinCompile {
    pub fn new(source_dir: impl Into<Utf8PathBuf>, sources: Vec<Utf8PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            sources,
            classpath: Vec::new(),
        }
    }

    pub fn with_classpath(mut self, classpath: Vec<Utf8PathBuf>) -> Self {
        self.classpath = classpath;
        self
    }

    pub fn source_dir(&self) -> &Utf8Path {
        &self.source_dir
    }

    pub fn sources(&self) -> &[Utf8PathBuf] {
        &self.sources
    }

    pub(crate) fn write_own(&self, hasher: &mut Sha256) {
        hasher.update(b"kotlin-compile\0");
        hasher.update(self.source_dir.as_str().as_bytes());
        hasher.update([0]);
        for source in &self.sources {
            hasher.update(source.as_str().as_bytes());
            write_input_mtime(hasher, &self.source_dir.join(source));
        }
        for entry in &self.classpath {
            hasher.update(entry.as_str().as_bytes());
            hasher.update([0]);
        }
    }

    pub(crate) fn execute(
        &self,
        work_dir: &Utf8Path,
        inputs: &[DependencyInput],
        cancel: &Cancellation,
    ) -> TaskResult {
        self.compile(work_dir, inputs, cancel).into()
    }

    fn compile(
        &self,
        work_dir: &Utf8Path,
        inputs: &[DependencyInput],
        cancel: &Cancellation,
    ) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let classes_dir = work_dir.join("classes");
        std::fs::create_dir_all(&classes_dir)
            .with_context(|| format!("couldn't create {classes_dir}"))?;

        let mut classpath = self.classpath.clone();
        classpath.extend(classpath_entries(inputs));

        let mut args: Vec<String> = vec!["-d".into(), classes_dir.to_string()];
        if !classpath.is_empty() {
            let joined = classpath
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(":");
            args.push("-classpath".into());
            args.push(joined);
        }
        for source in &self.sources {
            args.push(self.source_dir.join(source).into_string());
        }

        process::run(cancel, "kotlinc", &args, work_dir).context("kotlin compilation failed")?;

        let mut class_files = Vec::new();
        for entry in WalkDir::new(&classes_dir).sort_by_file_name() {
            let entry = entry.context("couldn't enumerate compiled classes")?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = Utf8Path::from_path(entry.path())
                .context("compiled class path is not valid UTF-8")?;
            if path.extension() == Some("class") {
                let rel = path.strip_prefix(work_dir).unwrap_or(path);
                class_files.push(rel.to_owned());
            }
        }

        Ok(class_files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_hash_covers_source_mtimes() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::write(dir.join("Main.kt"), "fun main() {}").unwrap();

        let hash = |task: &KotlinCompile| {
            let mut hasher = Sha256::new();
            task.write_own(&mut hasher);
            crate::core::Hash32::finalize(hasher)
        };

        let task = KotlinCompile::new(dir, vec![Utf8PathBuf::from("Main.kt")]);
        let before = hash(&task);
        assert_eq!(before, hash(&task));

        // A missing source hashes differently from a present one.
        let other = KotlinCompile::new(dir, vec![Utf8PathBuf::from("Other.kt")]);
        assert_ne!(before, hash(&other));
    }
}
