use anyhow::{Context, bail};
use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};

use crate::core::Cancellation;
use crate::process;
use crate::task::{DependencyInput, TaskResult};

/// Packages the `.class` files of a project's main sources into a jar.
///
/// The jar lands under the project's `build/libs` directory and is reported
/// as an absolute path, so downstream tasks can put it on a classpath
/// without caring where this task's published directory is.
pub struct JarPackage {
    project_dir: Utf8PathBuf,
    output_path: Utf8PathBuf,
    /// Main source files; participate in the hash only.
    main_sources: Vec<Utf8PathBuf>,
}

impl JarPackage {
    pub fn new(project_dir: impl Into<Utf8PathBuf>, main_sources: Vec<Utf8PathBuf>) -> Self {
        let project_dir = project_dir.into();
        let project_name = project_dir.file_name().unwrap_or("project");
        let output_path = project_dir
            .join("build")
            .join("libs")
            .join(format!("{project_name}.jar"));

        Self {
            project_dir,
            output_path,
            main_sources,
        }
    }

    pub fn project_dir(&self) -> &Utf8Path {
        &self.project_dir
    }

    pub fn output_path(&self) -> &Utf8Path {
        &self.output_path
    }

    pub(crate) fn write_own(&self, hasher: &mut Sha256) {
        hasher.update(b"jar-compile\0");
        hasher.update(self.project_dir.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.output_path.as_str().as_bytes());
        hasher.update([0]);
        for source in &self.main_sources {
            hasher.update(source.as_str().as_bytes());
            hasher.update([0]);
        }
    }

    pub(crate) fn execute(
        &self,
        _work_dir: &Utf8Path,
        inputs: &[DependencyInput],
        cancel: &Cancellation,
    ) -> TaskResult {
        self.package(inputs, cancel).into()
    }

    fn package(
        &self,
        inputs: &[DependencyInput],
        cancel: &Cancellation,
    ) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let mut class_files: Vec<Utf8PathBuf> = Vec::new();
        for input in inputs {
            for file in &input.files {
                if file.extension() == Some("class") {
                    class_files.push(input.output_dir.join(file));
                }
            }
        }

        if class_files.is_empty() {
            bail!("no compiled classes found to package");
        }

        let output_dir = self
            .output_path
            .parent()
            .unwrap_or(&self.project_dir);
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("couldn't create {output_dir}"))?;

        // Run `jar` from the classes root so archive entries come out
        // package-relative instead of carrying the cache path.
        let classes_root = classes_root(&class_files[0]);
        let mut args: Vec<String> = vec!["cf".into(), self.output_path.to_string()];
        for class_file in &class_files {
            let rel = class_file
                .strip_prefix(&classes_root)
                .map(Utf8Path::to_owned)
                .unwrap_or_else(|_| {
                    Utf8PathBuf::from(class_file.file_name().unwrap_or(class_file.as_str()))
                });
            args.push(rel.into_string());
        }

        process::run(cancel, "jar", &args, &classes_root).context("jar packaging failed")?;

        Ok(vec![self.output_path.clone()])
    }
}

/// The directory up to and including the first `/classes/` segment, which
/// is where package-relative paths start.
fn classes_root(class_file: &Utf8Path) -> Utf8PathBuf {
    let raw = class_file.as_str();
    match raw.find("/classes/") {
        Some(index) => Utf8PathBuf::from(&raw[..index + "/classes".len()]),
        None => class_file
            .parent()
            .map(Utf8Path::to_owned)
            .unwrap_or_else(|| Utf8PathBuf::from(".")),
    }
}
