//! Kotlin-specific tasks and discoverers.

mod compile;
mod discover;
mod junit;

pub use compile::KotlinCompile;
pub use discover::{JunitDiscoverer, KotlinDiscoverer};
pub use junit::JunitTest;

use camino::Utf8PathBuf;

use crate::task::DependencyInput;

/// Assemble classpath entries from dependency outputs.
///
/// Two sources contribute: `classes/` directories published by upstream
/// compile tasks, and `.jar` files they emitted. Jar paths may be absolute
/// (artifact downloads publish into the shared Maven cache) or relative to
/// the dependency's output directory; both are handled, and entries missing
/// on disk are dropped.
pub(crate) fn classpath_entries(inputs: &[DependencyInput]) -> Vec<Utf8PathBuf> {
    let mut entries = Vec::new();

    for input in inputs {
        let classes = input.output_dir.join("classes");
        if classes.is_dir() {
            entries.push(classes);
        }

        for file in &input.files {
            if file.extension() != Some("jar") {
                continue;
            }
            let jar = if file.is_absolute() {
                file.clone()
            } else {
                input.output_dir.join(file)
            };
            if jar.is_file() {
                entries.push(jar);
            }
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;

    #[test]
    fn classpath_collects_classes_dirs_and_jars() {
        let tmp = tempfile::tempdir().unwrap();
        let out = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir_all(out.join("classes")).unwrap();
        std::fs::write(out.join("lib.jar"), b"jar").unwrap();

        let input = DependencyInput {
            id: crate::core::Hash32::digest(b"dep"),
            output_dir: out.to_owned(),
            files: vec![
                Utf8PathBuf::from("lib.jar"),
                Utf8PathBuf::from("classes/Main.class"),
                Utf8PathBuf::from("missing.jar"),
            ],
        };

        let entries = classpath_entries(&[input]);
        assert_eq!(entries, [out.join("classes"), out.join("lib.jar")]);
    }
}
