use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::core::Cancellation;
use crate::error::ProcessError;
use crate::kotlin::classpath_entries;
use crate::process;
use crate::task::{DependencyInput, TaskResult, write_input_mtime};

/// Runs the JUnit ConsoleLauncher against a single test class.
pub struct JunitTest {
    /// Test source path relative to `source_dir`.
    test_file: Utf8PathBuf,
    source_dir: Utf8PathBuf,
    /// Derived from the file basename; Kotlin convention keeps them equal.
    class_name: String,
}

impl JunitTest {
    pub fn new(
        test_file: impl Into<Utf8PathBuf>,
        source_dir: impl Into<Utf8PathBuf>,
        class_name: impl Into<String>,
    ) -> Self {
        Self {
            test_file: test_file.into(),
            source_dir: source_dir.into(),
            class_name: class_name.into(),
        }
    }

    pub fn test_file(&self) -> &Utf8Path {
        &self.test_file
    }

    pub fn source_dir(&self) -> &Utf8Path {
        &self.source_dir
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub(crate) fn write_own(&self, hasher: &mut Sha256) {
        hasher.update(b"junit-test\0");
        hasher.update(self.test_file.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.source_dir.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.class_name.as_bytes());
        write_input_mtime(hasher, &self.source_dir.join(&self.test_file));
    }

    pub(crate) fn execute(
        &self,
        work_dir: &Utf8Path,
        inputs: &[DependencyInput],
        cancel: &Cancellation,
    ) -> TaskResult {
        self.run_tests(work_dir, inputs, cancel).into()
    }

    fn run_tests(
        &self,
        work_dir: &Utf8Path,
        inputs: &[DependencyInput],
        cancel: &Cancellation,
    ) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let results_dir = work_dir.join("test-results");
        std::fs::create_dir_all(&results_dir)
            .with_context(|| format!("couldn't create {results_dir}"))?;

        let classpath = classpath_entries(inputs)
            .iter()
            .map(|entry| entry.as_str())
            .collect::<Vec<_>>()
            .join(":");

        let args = [
            "-cp",
            classpath.as_str(),
            "org.junit.platform.console.ConsoleLauncher",
            "--select-class",
            self.class_name.as_str(),
            "--reports-dir",
            results_dir.as_str(),
        ];

        if let Err(err) = process::run(cancel, "java", args, work_dir) {
            // The launcher's exit code only says "something failed"; the
            // digestible part of its output is the Failures section.
            let summary = match &err {
                ProcessError::Failed { output, .. } => Some(extract_failure(output)),
                _ => None,
            };
            return match summary {
                Some(summary) => Err(err).context(summary),
                None => Err(err.into()),
            };
        }

        let mut result_files = Vec::new();
        for entry in WalkDir::new(&results_dir).sort_by_file_name() {
            let entry = entry.context("couldn't enumerate test result files")?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = Utf8Path::from_path(entry.path())
                .context("test result path is not valid UTF-8")?;
            let rel = path.strip_prefix(work_dir).unwrap_or(path);
            result_files.push(rel.to_owned());
        }

        Ok(result_files)
    }
}

/// Lines the extraction drops wholesale: banner, summary counts, and the
/// launcher's promotional text.
const NOISE_MARKERS: [&str; 17] = [
    "Thanks for using JUnit",
    "sponsoring",
    "Test run finished",
    "containers found",
    "containers skipped",
    "containers started",
    "containers aborted",
    "containers successful",
    "containers failed",
    "tests found",
    "tests skipped",
    "tests started",
    "tests aborted",
    "tests successful",
    "tests failed",
    "WARNING: Delegated",
    "Please use the 'execute' command",
];

const TREE_MARKERS: [&str; 4] = ["\u{2577}", "\u{251c}\u{2500}", "\u{2502}", "\u{2514}\u{2500}"];

/// Extract a compact failure report from ConsoleLauncher output.
///
/// Capture starts at the `Failures (` line and keeps the stack-trace block
/// with its indentation; when nothing recognisable is found a one-line
/// generic message is returned instead.
pub(crate) fn extract_failure(output: &str) -> String {
    let mut captured: Vec<String> = Vec::new();
    let mut in_failures = false;
    let mut in_trace = false;

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || NOISE_MARKERS.iter().any(|marker| line.contains(marker))
            || TREE_MARKERS.iter().any(|marker| line.starts_with(marker))
            || line.contains("This behaviour has been deprecated")
        {
            continue;
        }

        if line.starts_with("Failures (") {
            in_failures = true;
            continue;
        }

        if in_failures
            && (line.contains("JUnit Jupiter:")
                || line.contains("MethodSource")
                || line.contains("=>"))
        {
            in_trace = true;
            captured.push(line.to_owned());
            continue;
        }

        if in_trace {
            if trimmed.starts_with("=>") || trimmed.starts_with("MethodSource") {
                captured.push(format!("    {trimmed}"));
            } else if trimmed.contains(".java:") || trimmed.contains(".kt:") {
                captured.push(format!("       {trimmed}"));
            } else {
                captured.push(format!("    {trimmed}"));
            }
        }
    }

    if captured.is_empty() {
        return String::from("test failed (no failure details recognised in console output)");
    }

    captured.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Thanks for using JUnit! Support its development at https://junit.org/sponsoring

\u{2577}
\u{251c}\u{2500} JUnit Jupiter \u{2714}
\u{2502}  \u{2514}\u{2500} MainTest \u{2718}
\u{2514}\u{2500} JUnit Vintage \u{2714}

Failures (1):
  JUnit Jupiter:MainTest:addition()
    MethodSource [className = 'MainTest', methodName = 'addition']
    => org.opentest4j.AssertionFailedError: expected: <4> but was: <5>
       MainTest.addition(MainTest.kt:12)

Test run finished after 120 ms
[         2 containers found      ]
[         1 tests successful      ]
[         1 tests failed          ]
";

    #[test]
    fn keeps_the_failure_block() {
        let summary = extract_failure(SAMPLE);
        assert!(summary.contains("AssertionFailedError"));
        assert!(summary.contains("MainTest.kt:12"));
        assert!(summary.contains("MethodSource"));
    }

    #[test]
    fn drops_banner_and_summary_lines() {
        let summary = extract_failure(SAMPLE);
        assert!(!summary.contains("Thanks for using JUnit"));
        assert!(!summary.contains("tests successful"));
        assert!(!summary.contains("\u{251c}\u{2500}"));
    }

    #[test]
    fn unrecognised_output_falls_back_to_a_generic_line() {
        let summary = extract_failure("some unrelated crash\n");
        assert_eq!(summary.lines().count(), 1);
        assert!(summary.contains("test failed"));
    }
}
