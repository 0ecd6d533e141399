//! The external-process boundary.
//!
//! Every tool invocation (`kotlinc`, `jar`, `java`) goes through [`run`]:
//! a cancellable child process with stdout and stderr merged into a single
//! buffer so error messages carry the complete tool output. The working
//! directory is always set explicitly by the caller.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::Duration;

use camino::Utf8Path;

use crate::core::Cancellation;
use crate::error::ProcessError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Run `program` with `args` in `cwd`, returning the merged output.
///
/// The child is polled rather than waited on so the cancellation signal can
/// interrupt it; a cancelled child receives an OS-level kill.
pub fn run<I, S>(
    cancel: &Cancellation,
    program: &str,
    args: I,
    cwd: &Utf8Path,
) -> Result<String, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.to_owned(),
            source,
        })?;

    // Drain both pipes on their own threads; a full pipe buffer would
    // otherwise deadlock the child.
    let stdout = child.stdout.take().expect("stdout is piped");
    let stderr = child.stderr.take().expect("stderr is piped");
    let out_reader = std::thread::spawn(move || read_all(stdout));
    let err_reader = std::thread::spawn(move || read_all(stderr));

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }

        if cancel.is_cancelled() {
            child.kill().ok();
            child.wait().ok();
            out_reader.join().ok();
            err_reader.join().ok();
            return Err(ProcessError::Cancelled {
                program: program.to_owned(),
            });
        }

        std::thread::sleep(POLL_INTERVAL);
    };

    let mut output = out_reader.join().unwrap_or_default();
    let stderr_output = err_reader.join().unwrap_or_default();
    if !stderr_output.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&stderr_output);
    }

    if status.success() {
        Ok(output)
    } else {
        Err(ProcessError::Failed {
            program: program.to_owned(),
            status,
            output,
        })
    }
}

fn read_all(mut pipe: impl Read) -> String {
    let mut buffer = Vec::new();
    pipe.read_to_end(&mut buffer).ok();
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cwd() -> &'static Utf8Path {
        Utf8Path::new("/tmp")
    }

    #[test]
    fn captures_merged_output() {
        let output = run(&Cancellation::new(), "sh", ["-c", "echo out; echo err >&2"], cwd())
            .unwrap();
        assert!(output.contains("out"));
        assert!(output.contains("err"));
    }

    #[test]
    fn nonzero_exit_is_an_error_with_output() {
        let err = run(&Cancellation::new(), "sh", ["-c", "echo boom; exit 3"], cwd())
            .unwrap_err();
        match err {
            ProcessError::Failed { output, .. } => assert!(output.contains("boom")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_binary_fails_to_spawn() {
        let err = run(
            &Cancellation::new(),
            "fbs-definitely-not-a-binary",
            ["--help"],
            cwd(),
        )
        .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn cancellation_kills_the_child() {
        let cancel = Cancellation::new();
        cancel.cancel();
        let err = run(&cancel, "sleep", ["5"], cwd()).unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled { .. }));
    }
}
