//! External filter processes sitting between the engines and the archive.
//!
//! A producer filter reads the archive we write on its stdin and writes the
//! filtered bytes to the archive destination. A consumer filter reads the
//! archive source on its stdin and hands us the decoded bytes on its stdout.

use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::error::{Error, Result};

pub struct FilterProcess {
    command: String,
    child: Child,
}

impl FilterProcess {
    /// Spawns `command` writing to `output`; the archive goes to the returned stdin.
    pub fn producer(command: &str, output: Stdio) -> Result<(FilterProcess, ChildStdin)> {
        let mut process = spawn(command, Stdio::piped(), output)?;
        let stdin = process.child.stdin.take().ok_or_else(|| Error::SpawnFilter {
            command: command.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "no stdin"),
        })?;
        Ok((process, stdin))
    }

    /// Spawns `command` reading from `input`; the archive comes from the returned stdout.
    pub fn consumer(command: &str, input: Stdio) -> Result<(FilterProcess, ChildStdout)> {
        let mut process = spawn(command, input, Stdio::piped())?;
        let stdout = process.child.stdout.take().ok_or_else(|| Error::SpawnFilter {
            command: command.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "no stdout"),
        })?;
        Ok((process, stdout))
    }

    /// Waits for the filter. Our end of its pipe must already be closed.
    pub fn wait(mut self) -> Result<()> {
        let status = self.child.wait().map_err(|source| Error::SpawnFilter {
            command: self.command.clone(),
            source,
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::FilterFailed {
                command: self.command,
                status,
            })
        }
    }
}

/// Waits for `filter` once the archive side has produced `result`.
///
/// Our end of the pipe must already be closed. An archive error wins over a
/// filter failure.
pub fn settle<T>(filter: Option<FilterProcess>, result: anyhow::Result<T>) -> anyhow::Result<T> {
    let waited = match filter {
        Some(filter) => filter.wait(),
        None => Ok(()),
    };

    match (result, waited) {
        (Ok(value), waited) => {
            waited?;
            Ok(value)
        }
        (Err(e), Err(filter_error)) => {
            tracing::debug!("Filter failed after the archive did: {}", filter_error);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
    }
}

fn spawn(command: &str, stdin: Stdio, stdout: Stdio) -> Result<FilterProcess> {
    let words = shell_words::split(command).map_err(|source| Error::ParseFilter {
        command: command.to_string(),
        source,
    })?;
    let (program, args) = words.split_first().ok_or(Error::EmptyFilter)?;

    tracing::debug!(%command, "Spawning filter");
    let child = Command::new(program)
        .args(args)
        .stdin(stdin)
        .stdout(stdout)
        .spawn()
        .map_err(|source| Error::SpawnFilter {
            command: command.to_string(),
            source,
        })?;

    Ok(FilterProcess {
        command: command.to_string(),
        child,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn consumer_output_is_readable() {
        let (process, mut stdout) = FilterProcess::consumer("echo 'hello world'", Stdio::null()).unwrap();
        let mut out = String::new();
        stdout.read_to_string(&mut out).unwrap();
        drop(stdout);
        process.wait().unwrap();
        assert_eq!(out, "hello world\n");
    }

    #[test]
    fn producer_passes_bytes_through() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        let file = std::fs::File::create(&target).unwrap();

        let (process, mut stdin) = FilterProcess::producer("cat", Stdio::from(file)).unwrap();
        stdin.write_all(b"archive bytes").unwrap();
        drop(stdin);
        process.wait().unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"archive bytes");
    }

    #[test]
    fn failing_filters_are_reported() {
        let (process, stdout) = FilterProcess::consumer("false", Stdio::null()).unwrap();
        drop(stdout);
        assert!(matches!(process.wait(), Err(Error::FilterFailed { .. })));
    }

    #[test]
    fn settling_after_an_error_reaps_the_filter() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        let file = std::fs::File::create(&target).unwrap();

        let (process, mut stdin) = FilterProcess::producer("cat", Stdio::from(file)).unwrap();
        stdin.write_all(b"partial").unwrap();
        drop(stdin);

        let result: anyhow::Result<()> = Err(Error::EmptyFilter.into());
        let error = settle(Some(process), result).unwrap_err();
        assert!(matches!(error.downcast_ref::<Error>(), Some(Error::EmptyFilter)));
        assert_eq!(std::fs::read(&target).unwrap(), b"partial");
    }

    #[test]
    fn settling_reports_a_failed_filter() {
        let (process, stdout) = FilterProcess::consumer("false", Stdio::null()).unwrap();
        drop(stdout);
        let error = settle(Some(process), Ok(())).unwrap_err();
        assert!(matches!(error.downcast_ref::<Error>(), Some(Error::FilterFailed { .. })));
    }

    #[test]
    fn empty_commands_are_refused() {
        assert!(matches!(
            FilterProcess::consumer("  ", Stdio::null()),
            Err(Error::EmptyFilter)
        ));
    }
}
