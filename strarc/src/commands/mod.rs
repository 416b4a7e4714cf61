pub mod create;
pub mod extract;
pub mod test;

pub use create::run as create;
pub use extract::run as extract;
pub use test::run as test;

use std::fs::File;
use std::io::{self, Read};
use std::process::Stdio;

use humansize::{file_size_opts, FileSize};
use signal_hook::consts::{SIGINT, SIGTERM};
use strarc_format::{CancelToken, Policy, Session};

use crate::cli::ArchiveOpts;
use crate::error::{Error, Result};
use crate::filter::FilterProcess;

/// Sets `token` when the process is interrupted or terminated.
pub(crate) fn cancel_on_signals(token: &CancelToken) -> Result<()> {
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, token.flag()).map_err(Error::Signal)?;
    }
    Ok(())
}

pub(crate) fn session(policy: Policy, opts: &ArchiveOpts) -> anyhow::Result<Session> {
    let session = Session::new(policy, opts.buffer_size)?;
    cancel_on_signals(session.cancel_token())?;
    Ok(session)
}

/// The archive bytes to read, decoded by the filter when one is set.
pub(crate) fn open_source(opts: &ArchiveOpts) -> Result<(Box<dyn Read>, Option<FilterProcess>)> {
    let file = match opts.archive_path() {
        Some(path) => Some(File::open(path).map_err(|source| Error::OpenArchive {
            path: path.to_path_buf(),
            source,
        })?),
        None => None,
    };

    match &opts.filter {
        Some(command) => {
            let input = file.map(Stdio::from).unwrap_or_else(Stdio::inherit);
            let (process, stdout) = FilterProcess::consumer(command, input)?;
            Ok((Box::new(stdout), Some(process)))
        }
        None => match file {
            Some(file) => Ok((Box::new(file), None)),
            None => Ok((Box::new(io::stdin()), None)),
        },
    }
}

pub(crate) fn human(bytes: u64) -> String {
    bytes
        .file_size(file_size_opts::BINARY)
        .unwrap_or_else(|_| format!("{} B", bytes))
}
