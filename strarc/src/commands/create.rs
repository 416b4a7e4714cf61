use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::process::Stdio;

use anyhow::Context;
use strarc_format::{ArchiveError, ArchivePath, BackupEngine, FileInfo, LocalFs};

use crate::cli::{ArchiveOpts, CreateArgs};
use crate::error::{Error, Result};
use crate::filter::{self, FilterProcess};

pub fn run(args: CreateArgs, verbose: bool) -> anyhow::Result<()> {
    let root = args.common.root();
    if !root.is_dir() {
        return Err(Error::Directory {
            path: root,
            source: io::Error::new(io::ErrorKind::NotFound, "not a directory"),
        }
        .into());
    }

    let paths = args
        .paths
        .iter()
        .map(|path| {
            ArchivePath::from_path(path).map_err(|source| Error::InvalidPath {
                path: path.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut policy = args.common.policy();
    policy.method = args.method;
    policy.local = args.local;
    policy.list_only = args.list;
    let session = super::session(policy, &args.common)?;

    let (sink, filter) = if args.list {
        (Box::new(io::sink()) as Box<dyn Write>, None)
    } else {
        open_sink(&args.common, args.append)?
    };

    let fs = LocalFs::new(&root);
    let list = args.list;
    let mut engine = BackupEngine::new(session, &fs, BufWriter::new(sink)).with_progress(Box::new(
        move |path: &ArchivePath, _: &FileInfo| {
            if list {
                println!("{}", path);
            } else if verbose {
                eprintln!("{}", path);
            }
        },
    ));

    let result = backup(&mut engine, &paths, args.from_stdin);
    let stats = *engine.stats();
    let written = result
        .and_then(|()| engine.finish())
        .map_err(|e| anyhow::Error::from(Error::from_archive(e, stats.objects)))
        .and_then(|mut sink| sink.flush().context("Cannot flush archive"));
    filter::settle(filter, written)?;

    if verbose {
        eprintln!(
            "{} objects ({} linked), {} read, {} skipped",
            stats.objects,
            stats.links,
            super::human(stats.bytes),
            stats.skipped
        );
    }
    if stats.errors > 0 {
        eprintln!("{} objects could not be backed up", stats.errors);
    }
    Ok(())
}

fn backup<W: Write>(
    engine: &mut BackupEngine<'_, LocalFs, W>,
    paths: &[ArchivePath],
    from_stdin: bool,
) -> std::result::Result<(), ArchiveError> {
    if from_stdin {
        engine.backup_list(io::stdin().lock())?;
    }

    if !paths.is_empty() {
        engine.backup_paths(paths)
    } else if !from_stdin {
        engine.backup_tree()
    } else {
        Ok(())
    }
}

/// Where archive bytes go, encoded by the filter when one is set.
fn open_sink(opts: &ArchiveOpts, append: bool) -> Result<(Box<dyn Write>, Option<FilterProcess>)> {
    let file = match opts.archive_path() {
        Some(path) => {
            let mut options = OpenOptions::new();
            options.write(true).create(true);
            if append {
                options.append(true);
            } else {
                options.truncate(true);
            }
            Some(options.open(path).map_err(|source| Error::OpenArchive {
                path: path.to_path_buf(),
                source,
            })?)
        }
        None => None,
    };

    match &opts.filter {
        Some(command) => {
            let output = file.map(Stdio::from).unwrap_or_else(Stdio::inherit);
            let (process, stdin) = FilterProcess::producer(command, output)?;
            Ok((Box::new(stdin), Some(process)))
        }
        None => match file {
            Some(file) => Ok((Box::new(file), None)),
            None => Ok((Box::new(io::stdout()), None)),
        },
    }
}
