use std::io::BufReader;

use strarc_format::{ArchivePath, FileInfo, LocalFs, RestoreEngine};

use crate::cli::ExtractArgs;
use crate::error::Error;
use crate::filter;
use crate::options::overwrite_policy;

pub fn run(args: ExtractArgs, verbose: bool) -> anyhow::Result<()> {
    let root = args.common.root();
    std::fs::create_dir_all(&root).map_err(|source| Error::Directory {
        path: root.clone(),
        source,
    })?;

    let mut policy = args.common.policy();
    if let Some(flags) = &args.overwrite {
        policy.overwrite = overwrite_policy(flags.as_deref())?;
    }
    policy.restore_short_names = args.short_names;
    let session = super::session(policy, &args.common)?;

    let (source, filter) = super::open_source(&args.common)?;
    let fs = LocalFs::new(&root);
    let mut engine = RestoreEngine::new(session, &fs, BufReader::new(source)).with_progress(Box::new(
        move |path: &ArchivePath, _: &FileInfo| {
            if verbose {
                eprintln!("{}", path);
            }
        },
    ));

    let result = engine.restore_all();
    let stats = *engine.stats();
    drop(engine);
    let result = result.map_err(|e| anyhow::Error::from(Error::from_archive(e, stats.objects)));
    filter::settle(filter, result)?;

    if verbose {
        eprintln!(
            "{} objects ({} linked, {} copied), {} written, {} skipped",
            stats.objects,
            stats.links,
            stats.copies,
            super::human(stats.bytes),
            stats.skipped
        );
    }
    if stats.errors > 0 {
        eprintln!("{} objects could not be restored", stats.errors);
    }
    Ok(())
}
