use std::io::BufReader;

use chrono::{DateTime, SecondsFormat, Utc};
use strarc_format::{ArchivePath, FileInfo, LocalFs, RestoreEngine};

use crate::cli::TestArgs;
use crate::error::Error;
use crate::filter;

pub fn run(args: TestArgs, verbose: bool) -> anyhow::Result<()> {
    let mut policy = args.common.policy();
    policy.test_only = true;
    let session = super::session(policy, &args.common)?;

    let (source, filter) = super::open_source(&args.common)?;
    let fs = LocalFs::new(args.common.root());
    let mut engine = RestoreEngine::new(session, &fs, BufReader::new(source))
        .with_progress(Box::new(|path: &ArchivePath, info: &FileInfo| println!("{}  {}", describe(info), path)));

    let result = engine.restore_all();
    let stats = *engine.stats();
    drop(engine);
    let result = result.map_err(|e| anyhow::Error::from(Error::from_archive(e, stats.objects)));
    filter::settle(filter, result)?;

    if verbose || stats.errors > 0 {
        eprintln!(
            "{} objects, {} of content, {} errors",
            stats.objects,
            super::human(stats.bytes),
            stats.errors
        );
    }
    Ok(())
}

/// Modification time and size of one listed object.
fn describe(info: &FileInfo) -> String {
    let modified: DateTime<Utc> = info.last_write_time.to_system_time().into();
    let modified = modified.to_rfc3339_opts(SecondsFormat::Secs, true);
    if info.is_directory() {
        format!("{}  {:>12}", modified, "<dir>")
    } else {
        format!("{}  {:>12}", modified, info.file_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strarc_format::{FileAttributes, Timestamp};

    #[test]
    fn listing_shows_time_and_size() {
        let file = FileInfo {
            last_write_time: Timestamp::from_unix(0, 0),
            file_size: 42,
            ..FileInfo::default()
        };
        assert_eq!(describe(&file), "1970-01-01T00:00:00Z            42");

        let dir = FileInfo {
            attributes: FileAttributes::DIRECTORY,
            ..file
        };
        assert!(describe(&dir).ends_with("<dir>"));
    }
}
