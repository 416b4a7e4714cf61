use std::thread;

use crate::{
    backup::BackupEngine,
    error::{ArchiveError, ObjectError},
    fs::{Access, Disposition, FileSystem},
    meta::FileInfo,
    path::ArchivePath,
    pipe::{pipe, PipeReader, PipeWriter},
    restore::RestoreEngine,
    session::Session,
};

/// Records in flight between the two ends of a copy.
const PIPE_DEPTH: usize = 4;

/// Copies the content of `source` to `target`, replacing it.
///
/// A worker thread writes the stream records of `source` into an in-memory
/// pipe while the calling thread restores them into `target`. Both ends run
/// on templates of `session`, so they share its policy and cancellation
/// token but nothing else.
///
/// Returns `Ok(false)` when either end failed; the failure has been logged.
pub fn copy_object<F: FileSystem>(
    session: &Session,
    fs: &F,
    source: &ArchivePath,
    target: &ArchivePath,
) -> Result<bool, ArchiveError> {
    session.check_cancelled()?;

    let info = match fs.probe(source) {
        Ok(Some(info)) => info,
        Ok(None) => {
            tracing::warn!(%source, "Copy source does not exist");
            return Ok(false);
        }
        Err(e) => {
            ObjectError::Metadata { path: source.clone(), source: e }.log();
            return Ok(false);
        }
    };

    let (writer, reader) = pipe(PIPE_DEPTH);
    let producer_session = session.template();
    let consumer_session = session.template();

    thread::scope(|scope| {
        let producer = scope.spawn(move || produce(producer_session, fs, source, writer));
        let consumed = consume(consumer_session, fs, target, &info, reader);

        let produced = match producer.join() {
            Ok(produced) => produced,
            Err(panic) => std::panic::resume_unwind(panic),
        };
        combine(produced, consumed)
    })
}

fn produce<F: FileSystem>(session: Session, fs: &F, path: &ArchivePath, sink: PipeWriter) -> Result<bool, ArchiveError> {
    let object = match fs.open(path, Access::READ, false) {
        Ok(object) => object,
        Err(source) => {
            ObjectError::Open { path: path.clone(), source }.log();
            return Ok(false);
        }
    };

    let mut engine = BackupEngine::new(session, fs, sink);
    let written = engine.write_object_streams(path, &object)?;
    engine.finish()?;
    Ok(written)
}

/// Dropping `source` on any early return unblocks the producer.
fn consume<F: FileSystem>(
    session: Session,
    fs: &F,
    path: &ArchivePath,
    info: &FileInfo,
    source: PipeReader,
) -> Result<bool, ArchiveError> {
    let mut object = match fs.create_file(path, Access::FULL, Disposition::Overwrite) {
        Ok(object) => object,
        Err(e) => {
            ObjectError::Create { path: path.clone(), source: e }.log();
            return Ok(false);
        }
    };

    let mut engine = RestoreEngine::new(session, fs, source);
    engine.restore_into(path, &mut object, info)
}

fn combine(
    produced: Result<bool, ArchiveError>,
    consumed: Result<bool, ArchiveError>,
) -> Result<bool, ArchiveError> {
    match (produced, consumed) {
        (Err(ArchiveError::Cancelled), _) | (_, Err(ArchiveError::Cancelled)) => Err(ArchiveError::Cancelled),
        (Ok(produced), Ok(consumed)) => Ok(produced && consumed),
        (produced, consumed) => {
            for e in [produced.err(), consumed.err()].into_iter().flatten() {
                tracing::warn!("Copy failed: {}", e);
            }
            Ok(false)
        }
    }
}
