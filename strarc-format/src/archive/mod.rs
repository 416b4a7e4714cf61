mod reader;
mod writer;

pub use self::reader::ArchiveReader;
pub use self::writer::ArchiveWriter;
