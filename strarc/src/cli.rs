use std::path::{Path, PathBuf};

use strarc_format::{BackupMethod, Filter, Policy};
use structopt::clap::AppSettings::*;
use structopt::StructOpt;

use crate::options::{parse_buffer_size, split_list, Skip};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "strarc",
    about = "Back up and restore file trees as a stream.",
    settings = &[SubcommandRequiredElseHelp, DisableHelpSubcommand, VersionlessSubcommands],
    usage = "strarc (c|x|t) [FLAGS|OPTIONS] [archive] [paths]..."
)]
pub struct CliOpts {
    #[structopt(short, long, help = "Show verbose output", global = true)]
    pub verbose: bool,

    #[structopt(subcommand)]
    pub cmd: Commands,
}

#[derive(Debug, StructOpt)]
pub enum Commands {
    #[structopt(name = "c", visible_alias = "create", about = "Write a backup archive")]
    Create(CreateArgs),

    #[structopt(name = "x", visible_alias = "extract", about = "Restore from an archive")]
    Extract(ExtractArgs),

    #[structopt(name = "t", visible_alias = "test", about = "Read an archive and list its contents")]
    Test(TestArgs),
}

/// Options shared by every command.
#[derive(Debug, StructOpt)]
pub struct ArchiveOpts {
    #[structopt(
        short,
        long,
        parse(from_os_str),
        help = "Directory to back up from or restore into [default: current directory]"
    )]
    pub directory: Option<PathBuf>,

    #[structopt(
        short,
        long,
        use_delimiter = true,
        help = "Only process paths containing one of these strings"
    )]
    pub include: Vec<String>,

    #[structopt(
        short,
        long,
        use_delimiter = true,
        help = "Skip paths containing any of these strings"
    )]
    pub exclude: Vec<String>,

    #[structopt(
        short,
        long,
        parse(try_from_str = parse_buffer_size),
        default_value = "128K",
        help = "Record buffer size, at least 64K"
    )]
    pub buffer_size: usize,

    #[structopt(
        short,
        long,
        help = "Skip processing of: a(ttributes), c(ompression), l(inks), s(ecurity), t(imes), short (n)ames"
    )]
    pub skip: Option<Skip>,

    #[structopt(short = "z", long, help = "Pipe the archive through this command")]
    pub filter: Option<String>,

    #[structopt(
        name = "archive",
        parse(from_os_str),
        help = "Archive file; `-` or nothing for stdin/stdout"
    )]
    pub archive: Option<PathBuf>,
}

impl ArchiveOpts {
    pub fn policy(&self) -> Policy {
        let mut policy = Policy {
            filter: Filter::new(split_list(&self.include), split_list(&self.exclude)),
            ..Policy::default()
        };
        if let Some(skip) = self.skip {
            skip.apply(&mut policy);
        }
        policy
    }

    /// The archive file, unless standard streams are used.
    pub fn archive_path(&self) -> Option<&Path> {
        self.archive
            .as_deref()
            .filter(|path| *path != Path::new("-"))
    }

    pub fn root(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

#[derive(Debug, StructOpt)]
pub struct CreateArgs {
    #[structopt(flatten)]
    pub common: ArchiveOpts,

    #[structopt(
        short,
        long,
        default_value = "copy",
        help = "Backup method: (c)opy, (f)ull, (d)ifferential or (i)ncremental"
    )]
    pub method: BackupMethod,

    #[structopt(short, long, help = "List selected objects without writing an archive")]
    pub list: bool,

    #[structopt(short, long, help = "Append to the archive instead of replacing it")]
    pub append: bool,

    #[structopt(short = "f", long = "from-stdin", help = "Read paths to back up from stdin")]
    pub from_stdin: bool,

    #[structopt(short = "j", long, help = "Do not follow symbolic links")]
    pub local: bool,

    #[structopt(
        name = "paths",
        parse(from_os_str),
        help = "Paths to back up, relative to the directory [default: everything]"
    )]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, StructOpt)]
pub struct ExtractArgs {
    #[structopt(flatten)]
    pub common: ArchiveOpts,

    #[structopt(
        short,
        long,
        require_equals = true,
        help = "Replace existing files; -o=a keeps changed ones, -o=n keeps newer ones, -o=f only freshens"
    )]
    pub overwrite: Option<Option<String>>,

    #[structopt(short = "8", long = "short-names", help = "Restore files under their short names")]
    pub short_names: bool,
}

#[derive(Debug, StructOpt)]
pub struct TestArgs {
    #[structopt(flatten)]
    pub common: ArchiveOpts,
}
