//! CLI surface (§6): `autoimport`, `importpkg`, `update-sharing`.
//!
//! Generalised from the teacher's `cli.rs` subcommand-enum style
//! (`PVectorCommand`/`PVector`), swapping p-vector's archive-mirror phases
//! (`scan`/`release`/`maintenance`/`gc`) for this crate's three actions.

use argh::FromArgs;

#[derive(FromArgs, PartialEq, Debug)]
/// ingest packages from one or more sources (URL or directory)
#[argh(subcommand, name = "autoimport")]
pub struct Autoimport {
    /// skip packages whose version is not strictly newer than what is stored
    #[argh(switch)]
    pub new: bool,
    /// remove packages present in the store but absent from this run's input
    #[argh(switch)]
    pub prune: bool,
    /// package sources: HTTP mirror base URLs or local directories
    #[argh(positional)]
    pub sources: Vec<String>,
}

#[derive(FromArgs, PartialEq, Debug)]
/// read one .deb on stdin, write its serialised record stream to stdout
#[argh(subcommand, name = "importpkg")]
pub struct ImportPkg {}

#[derive(FromArgs, PartialEq, Debug)]
/// rebuild the sharing, duplicate, and issue tables from content/hash
#[argh(subcommand, name = "update-sharing")]
pub struct UpdateSharing {}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
pub enum DedupCommand {
    Autoimport(Autoimport),
    ImportPkg(ImportPkg),
    UpdateSharing(UpdateSharing),
}

#[derive(FromArgs, PartialEq, Debug)]
/// dedup-rs: content-duplication index for Debian binary packages
pub struct Dedup {
    /// specify the location of the config file (not required by `importpkg`,
    /// which never touches the store)
    #[argh(option, short = 'c')]
    pub config: Option<String>,
    #[argh(subcommand)]
    pub command: DedupCommand,
}
