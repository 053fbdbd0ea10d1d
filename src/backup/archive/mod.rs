pub mod directory;

use crate::backup::result_error::result::Result;
use dyn_iter::DynIter;
use std::path::Path;
use std::sync::Arc;

/// A single file to be written into a tar archive
#[derive(Debug)]
pub struct ArchiveEntry {
    /// Source file on the filesystem
    pub src: Arc<Path>,

    /// Member name inside the archive, relative
    pub dst: Arc<Path>,
}

impl ArchiveEntry {
    pub fn new<A: Into<Arc<Path>>, B: Into<Arc<Path>>>(src: A, dst: B) -> ArchiveEntry {
        Self {
            src: src.into(),
            dst: dst.into(),
        }
    }
}

/// Sources that can enumerate the files they contribute to an archive.
///
/// The outer `Result` reports a source that cannot be read at all (missing
/// directory); the per-item `Result` reports failures found while walking.
pub trait ArchiveEntryIterable {
    fn archive_entry_iterator<'a>(&self) -> Result<DynIter<'a, Result<ArchiveEntry>>>;
}
