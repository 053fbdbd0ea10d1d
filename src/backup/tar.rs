use crate::backup::archive::ArchiveEntry;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};

/// Suffix of the staging file a tar is written to before it is renamed
pub static TMP_FILE_EXT: &str = "tmp";

/// `<dst>.tmp`, next to `dst`
pub fn staging_path<P: AsRef<Path>>(dst: P) -> PathBuf {
    let mut name = OsString::from(dst.as_ref().as_os_str());
    name.push(".");
    name.push(TMP_FILE_EXT);
    PathBuf::from(name)
}

/// Creates a TAR archive at `dst` from entries
///
/// The archive is written to a staging file first and renamed into place once
/// complete, so `dst` either holds a finished archive or does not exist.
/// Returns the number of entries written.
pub fn write_tar_archive<P, I>(dst: P, entries: I) -> Result<usize>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = Result<ArchiveEntry>>,
{
    let dst = dst.as_ref();
    let tmp = staging_path(dst);

    let written = write_entries(&tmp, entries).and_then(|count| {
        std::fs::rename(&tmp, dst)?;
        Ok(count)
    });

    written.map_err(|mut e| {
        if tmp.exists() {
            if let Err(e2) = std::fs::remove_file(&tmp) {
                e = e.chain(e2.into())
            }
        }
        e.with_msg(format!("Writing tar archive {:?} failed", dst))
    })
}

fn write_entries<I>(tmp: &Path, entries: I) -> Result<usize>
where
    I: IntoIterator<Item = Result<ArchiveEntry>>,
{
    let mut writer = tar::Builder::new(BufWriter::new(File::create(tmp)?));
    writer.follow_symlinks(true);

    let mut entry_count = 0;
    for entry in entries {
        let entry = entry?;
        writer.append_path_with_name(entry.src.as_ref(), entry.dst.as_ref())?;
        entry_count += 1;
    }
    tracing::debug!("Wrote {} archive entries to {:?}", entry_count, tmp);

    writer
        .into_inner()?
        .into_inner()
        .map_err(IntoInnerError::into_error)?
        .sync_all()?;

    Ok(entry_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::result_error::error::Error;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_staging_path() {
        assert_eq!(
            staging_path("/backups/2016_01_02.tar"),
            PathBuf::from("/backups/2016_01_02.tar.tmp")
        );
    }

    #[test]
    fn test_write_tar_archive() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("hello.txt");
        std::fs::write(&src, "Hello, World!").unwrap();
        let dst = temp_dir.path().join("out.tar");

        let count = write_tar_archive(
            &dst,
            vec![Ok(ArchiveEntry::new(src.clone(), PathBuf::from("dir/hello.txt")))],
        )
        .unwrap();

        assert_eq!(count, 1);
        assert!(!staging_path(&dst).exists());

        let mut archive = tar::Archive::new(File::open(&dst).unwrap());
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().as_ref(), Path::new("dir/hello.txt"));
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, "Hello, World!");
        assert!(entries.next().is_none());
    }

    #[test]
    fn test_empty_archive_is_valid() {
        let temp_dir = TempDir::new().unwrap();
        let dst = temp_dir.path().join("empty.tar");

        assert_eq!(write_tar_archive(&dst, Vec::new()).unwrap(), 0);

        let mut archive = tar::Archive::new(File::open(&dst).unwrap());
        assert_eq!(archive.entries().unwrap().count(), 0);
    }

    #[test]
    fn test_failed_entry_leaves_nothing_behind() {
        let temp_dir = TempDir::new().unwrap();
        let dst = temp_dir.path().join("broken.tar");

        let res = write_tar_archive(
            &dst,
            vec![Err(Error::configuration("walk failed"))],
        );

        assert!(res.is_err());
        assert!(!dst.exists());
        assert!(!staging_path(&dst).exists());
    }
}
