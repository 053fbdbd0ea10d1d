use crate::backup::archive::{ArchiveEntry, ArchiveEntryIterable};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::tar::write_tar_archive;

use bon::Builder;
use derive_more::{Display, From};
use dyn_iter::{DynIter, IntoDynIterator};
use getset::Getters;
use globset::{Glob, GlobBuilder, GlobMatcher};
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize};
use walkdir::{DirEntry, WalkDir};

use std::collections::BTreeMap;
use std::fmt::Formatter;
use std::path::{Path, PathBuf};
use std::result;

/// How a directory is written in the config file.
///
/// Either a bare path or a map with a path and an optional filter:
///
/// ```yaml
/// directories:
///   uploads: "@app/web/uploads"
///   logs: { path: /var/log/app, filter: "**/*.log" }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DirectoryConfig {
    Path(PathBuf),
    Filtered {
        path: PathBuf,
        #[serde(default)]
        filter: Option<CustomDeserializedGlob>,
    },
}

impl DirectoryConfig {
    pub fn path(&self) -> &Path {
        match self {
            Self::Path(path) => path,
            Self::Filtered { path, .. } => path,
        }
    }

    pub fn filter(&self) -> Option<&CustomDeserializedGlob> {
        match self {
            Self::Path(_) => None,
            Self::Filtered { filter, .. } => filter.as_ref(),
        }
    }
}

/// A directory to back up, with its path already resolved.
///
/// Walks `path` recursively and yields every regular file whose path relative
/// to `path` matches `filter` (everything when unset). Member names in the
/// archive are relative to `path`.
#[derive(Clone, Debug, Builder, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct DirectoryEntry {
    #[builder(into)]
    name: String,
    #[builder(into)]
    path: PathBuf,
    filter: Option<CustomDeserializedGlob>,
}

/// A glob pattern wrapper that handles custom deserialization
///
/// Literal separator mode is always on, so `*` never crosses a `/` and
/// `**/*.log` is needed to reach nested files.
#[derive(Clone, Debug, From, Display, Serialize, PartialEq, Eq, Getters)]
#[serde(transparent)]
#[getset(get = "pub")]
pub struct CustomDeserializedGlob {
    glob: Glob,
}

impl CustomDeserializedGlob {
    pub fn new<S: AsRef<str>>(pattern: S) -> Result<Self> {
        Ok(GlobBuilder::new(pattern.as_ref())
            .literal_separator(true)
            .build()?
            .into())
    }

    fn compile_matcher(&self) -> GlobMatcher {
        self.glob.compile_matcher()
    }
}

struct CustomGlobVisitor;

impl Visitor<'_> for CustomGlobVisitor {
    type Value = CustomDeserializedGlob;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a glob pattern")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        CustomDeserializedGlob::new(v).map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for CustomDeserializedGlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(CustomGlobVisitor)
    }
}

impl ArchiveEntryIterable for DirectoryEntry {
    fn archive_entry_iterator<'a>(&self) -> Result<DynIter<'a, Result<ArchiveEntry>>> {
        if !self.path.is_dir() {
            tracing::error!(
                "Source directory does not exist or is not a directory: {:?}",
                self.path
            );
            return Err(Error::from(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "source path is not a directory",
            )));
        }

        tracing::debug!(
            "Scanning directory {:?} with filter {:?}",
            self.path,
            self.filter.as_ref().map(ToString::to_string)
        );

        let matcher = self.filter.as_ref().map(CustomDeserializedGlob::compile_matcher);
        let base = self.path.clone();

        let entries = WalkDir::new(&self.path)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |res| match res {
                Ok(de) => process_dir_entry(de, &base, matcher.as_ref()),
                Err(e) => Some(Err(e.into())),
            });

        Ok(entries.into_dyn_iter())
    }
}

fn process_dir_entry<P: AsRef<Path>>(
    de: DirEntry,
    base_dir: P,
    matcher: Option<&GlobMatcher>,
) -> Option<Result<ArchiveEntry>> {
    if !de.file_type().is_file() {
        tracing::trace!("Skipping {:?} not a file", de.path());
        return None;
    }

    let p = de.into_path();
    let relative = match p.strip_prefix(base_dir.as_ref()) {
        Ok(relative) => relative.to_path_buf(),
        Err(e) => {
            return Some(Err(Error::from(e).with_msg(format!(
                "Stripping {:?} from {:?} failed",
                base_dir.as_ref(),
                p
            ))))
        }
    };

    if let Some(matcher) = matcher {
        if !matcher.is_match(&relative) {
            tracing::trace!("Skipping {:?}, filter not match", p);
            return None;
        }
    }

    tracing::trace!("Including file: {:?} -> {:?}", p, relative);
    Some(Ok(ArchiveEntry::new(p, relative)))
}

impl DirectoryEntry {
    /// Writes this directory into a tar file at `archive_path`.
    ///
    /// Any failure, including a missing source directory, is an
    /// [`Error::Archive`] naming this entry.
    pub fn archive_to<P: AsRef<Path>>(&self, archive_path: P) -> Result<usize> {
        self.archive_entry_iterator()
            .and_then(|entries| write_tar_archive(archive_path.as_ref(), entries))
            .map_err(|e| Error::Archive {
                name: self.name.clone(),
                path: self.path.clone(),
                error: Box::new(e),
            })
    }
}

/// Archives every directory into `<destination_dir>/<name>.tar`.
///
/// Stops at the first failure; the caller treats that as fatal for the run.
pub fn backup_files<P: AsRef<Path>>(
    destination_dir: P,
    directories: &BTreeMap<String, DirectoryEntry>,
) -> Result<Vec<PathBuf>> {
    let destination_dir = destination_dir.as_ref();
    directories
        .values()
        .map(|entry| {
            let archive_path = destination_dir.join(format!("{}.tar", entry.name));
            let count = entry.archive_to(&archive_path)?;
            tracing::info!(
                "Archived directory {:?} ({:?}): {} files into {:?}",
                entry.name,
                entry.path,
                count,
                archive_path
            );
            Ok(archive_path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use std::fs::File;
    use tempfile::TempDir;

    fn create_test_files(dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir.join("subdir/empty"))?;
        std::fs::write(dir.join("file1.txt"), "content1")?;
        std::fs::write(dir.join("file2.json"), "content2")?;
        std::fs::write(dir.join("subdir/file3.txt"), "content3")?;
        std::fs::write(dir.join("subdir/file4.log"), "content4")?;
        std::fs::write(dir.join("README.md"), "readme content")?;
        Ok(())
    }

    fn entry(dir: &Path, filter: Option<&str>) -> DirectoryEntry {
        DirectoryEntry::builder()
            .name("files")
            .path(dir)
            .maybe_filter(filter.map(|f| CustomDeserializedGlob::new(f).unwrap()))
            .build()
    }

    fn relative_paths(entry: &DirectoryEntry) -> Vec<String> {
        entry
            .archive_entry_iterator()
            .unwrap()
            .map(|e| e.unwrap().dst.to_string_lossy().into_owned())
            .sorted()
            .collect()
    }

    fn tar_members(path: &Path) -> Vec<String> {
        let mut archive = tar::Archive::new(File::open(path).unwrap());
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .sorted()
            .collect()
    }

    #[test]
    fn test_glob_deserialization() {
        let glob: CustomDeserializedGlob = serde_json::from_str("\"*.txt\"").unwrap();
        assert_eq!(glob.to_string(), "*.txt");
        assert!(serde_json::from_str::<CustomDeserializedGlob>("\"[invalid\"").is_err());
    }

    #[test]
    fn test_directory_config_shapes() {
        let yaml = "plain: /srv/a\nfiltered: { path: /srv/b, filter: \"**/*.log\" }\n";
        let parsed: BTreeMap<String, DirectoryConfig> = serde_yml::from_str(yaml).unwrap();

        assert_eq!(parsed["plain"], DirectoryConfig::Path(PathBuf::from("/srv/a")));
        assert_eq!(parsed["plain"].filter(), None);
        assert_eq!(parsed["filtered"].path(), Path::new("/srv/b"));
        assert_eq!(parsed["filtered"].filter().unwrap().to_string(), "**/*.log");
    }

    #[test]
    fn test_no_filter_includes_every_file() {
        let temp_dir = TempDir::new().unwrap();
        create_test_files(temp_dir.path()).unwrap();

        assert_eq!(
            relative_paths(&entry(temp_dir.path(), None)),
            vec![
                "README.md",
                "file1.txt",
                "file2.json",
                "subdir/file3.txt",
                "subdir/file4.log"
            ]
        );
    }

    #[test]
    fn test_filter_matches_relative_path() {
        let temp_dir = TempDir::new().unwrap();
        create_test_files(temp_dir.path()).unwrap();

        assert_eq!(
            relative_paths(&entry(temp_dir.path(), Some("**/*.txt"))),
            vec!["file1.txt", "subdir/file3.txt"]
        );
        assert_eq!(
            relative_paths(&entry(temp_dir.path(), Some("*.txt"))),
            vec!["file1.txt"]
        );
    }

    #[test]
    fn test_archive_round_trip_matches_filtered_set() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let out = temp_dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        create_test_files(&src).unwrap();

        let entry = entry(&src, Some("subdir/**"));
        let archive = out.join("files.tar");
        assert_eq!(entry.archive_to(&archive).unwrap(), 2);
        assert_eq!(
            tar_members(&archive),
            vec!["subdir/file3.txt", "subdir/file4.log"]
        );
    }

    #[test]
    fn test_no_match_gives_empty_archive() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        create_test_files(&src).unwrap();

        let archive = temp_dir.path().join("files.tar");
        assert_eq!(entry(&src, Some("**/*.png")).archive_to(&archive).unwrap(), 0);
        assert!(archive.is_file());
        assert!(tar_members(&archive).is_empty());
    }

    #[test]
    fn test_missing_directory_is_archive_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = entry(&temp_dir.path().join("missing"), None);

        match missing.archive_to(temp_dir.path().join("files.tar")) {
            Err(Error::Archive { name, .. }) => assert_eq!(name, "files"),
            other => panic!("Expected archive error, got {other:?}"),
        }
        assert!(!temp_dir.path().join("files.tar").exists());
    }

    #[test]
    fn test_backup_files_writes_one_archive_per_entry() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a");
        let b = temp_dir.path().join("b");
        let out = temp_dir.path().join("out");
        create_test_files(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::create_dir_all(&out).unwrap();

        let directories = BTreeMap::from([
            (
                "alpha".to_string(),
                DirectoryEntry::builder().name("alpha").path(&a).build(),
            ),
            (
                "beta".to_string(),
                DirectoryEntry::builder().name("beta").path(&b).build(),
            ),
        ]);

        let archives = backup_files(&out, &directories).unwrap();
        assert_eq!(archives, vec![out.join("alpha.tar"), out.join("beta.tar")]);
        assert_eq!(tar_members(&out.join("alpha.tar")).len(), 5);
        assert!(tar_members(&out.join("beta.tar")).is_empty());
    }

    #[test]
    fn test_backup_files_stops_on_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let directories = BTreeMap::from([(
            "gone".to_string(),
            DirectoryEntry::builder()
                .name("gone")
                .path(temp_dir.path().join("gone"))
                .build(),
        )]);

        assert!(backup_files(temp_dir.path(), &directories).is_err());
    }
}
