//! Filesystem helpers for walking a census release, built on `cap-std` and
//! `camino`.
//!
//! Every helper resolves an ambient directory once and then works relative to
//! it, so paths handed to the loader are always valid UTF-8 and listings are
//! returned in a stable, sorted order.
#![forbid(unsafe_code)]

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use std::io;
use std::path::Component;

/// Open a UTF-8 file path using ambient authority.
pub fn open_utf8_file(path: &Utf8Path) -> io::Result<fs_utf8::File> {
    fs_utf8::File::open_ambient(path, ambient_authority())
}

/// Open a directory using ambient authority.
pub fn open_utf8_dir(path: &Utf8Path) -> io::Result<fs_utf8::Dir> {
    fs_utf8::Dir::open_ambient_dir(path, ambient_authority())
}

/// Resolve an ambient directory for the given path and return the directory with the file name.
pub fn open_dir_and_file(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, String)> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::other("target should include a file name"))?
        .to_owned();
    let dir = open_utf8_dir(parent)?;
    Ok((dir, file_name))
}

/// Return whether a path exists and is a regular file.
///
/// A missing path is reported as `false` rather than an error.
pub fn is_file(path: &Utf8Path) -> io::Result<bool> {
    let (dir, name) = match open_dir_and_file(path) {
        Ok(found) => found,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    match dir.metadata(name.as_str()) {
        Ok(meta) => Ok(meta.is_file()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Return whether a path exists and is a directory.
pub fn is_dir(path: &Utf8Path) -> io::Result<bool> {
    match open_utf8_dir(path) {
        Ok(_) => Ok(true),
        Err(err) if matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Create `path` and any missing parents.
pub fn ensure_dir(path: &Utf8Path) -> io::Result<()> {
    let (base_dir, relative) = base_dir_and_relative(path)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }
    base_dir.create_dir_all(&relative)
}

/// Ensure the parent directory for `path` exists, handling absolute paths safely for cap-std.
pub fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_str().is_empty() || parent == Utf8Path::new("/") {
        return Ok(());
    }
    ensure_dir(parent)
}

/// Regular files directly inside `dir` whose names end with `suffix`,
/// sorted by name.
///
/// The comparison ignores ASCII case so `.SHP` and `.shp` both match.
pub fn files_with_suffix(dir: &Utf8Path, suffix: &str) -> io::Result<Vec<Utf8PathBuf>> {
    let suffix = suffix.to_ascii_lowercase();
    let mut found = Vec::new();
    for (name, file_type) in list_entries(dir)? {
        if file_type.is_file() && name.to_ascii_lowercase().ends_with(&suffix) {
            found.push(dir.join(name));
        }
    }
    found.sort();
    Ok(found)
}

/// Regular files anywhere below `dir` whose names end with `suffix`, sorted
/// by path.
pub fn files_with_suffix_recursive(dir: &Utf8Path, suffix: &str) -> io::Result<Vec<Utf8PathBuf>> {
    let mut found = files_with_suffix(dir, suffix)?;
    for child in subdirectories(dir)? {
        found.extend(files_with_suffix_recursive(&child, suffix)?);
    }
    found.sort();
    Ok(found)
}

/// Directories directly inside `dir`, sorted by name.
pub fn subdirectories(dir: &Utf8Path) -> io::Result<Vec<Utf8PathBuf>> {
    let mut found: Vec<Utf8PathBuf> = list_entries(dir)?
        .into_iter()
        .filter(|(_, file_type)| file_type.is_dir())
        .map(|(name, _)| dir.join(name))
        .collect();
    found.sort();
    Ok(found)
}

fn list_entries(dir: &Utf8Path) -> io::Result<Vec<(String, fs_utf8::FileType)>> {
    let handle = open_utf8_dir(dir)?;
    let mut entries = Vec::new();
    for entry in handle.entries()? {
        let entry = entry?;
        entries.push((entry.file_name()?, entry.file_type()?));
    }
    Ok(entries)
}

/// Split an absolute or relative path into an ambient base directory and a relative suffix.
pub fn base_dir_and_relative(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let std_path = path.as_std_path();

    let (base, relative) = match std_path.components().next() {
        // Windows absolute path with a drive or UNC prefix.
        Some(Component::Prefix(prefix)) => {
            let prefix_str = prefix
                .as_os_str()
                .to_str()
                .ok_or_else(|| io::Error::other("non-UTF-8 path prefix"))?;

            let base = Utf8PathBuf::from(prefix_str).join(std::path::MAIN_SEPARATOR.to_string());
            let relative = std_path
                .strip_prefix(base.as_std_path())
                .or_else(|_| std_path.strip_prefix(prefix.as_os_str()))
                .map_err(|_| io::Error::other("failed to strip prefix from path"))?
                .to_path_buf();
            (base, relative)
        }
        // Unix-style absolute path.
        Some(Component::RootDir) => {
            let base = Utf8PathBuf::from(std::path::MAIN_SEPARATOR.to_string());
            let relative = std_path
                .strip_prefix(base.as_std_path())
                .map_err(|_| io::Error::other("failed to strip root from absolute path"))?
                .to_path_buf();
            (base, relative)
        }
        // Relative path: resolve from the current directory.
        _ => (Utf8PathBuf::from("."), std_path.to_path_buf()),
    };

    let dir = open_utf8_dir(&base)?;
    let relative =
        Utf8PathBuf::from_path_buf(relative).map_err(|_| io::Error::other("non-UTF-8 path"))?;

    Ok((dir, relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::fs;
    use tempfile::TempDir;

    struct Tree {
        _dir: TempDir,
        root: Utf8PathBuf,
    }

    #[fixture]
    fn tree() -> Tree {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 tempdir");
        fs::create_dir_all(root.join("SA1/AUST")).expect("create SA1");
        fs::create_dir_all(root.join("STE")).expect("create STE");
        for file in [
            "SA1/AUST/2011Census_B02_AUST_SA1_sequential.csv",
            "SA1/AUST/2011Census_B01_AUST_SA1_sequential.csv",
            "STE/2011Census_B01_AUST_STE_sequential.CSV",
            "STE/readme.txt",
        ] {
            fs::write(root.join(file), b"region_id\n").expect("write file");
        }
        Tree { _dir: dir, root }
    }

    #[rstest]
    fn lists_matching_files_sorted(tree: Tree) {
        let found = files_with_suffix(&tree.root.join("SA1/AUST"), ".csv").expect("list");
        let names: Vec<_> = found.iter().filter_map(|path| path.file_name()).collect();
        assert_eq!(
            names,
            vec![
                "2011Census_B01_AUST_SA1_sequential.csv",
                "2011Census_B02_AUST_SA1_sequential.csv"
            ]
        );
    }

    #[rstest]
    fn suffix_match_ignores_case(tree: Tree) {
        let found = files_with_suffix(&tree.root.join("STE"), ".csv").expect("list");
        assert_eq!(found.len(), 1);
    }

    #[rstest]
    fn recursive_listing_descends(tree: Tree) {
        let found = files_with_suffix_recursive(&tree.root, ".csv").expect("list");
        assert_eq!(found.len(), 3);
    }

    #[rstest]
    fn lists_subdirectories(tree: Tree) {
        let found = subdirectories(&tree.root).expect("list");
        assert_eq!(found, vec![tree.root.join("SA1"), tree.root.join("STE")]);
    }

    #[rstest]
    fn classifies_paths(tree: Tree) {
        assert!(is_dir(&tree.root.join("SA1")).expect("inspect"));
        assert!(!is_dir(&tree.root.join("missing")).expect("inspect"));
        assert!(is_file(&tree.root.join("STE/readme.txt")).expect("inspect"));
        assert!(!is_file(&tree.root.join("STE")).expect("inspect"));
        assert!(!is_file(&tree.root.join("missing/readme.txt")).expect("inspect"));
    }

    #[rstest]
    fn creates_nested_directories(tree: Tree) {
        let target = tree.root.join("scratch/a/b");
        ensure_dir(&target).expect("create");
        assert!(target.is_dir());
        ensure_parent_dir(&tree.root.join("dumps/aus_census_2011.dump")).expect("create parent");
        assert!(tree.root.join("dumps").is_dir());
    }
}
