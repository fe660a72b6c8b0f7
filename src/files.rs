//! Capability-scoped file helpers.
//!
//! Paths are split into a parent directory opened with ambient authority and
//! a file name resolved relative to it.

use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};

fn split(path: &Utf8Path) -> io::Result<(&Utf8Path, &str)> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{path} is missing a file name"),
        )
    })?;
    Ok((parent, file_name))
}

/// Reads `path` into a string.
pub(crate) fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let (parent, file_name) = split(path)?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    dir.read_to_string(file_name)
}

/// Writes `contents` to `path`, replacing any existing file.
pub(crate) fn write(path: &Utf8Path, contents: &str) -> io::Result<()> {
    let (parent, file_name) = split(path)?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    dir.write(file_name, contents)
}

/// Returns whether `path` names an existing entry. A missing parent counts as
/// absent.
pub(crate) fn exists(path: &Utf8Path) -> io::Result<bool> {
    let (parent, file_name) = split(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir.try_exists(file_name),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Returns whether `path` names a directory that can be opened.
pub(crate) fn dir_exists(path: &Utf8Path) -> bool {
    Dir::open_ambient_dir(path, ambient_authority()).is_ok()
}

/// Creates `path` and any missing parents.
pub(crate) fn create_dir_all(path: &Utf8Path) -> io::Result<()> {
    let (parent, name) = split(path)?;
    if !dir_exists(parent) {
        create_dir_all(parent)?;
    }
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    dir.create_dir_all(name)
}
