// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Idempotent file writing.
//!
//! Every file the bootstrap agent renders is written in full, never appended
//! to, so that re-running configuration with the same inputs leaves the host
//! byte-for-byte unchanged.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs::Permissions;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;

#[derive(thiserror::Error, Debug)]
pub enum WriteFileError {
    #[error("Failed to create directory {path}")]
    CreateDir {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("Failed to write {path}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("Failed to read {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("Failed to remove {path}")]
    Remove {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("Path {0} has no parent directory")]
    NoParent(Utf8PathBuf),
}

/// Resolves an absolute host path beneath `root`.
///
/// Production code passes `/`; tests pass a temporary directory.
pub fn rooted(root: &Utf8Path, path: &str) -> Utf8PathBuf {
    root.join(path.trim_start_matches('/'))
}

/// Writes `contents` to `path` with permission bits `mode`.
///
/// Parent directories are created as needed. The file is replaced by rename,
/// so readers never observe a partial write. Returns `true` if the contents
/// on disk changed.
pub fn write_file(
    path: &Utf8Path,
    contents: &[u8],
    mode: u32,
) -> Result<bool, WriteFileError> {
    let parent = path
        .parent()
        .ok_or_else(|| WriteFileError::NoParent(path.to_owned()))?;
    std::fs::create_dir_all(parent).map_err(|err| {
        WriteFileError::CreateDir { path: parent.to_owned(), err }
    })?;

    let unchanged = match std::fs::read(path) {
        Ok(existing) => existing == contents,
        Err(err) if err.kind() == ErrorKind::NotFound => false,
        Err(err) => {
            return Err(WriteFileError::Read { path: path.to_owned(), err })
        }
    };

    if unchanged {
        std::fs::set_permissions(path, Permissions::from_mode(mode))
            .map_err(|err| WriteFileError::Write {
                path: path.to_owned(),
                err,
            })?;
        return Ok(false);
    }

    let file_name = path.file_name().unwrap_or("file");
    let tmp_path = parent.join(format!(".{file_name}.nodeadm-tmp"));
    let write_err =
        |err| WriteFileError::Write { path: path.to_owned(), err };
    std::fs::write(&tmp_path, contents).map_err(write_err)?;
    std::fs::set_permissions(&tmp_path, Permissions::from_mode(mode))
        .map_err(write_err)?;
    std::fs::rename(&tmp_path, path).map_err(write_err)?;
    Ok(true)
}

/// Reads a file, returning `None` if it does not exist.
pub fn read_optional(
    path: &Utf8Path,
) -> Result<Option<String>, WriteFileError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(WriteFileError::Read { path: path.to_owned(), err }),
    }
}

/// Removes a file. A missing file is not an error.
pub fn remove_file_if_exists(path: &Utf8Path) -> Result<(), WriteFileError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(WriteFileError::Remove { path: path.to_owned(), err }),
    }
}
