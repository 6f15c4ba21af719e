// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {std::path::PathBuf, thiserror::Error};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("bad glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("not a recognized container: {0}")]
    UnrecognizedExtension(PathBuf),

    #[error("unable to open container {0}: {1}")]
    Open(PathBuf, String),

    #[error("container {0} is {1}; operation not valid in this state")]
    Lifecycle(PathBuf, &'static str),

    #[error("archive entry escapes the container root: {0}")]
    EntryEscapesRoot(String),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, ContainerError>;
