// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Container lifecycle: open, enumerate, re-pack, dispose.

A [Container] extracts an archive-backed artifact into a private
temporary workspace, exposes the contained files, and re-packs the
workspace over the original file atomically. Disposal is idempotent and
also runs from `Drop`, so a container opened during signing is cleaned
up on every exit path.
*/

use {
    crate::{
        error::{ContainerError, Result},
        kind::ContainerKind,
        path_matching::FileMatcher,
    },
    log::{debug, warn},
    std::{
        io::{Read, Write},
        path::{Path, PathBuf},
    },
    tempfile::TempDir,
};

/// NuGet packages carry their package signature in this well-known entry.
/// It is dropped on re-pack because the package is re-signed afterwards.
const NUGET_SIGNATURE_ENTRY: &str = ".signature.p7s";

/// Lifecycle state of a [Container].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContainerState {
    Closed,
    Open,
    Disposed,
}

impl ContainerState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::Disposed => "disposed",
        }
    }
}

/// A container artifact bound to a filesystem path.
#[derive(Debug)]
pub struct Container {
    path: PathBuf,
    kind: ContainerKind,
    state: ContainerState,
    workspace: Option<TempDir>,
}

impl Container {
    fn new(path: impl AsRef<Path>, kind: ContainerKind) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            kind,
            state: ContainerState::Closed,
            workspace: None,
        }
    }

    /// The file this container is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The container family.
    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// The working directory holding the extracted contents.
    ///
    /// Stable while the container is open.
    pub fn working_directory(&self) -> Result<&Path> {
        self.require_open()
    }

    fn require_open(&self) -> Result<&Path> {
        match (&self.state, &self.workspace) {
            (ContainerState::Open, Some(workspace)) => Ok(workspace.path()),
            _ => Err(ContainerError::Lifecycle(
                self.path.clone(),
                self.state.as_str(),
            )),
        }
    }

    /// Extract the container into a private temporary workspace.
    ///
    /// Only valid on a closed container. Malformed archive data yields
    /// [ContainerError::Open].
    pub fn open(&mut self) -> Result<()> {
        if self.state != ContainerState::Closed {
            return Err(ContainerError::Lifecycle(
                self.path.clone(),
                self.state.as_str(),
            ));
        }

        let workspace = tempfile::Builder::new()
            .prefix("artifact-container-")
            .tempdir()?;

        debug!(
            "extracting {} to {}",
            self.path.display(),
            workspace.path().display()
        );

        self.extract_to(workspace.path())?;

        self.workspace = Some(workspace);
        self.state = ContainerState::Open;

        Ok(())
    }

    fn extract_to(&self, dest: &Path) -> Result<()> {
        let fh = std::fs::File::open(&self.path)?;

        let mut archive = zip::ZipArchive::new(fh)
            .map_err(|e| ContainerError::Open(self.path.clone(), e.to_string()))?;

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| ContainerError::Open(self.path.clone(), e.to_string()))?;

            if entry.is_dir() {
                continue;
            }

            let relative = entry
                .enclosed_name()
                .map(|p| p.to_path_buf())
                .ok_or_else(|| ContainerError::EntryEscapesRoot(entry.name().to_string()))?;

            let dest_path = dest.join(relative);

            if let Some(parent) = dest_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;

            let mut fh = std::fs::File::create(&dest_path)?;
            fh.write_all(&data)?;
        }

        Ok(())
    }

    fn relative_files(&self) -> Result<Vec<PathBuf>> {
        let root = self.require_open()?;

        let mut files = vec![];

        for entry in walkdir::WalkDir::new(root) {
            let entry = entry.map_err(|e| {
                ContainerError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "directory walk failed")
                }))
            })?;

            if entry.file_type().is_file() {
                let relative = entry
                    .path()
                    .strip_prefix(root)
                    .expect("walked path is always under the workspace root")
                    .to_path_buf();
                files.push(relative);
            }
        }

        files.sort();

        Ok(files)
    }

    /// All regular files within the container, in lexicographic order of
    /// their relative paths.
    ///
    /// Returned paths are absolute and remain valid until the next
    /// [Self::save] or [Self::dispose].
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let root = self.require_open()?;

        Ok(self
            .relative_files()?
            .into_iter()
            .map(|relative| root.join(relative))
            .collect())
    }

    /// Like [Self::files], filtered by an include-only matcher evaluated
    /// against paths relative to the container root.
    pub fn files_matching(&self, matcher: &FileMatcher) -> Result<Vec<PathBuf>> {
        let root = self.require_open()?;

        Ok(self
            .relative_files()?
            .into_iter()
            .filter(|relative| matcher.matches(relative))
            .map(|relative| root.join(relative))
            .collect())
    }

    /// Re-pack the workspace over the original file.
    ///
    /// The archive is written to a sibling temporary file and renamed into
    /// place, so a crash mid-save never leaves a truncated container.
    /// NuGet-family containers drop any prior package signature entry.
    pub fn save(&mut self) -> Result<()> {
        let root = self.require_open()?.to_path_buf();

        debug!("re-packing {}", self.path.display());

        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let tmp = tempfile::Builder::new()
            .prefix(".artifact-repack-")
            .tempfile_in(parent)?;

        {
            let mut writer = zip::ZipWriter::new(tmp.as_file());
            let options = zip::write::FileOptions::default();

            for relative in self.relative_files()? {
                let name = relative.to_string_lossy().replace('\\', "/");

                if self.kind == ContainerKind::NuGet
                    && name.to_ascii_lowercase() == NUGET_SIGNATURE_ENTRY
                {
                    debug!("dropping package signature entry from {}", self.path.display());
                    continue;
                }

                writer.start_file(name, options)?;
                let data = std::fs::read(root.join(&relative))?;
                writer.write_all(&data)?;
            }

            writer.finish()?;
        }

        tmp.persist(&self.path).map_err(|e| e.error)?;

        Ok(())
    }

    /// Release the temporary workspace.
    ///
    /// Idempotent. Errors releasing temp storage are logged and swallowed;
    /// subsequent operations on the container fail with a lifecycle error.
    pub fn dispose(&mut self) {
        if self.state == ContainerState::Disposed {
            return;
        }

        if let Some(workspace) = self.workspace.take() {
            if let Err(e) = workspace.close() {
                warn!(
                    "error releasing workspace for {}: {}",
                    self.path.display(),
                    e
                );
            }
        }

        self.state = ContainerState::Disposed;
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Recognizes container files and produces [Container] handles for them.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContainerProvider;

impl ContainerProvider {
    pub fn new() -> Self {
        Self
    }

    /// Whether the path is a generic zip archive (including upload archives).
    pub fn is_zip_container(&self, path: impl AsRef<Path>) -> bool {
        ContainerKind::from_path(path) == Some(ContainerKind::Zip)
    }

    /// Whether the path is a NuGet-convention plugin package.
    pub fn is_nuget_container(&self, path: impl AsRef<Path>) -> bool {
        ContainerKind::from_path(path) == Some(ContainerKind::NuGet)
    }

    /// Whether the path is an application package.
    pub fn is_appx_container(&self, path: impl AsRef<Path>) -> bool {
        ContainerKind::from_path(path) == Some(ContainerKind::Appx)
    }

    /// Whether the path is an application package bundle.
    pub fn is_appx_bundle_container(&self, path: impl AsRef<Path>) -> bool {
        ContainerKind::from_path(path) == Some(ContainerKind::AppxBundle)
    }

    /// Whether the path is any recognized container.
    pub fn is_container(&self, path: impl AsRef<Path>) -> bool {
        ContainerKind::from_path(path).is_some()
    }

    /// Obtain a new closed [Container] bound to the given file.
    pub fn container(&self, path: impl AsRef<Path>) -> Result<Container> {
        let path = path.as_ref();

        let kind = ContainerKind::from_path(path)
            .ok_or_else(|| ContainerError::UnrecognizedExtension(path.to_path_buf()))?;

        Ok(Container::new(path, kind))
    }
}
