// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The data format signer interface. */

use {
    crate::{error::Result, options::SigningOptions},
    async_trait::async_trait,
    std::path::{Path, PathBuf},
};

/// A signer that handles one or more data formats.
///
/// Implementations are registered with the aggregating signer, which
/// routes each input file to the first signer claiming it.
#[async_trait]
pub trait DataFormatSigner: Send + Sync {
    /// Whether this signer handles the given file.
    ///
    /// Total and pure over the file path and extension: no I/O, no
    /// dependence on ambient state.
    fn can_sign(&self, path: &Path) -> bool;

    /// Sign the given files as a batch.
    ///
    /// Returns once every file is signed or the batch has failed. A
    /// partial batch failure surfaces as an error.
    async fn sign(&self, paths: &[PathBuf], options: &SigningOptions) -> Result<()>;

    /// Copy sibling files required for content addressing of `path` into
    /// `destination` (a fresh directory). The file itself is not copied.
    async fn copy_signing_dependencies(
        &self,
        _path: &Path,
        _destination: &Path,
        _options: &SigningOptions,
    ) -> Result<()> {
        Ok(())
    }
}
