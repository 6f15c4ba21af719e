// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Deployment manifest signing.

A deployment manifest (`.application` / `.vsto`) references one
per-version manifest inside a sibling version directory, which in turn
hashes the deployable payload files. Signing is a fixed protocol:
strip the `.deploy` suffix from payload files, sign the payload through
the aggregating signer, XML-dsig-sign the per-version manifest, run the
external manifest-update utility over both manifests, XML-dsig-sign the
deployment manifest, and restore the `.deploy` names.

The rename restoration is held by an RAII guard, so the on-disk name
set is identical to the input on every exit path.
*/

use {
    crate::{
        cryptography::{
            publisher_from_certificate, CertificateProvider, SignatureAlgorithmProvider,
        },
        error::{Result, SigningError},
        manifest_tool::{ManifestSigner, ManifestUpdater},
        options::SigningOptions,
        signer::DataFormatSigner,
    },
    artifact_containers::invariant_extension,
    async_trait::async_trait,
    log::{debug, info, warn},
    once_cell::sync::OnceCell,
    std::{
        path::{Path, PathBuf},
        sync::{Arc, Weak},
        time::Duration,
    },
    x509_certificate::{CapturedX509Certificate, InMemorySigningKeyPair},
};

/// Extensions of deployment manifests (invariant case-insensitive).
pub const DEPLOYMENT_MANIFEST_EXTENSIONS: &[&str] = &["application", "vsto"];

/// Signs application deployment manifests and their payload.
pub struct ClickOnceSigner {
    certificates: Arc<dyn CertificateProvider>,
    keys: Arc<dyn SignatureAlgorithmProvider>,
    manifest_signer: Arc<dyn ManifestSigner>,
    manifest_updater: Arc<dyn ManifestUpdater>,
    payload_signer: OnceCell<Weak<dyn DataFormatSigner>>,
    retry_delay: Duration,
}

impl ClickOnceSigner {
    /// Construct an instance from its capabilities.
    ///
    /// The payload signer is wired separately with
    /// [Self::set_payload_signer] because it is the aggregating signer
    /// this instance registers with.
    pub fn new(
        certificates: Arc<dyn CertificateProvider>,
        keys: Arc<dyn SignatureAlgorithmProvider>,
        manifest_signer: Arc<dyn ManifestSigner>,
        manifest_updater: Arc<dyn ManifestUpdater>,
    ) -> Self {
        Self {
            certificates,
            keys,
            manifest_signer,
            manifest_updater,
            payload_signer: OnceCell::new(),
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Override the delay between manifest utility attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Wire the signer that handles the deployable payload files.
    pub fn set_payload_signer(&self, signer: Weak<dyn DataFormatSigner>) {
        if self.payload_signer.set(signer).is_err() {
            warn!("deployment payload signer is already wired");
        }
    }

    fn payload_signer(&self) -> Result<Arc<dyn DataFormatSigner>> {
        self.payload_signer
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| SigningError::Signing("deployment payload signer is not wired".into()))
    }

    async fn sign_deployment_manifest(
        &self,
        manifest: &Path,
        certificate: &CapturedX509Certificate,
        key: &InMemorySigningKeyPair,
        options: &SigningOptions,
    ) -> Result<()> {
        info!("signing deployment manifest {}", manifest.display());

        let directory = manifest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(SigningError::InputValidation("deployment manifest path"))?;

        let companion = locate_companion_manifest(directory)?;

        let mut dance = RenameDance::strip_deploy_suffixes(directory)?;

        let result = self
            .sign_payload_and_manifests(
                manifest,
                companion.as_deref(),
                &dance.renamed_paths(),
                certificate,
                key,
                options,
            )
            .await;

        let restored = dance.restore();

        result.and(restored)
    }

    async fn sign_payload_and_manifests(
        &self,
        manifest: &Path,
        companion: Option<&Path>,
        payload: &[PathBuf],
        certificate: &CapturedX509Certificate,
        key: &InMemorySigningKeyPair,
        options: &SigningOptions,
    ) -> Result<()> {
        if !payload.is_empty() {
            let signer = self.payload_signer()?;
            signer.sign(payload, options).await?;
        }

        let algorithm = options.file_hash_algorithm().as_str();
        let application_name = options.application_name().unwrap_or_default();

        if let Some(companion) = companion {
            self.manifest_signer
                .sign_manifest(companion, certificate, key, options)
                .await?;

            let arguments = format!(
                r#"-update "{}" -a {}RSA -n "{}""#,
                companion.display(),
                algorithm,
                application_name
            );
            self.run_updater_with_retry(&arguments).await?;
        }

        let publisher = match options.publisher_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => publisher_from_certificate(certificate)?,
        };

        let mut arguments = format!(
            r#"-update "{}" -a {}RSA -n "{}" -pub "{}""#,
            manifest.display(),
            algorithm,
            application_name,
            publisher
        );

        if let Some(companion) = companion {
            arguments.push_str(&format!(r#" -appm "{}""#, companion.display()));
        }

        if let Some(url) = options.description_url() {
            arguments.push_str(&format!(" -SupportURL {}", url));
        }

        self.run_updater_with_retry(&arguments).await?;

        self.manifest_signer
            .sign_manifest(manifest, certificate, key, options)
            .await
    }

    async fn run_updater_with_retry(&self, arguments: &str) -> Result<()> {
        match self.manifest_updater.run(arguments).await? {
            0 => Ok(()),
            code => {
                warn!(
                    "manifest utility exited with {}; retrying in {:?}",
                    code, self.retry_delay
                );
                tokio::time::sleep(self.retry_delay).await;

                match self.manifest_updater.run(arguments).await? {
                    0 => Ok(()),
                    code => Err(SigningError::UtilityExit(code)),
                }
            }
        }
    }
}

#[async_trait]
impl DataFormatSigner for ClickOnceSigner {
    fn can_sign(&self, path: &Path) -> bool {
        invariant_extension(path)
            .map_or(false, |ext| DEPLOYMENT_MANIFEST_EXTENSIONS.contains(&ext.as_str()))
    }

    async fn sign(&self, paths: &[PathBuf], options: &SigningOptions) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }

        // Key material is acquired once and shared across the batch.
        let certificate = self.certificates.signing_certificate().await?;
        let key = self.keys.rsa_signing_key().await?;

        for path in paths {
            self.sign_deployment_manifest(path, &certificate, &key, options)
                .await?;
        }

        Ok(())
    }

    /// Copy the version directory and its contents (but not the
    /// deployment manifest itself) into the destination. Callers use
    /// this to content-address the deployable payload.
    async fn copy_signing_dependencies(
        &self,
        path: &Path,
        destination: &Path,
        _options: &SigningOptions,
    ) -> Result<()> {
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(SigningError::InputValidation("deployment manifest path"))?;

        for entry in std::fs::read_dir(directory)? {
            let entry = entry?;

            if entry.file_type()?.is_dir() {
                copy_directory(&entry.path(), &destination.join(entry.file_name()))?;
            }
        }

        Ok(())
    }
}

/// Locate the unique per-version manifest under the deployment
/// manifest's directory.
///
/// Returns `None` when there is no version directory or no `*.manifest`
/// inside one; more than one candidate is an ambiguity error.
fn locate_companion_manifest(directory: &Path) -> Result<Option<PathBuf>> {
    let mut candidates = vec![];

    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;

        if !entry.file_type()?.is_dir() {
            continue;
        }

        for inner in std::fs::read_dir(entry.path())? {
            let inner = inner?;

            if inner.file_type()?.is_file()
                && invariant_extension(inner.path()).as_deref() == Some("manifest")
            {
                candidates.push(inner.path());
            }
        }
    }

    candidates.sort();

    match candidates.len() {
        0 => {
            debug!(
                "no per-version manifest under {}; proceeding without one",
                directory.display()
            );
            Ok(None)
        }
        1 => Ok(candidates.pop()),
        _ => Err(SigningError::Signing(format!(
            "multiple per-version manifests under {}",
            directory.display()
        ))),
    }
}

fn copy_directory(source: &Path, destination: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(source) {
        let entry = entry.map_err(|e| {
            SigningError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "directory walk failed")
            }))
        })?;

        let relative = entry
            .path()
            .strip_prefix(source)
            .expect("walked path is always under the source root");
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// Records `.deploy` suffix strips and restores them exactly once.
///
/// Restoration also runs from `Drop`, covering panics and dropped
/// futures.
struct RenameDance {
    renames: Vec<(PathBuf, PathBuf)>,
    restored: bool,
}

impl RenameDance {
    fn strip_deploy_suffixes(root: &Path) -> Result<Self> {
        let mut dance = Self {
            renames: vec![],
            restored: false,
        };

        let mut deploy_files = vec![];

        for entry in walkdir::WalkDir::new(root) {
            let entry = entry.map_err(|e| {
                SigningError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "directory walk failed")
                }))
            })?;

            if entry.file_type().is_file()
                && invariant_extension(entry.path()).as_deref() == Some("deploy")
            {
                deploy_files.push(entry.path().to_path_buf());
            }
        }

        deploy_files.sort();

        for original in deploy_files {
            let renamed = original.with_extension("");

            debug!(
                "renaming {} -> {}",
                original.display(),
                renamed.display()
            );

            if let Err(e) = std::fs::rename(&original, &renamed) {
                let _ = dance.restore();
                return Err(e.into());
            }

            dance.renames.push((original, renamed));
        }

        Ok(dance)
    }

    fn renamed_paths(&self) -> Vec<PathBuf> {
        self.renames
            .iter()
            .map(|(_, renamed)| renamed.clone())
            .collect()
    }

    fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;

        let mut first_error = None;

        for (original, renamed) in self.renames.iter().rev() {
            if let Err(e) = std::fs::rename(renamed, original) {
                warn!(
                    "unable to restore {} from {}: {}",
                    original.display(),
                    renamed.display(),
                    e
                );
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Drop for RenameDance {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}
