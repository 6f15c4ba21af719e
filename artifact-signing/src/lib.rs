// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Recursive signing dispatch for heterogeneous artifacts.

This crate coordinates code signing of nested container artifacts and
application deployment manifests against external capabilities that
vend an asymmetric private key and an X.509 certificate. It does not
implement any signature format itself: primitive signing of portable
executables, packages, and plugin files is performed by registered
[DataFormatSigner] implementations, XML digital signatures by a
[ManifestSigner] capability, and manifest metadata rewrites by an
external utility behind [ManifestUpdater].

The two central pieces:

* [AggregatingSigner] partitions input files, discovers signable
  contents inside nested containers, and guarantees innermost-first
  signing with idempotent container lifecycle (see
  [artifact_containers]).
* [ClickOnceSigner] drives the deployment-manifest protocol: the
  `.deploy` rename dance, payload signing through the aggregating
  signer, XML signatures over both manifests, and the external
  manifest-update utility with its retry policy. The on-disk name set
  is restored on every exit path.

Certificates and keys enter through [CertificateProvider] and
[SignatureAlgorithmProvider] and are acquired once per operation and
shared read-only across signer tasks.
*/

pub mod aggregating;
pub mod app_installer;
pub mod clickonce;
pub mod cryptography;
pub mod error;
pub mod manifest_tool;
pub mod options;
pub mod pe;
pub mod signer;
#[cfg(test)]
mod testutil;

pub use {
    aggregating::AggregatingSigner,
    app_installer::{
        classify_app_installer, AppInstallerManifest, AppInstallerSigner, MainElement,
        APP_INSTALLER_NAMESPACES,
    },
    clickonce::{ClickOnceSigner, DEPLOYMENT_MANIFEST_EXTENSIONS},
    cryptography::{
        publisher_from_certificate, CertificateProvider, MemoryCertificateProvider,
        MemorySigningKeyProvider, SignatureAlgorithmProvider,
    },
    error::{Result, SigningError},
    manifest_tool::{split_arguments, ManifestSigner, ManifestToolRunner, ManifestUpdater},
    options::{HashAlgorithm, SigningOptions, SigningOptionsBuilder},
    pe::path_is_pe,
    signer::DataFormatSigner,
};
