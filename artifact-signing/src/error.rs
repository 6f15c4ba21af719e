// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {artifact_containers::ContainerError, thiserror::Error};

/// Unified error type for signing orchestration.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("required argument is null or empty: {0}")]
    InputValidation(&'static str),

    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("X.509 certificate error: {0}")]
    X509(#[from] x509_certificate::X509CertificateError),

    #[error("XML read error: {0}")]
    XmlRead(#[from] xml::reader::Error),

    #[error("XML write error: {0}")]
    XmlWrite(#[from] xml::writer::Error),

    #[error("unable to launch manifest utility: {0}")]
    UtilityLaunch(String),

    #[error("manifest utility exited with code {0}")]
    UtilityExit(i32),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, SigningError>;
