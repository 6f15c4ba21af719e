// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! External manifest tooling capabilities.

Two collaborators live behind these traits: the XML digital signature
signer that signs a manifest in place, and the manifest-update utility
(a native CLI in the reference deployment) that rewrites manifest
hashes and publisher metadata. The utility contract is a single logical
argument string; [ManifestToolRunner] splits it quote-aware before
spawning, since process-spawn APIs differ on how arguments are
delimited.
*/

use {
    crate::{
        error::{Result, SigningError},
        options::SigningOptions,
    },
    async_trait::async_trait,
    log::{debug, warn},
    std::path::{Path, PathBuf},
    x509_certificate::{CapturedX509Certificate, InMemorySigningKeyPair},
};

/// Signs a manifest file in place with an XML digital signature.
#[async_trait]
pub trait ManifestSigner: Send + Sync {
    async fn sign_manifest(
        &self,
        manifest: &Path,
        certificate: &CapturedX509Certificate,
        key: &InMemorySigningKeyPair,
        options: &SigningOptions,
    ) -> Result<()>;
}

/// Invokes the external manifest-update utility.
///
/// Returns the process exit code; zero means success.
#[async_trait]
pub trait ManifestUpdater: Send + Sync {
    async fn run(&self, arguments: &str) -> Result<i32>;
}

/// A [ManifestUpdater] backed by a native executable.
#[derive(Clone, Debug)]
pub struct ManifestToolRunner {
    exe: PathBuf,
}

impl ManifestToolRunner {
    /// Construct an instance invoking the given executable.
    ///
    /// No validation is done that the path exists.
    pub fn new(exe: impl AsRef<Path>) -> Self {
        Self {
            exe: exe.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ManifestUpdater for ManifestToolRunner {
    async fn run(&self, arguments: &str) -> Result<i32> {
        let args = split_arguments(arguments);

        debug!("running {} {}", self.exe.display(), arguments);

        let output = tokio::process::Command::new(&self.exe)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                SigningError::UtilityLaunch(format!("{}: {}", self.exe.display(), e))
            })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!("{}", line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            warn!("{}", line);
        }

        Ok(output.status.code().unwrap_or(-1))
    }
}

/// Split a logical argument string into argv entries.
///
/// Double quotes group whitespace-containing values and are stripped
/// from the result.
pub fn split_arguments(arguments: &str) -> Vec<String> {
    let mut args = vec![];
    let mut current = String::new();
    let mut in_quotes = false;
    let mut pending = false;

    for c in arguments.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                pending = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if pending {
                    args.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }

    if pending {
        args.push(current);
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_plain_arguments() {
        assert_eq!(
            split_arguments("-update a.manifest -a sha256RSA"),
            vec!["-update", "a.manifest", "-a", "sha256RSA"]
        );
    }

    #[test]
    fn split_quoted_arguments() {
        assert_eq!(
            split_arguments(r#"-update "/tmp/My App/MyApp.application" -n "Application Name""#),
            vec!["-update", "/tmp/My App/MyApp.application", "-n", "Application Name"]
        );
    }

    #[test]
    fn split_empty_quoted_argument() {
        assert_eq!(split_arguments(r#"-n """#), vec!["-n", ""]);
    }

    #[test]
    fn split_empty_string() {
        assert!(split_arguments("").is_empty());
        assert!(split_arguments("   ").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runner_reports_exit_code() -> Result<()> {
        let runner = ManifestToolRunner::new("/bin/sh");

        assert_eq!(runner.run(r#"-c "exit 0""#).await?, 0);
        assert_eq!(runner.run(r#"-c "exit 3""#).await?, 3);

        Ok(())
    }

    #[tokio::test]
    async fn runner_launch_failure_is_an_error() {
        let runner = ManifestToolRunner::new("/nonexistent/manifest-tool");

        assert!(matches!(
            runner.run("-update x").await,
            Err(SigningError::UtilityLaunch(_))
        ));
    }
}
