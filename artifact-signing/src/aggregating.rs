// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The aggregating signer: recursive dispatch over nested containers.

Given a flat set of input files, this signer discovers signable
contents inside nested container formats, routes files to the leaf
signer claiming them, and re-packs containers after their contents have
been signed. Signing proceeds inside-out: for a container C holding D
holding F, F is signed before D is re-packed, which completes before C
is re-packed. The recursion structure enforces this without explicit
coordination.

Recursion runs as three strictly ordered passes per level. Generic
archives (including plugin packages) come first so that application
packages embedded inside an archive are signed as packages before the
archive is re-packed; packages come second; bundles come last because
their members are packages that must already be signed.
*/

use {
    crate::{
        error::{Result, SigningError},
        options::SigningOptions,
        pe::path_is_pe,
        signer::DataFormatSigner,
    },
    artifact_containers::{Container, ContainerProvider, FileMatcher},
    async_trait::async_trait,
    log::{debug, info},
    std::{
        collections::HashSet,
        path::{Path, PathBuf},
        sync::Arc,
    },
};

/// The only files a bundle surrenders for inner signing. Caller
/// matchers never apply inside a bundle: its members are atomic units.
const BUNDLE_PAYLOAD_PATTERNS: &[&str] = &["**/*.appx", "**/*.msix"];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RecursionPass {
    /// Generic zip archives and NuGet-convention plugin packages.
    Archives,
    /// Application packages.
    Packages,
    /// Application package bundles.
    Bundles,
}

impl RecursionPass {
    fn describe(&self) -> &'static str {
        match self {
            Self::Archives => "archives",
            Self::Packages => "packages",
            Self::Bundles => "bundles",
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum DispatchTarget {
    Leaf(usize),
    Default,
}

/// Routes files to leaf signers and recurses into containers.
pub struct AggregatingSigner {
    provider: ContainerProvider,
    signers: Vec<Arc<dyn DataFormatSigner>>,
    default_signer: Arc<dyn DataFormatSigner>,
}

impl AggregatingSigner {
    /// Construct an instance from registered leaf signers and the
    /// designated default signer.
    ///
    /// The default signer receives files no leaf signer claims but
    /// whose content identifies them as portable executables. There is
    /// exactly one default signer by construction.
    pub fn new(
        provider: ContainerProvider,
        signers: Vec<Arc<dyn DataFormatSigner>>,
        default_signer: Arc<dyn DataFormatSigner>,
    ) -> Self {
        Self {
            provider,
            signers,
            default_signer,
        }
    }

    fn pass_container_paths<'a>(
        &self,
        paths: &'a [PathBuf],
        pass: RecursionPass,
    ) -> Vec<&'a Path> {
        match pass {
            // Zip archives are processed ahead of plugin packages so
            // their contents land in the recursion before plugin files.
            RecursionPass::Archives => {
                let mut containers = paths
                    .iter()
                    .filter(|p| self.provider.is_zip_container(p))
                    .map(PathBuf::as_path)
                    .collect::<Vec<_>>();
                containers.extend(
                    paths
                        .iter()
                        .filter(|p| self.provider.is_nuget_container(p))
                        .map(PathBuf::as_path),
                );
                containers
            }
            RecursionPass::Packages => paths
                .iter()
                .filter(|p| self.provider.is_appx_container(p))
                .map(PathBuf::as_path)
                .collect(),
            RecursionPass::Bundles => paths
                .iter()
                .filter(|p| self.provider.is_appx_bundle_container(p))
                .map(PathBuf::as_path)
                .collect(),
        }
    }

    async fn recurse_pass(
        &self,
        paths: &[PathBuf],
        options: &SigningOptions,
        pass: RecursionPass,
    ) -> Result<()> {
        let container_paths = self.pass_container_paths(paths, pass);

        if container_paths.is_empty() {
            return Ok(());
        }

        info!(
            "recursing into {} {}",
            container_paths.len(),
            pass.describe()
        );

        let opens = container_paths.iter().copied().map(|path| async move {
            let mut container = self.provider.container(path)?;
            container.open()?;
            Ok::<Container, SigningError>(container)
        });

        // join_all rather than an early-abort join: a failure opening
        // one container must not leave a sibling's workspace undisposed.
        let results = futures::future::join_all(opens).await;

        let mut containers = vec![];
        let mut first_error = None;

        for result in results {
            match result {
                Ok(container) => containers.push(container),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        let result = match first_error {
            Some(e) => Err(e),
            None => self.sign_and_save(&mut containers, options, pass).await,
        };

        for container in containers.iter_mut() {
            container.dispose();
        }

        result
    }

    async fn sign_and_save(
        &self,
        containers: &mut [Container],
        options: &SigningOptions,
        pass: RecursionPass,
    ) -> Result<()> {
        let bundle_matcher = if pass == RecursionPass::Bundles {
            Some(FileMatcher::new(BUNDLE_PAYLOAD_PATTERNS).map_err(SigningError::Container)?)
        } else {
            None
        };

        let mut collected = vec![];
        let mut collected_counts = vec![];

        for container in containers.iter() {
            let files = match &bundle_matcher {
                Some(matcher) => container.files_matching(matcher)?,
                None => self.select_files(container, options)?,
            };

            collected_counts.push(files.len());
            collected.extend(files);
        }

        if !collected.is_empty() {
            DataFormatSigner::sign(self, &collected, options).await?;
        }

        // Packages are always re-packed so final publisher metadata is
        // committed; archives and bundles that yielded nothing stay
        // untouched.
        let always_save = pass == RecursionPass::Packages;

        let saves = containers
            .iter_mut()
            .zip(collected_counts)
            .filter_map(|(container, count)| {
                (always_save || count > 0).then(|| async move {
                    container.save()?;
                    Ok::<(), SigningError>(())
                })
            });

        let results = futures::future::join_all(saves).await;

        for result in results {
            result?;
        }

        Ok(())
    }

    fn select_files(
        &self,
        container: &Container,
        options: &SigningOptions,
    ) -> Result<Vec<PathBuf>> {
        match (options.matcher(), options.anti_matcher()) {
            (None, None) => Ok(container.files()?),
            (matcher, anti_matcher) => {
                let included = match matcher {
                    Some(matcher) => container.files_matching(matcher)?,
                    None => container.files()?,
                };

                let excluded = match anti_matcher {
                    Some(matcher) => container
                        .files_matching(matcher)?
                        .into_iter()
                        .collect::<HashSet<_>>(),
                    None => HashSet::new(),
                };

                Ok(included
                    .into_iter()
                    .filter(|path| !excluded.contains(path))
                    .collect())
            }
        }
    }

    async fn dispatch(&self, paths: &[PathBuf], options: &SigningOptions) -> Result<()> {
        let mut targets = vec![];
        let mut groups: Vec<Vec<PathBuf>> = vec![];

        for path in paths {
            let target = if let Some(index) = self.signers.iter().position(|s| s.can_sign(path)) {
                DispatchTarget::Leaf(index)
            } else if path_is_pe(path) {
                DispatchTarget::Default
            } else {
                debug!("no signer claims {}; skipping", path.display());
                continue;
            };

            match targets.iter().position(|t| *t == target) {
                Some(index) => groups[index].push(path.clone()),
                None => {
                    targets.push(target);
                    groups.push(vec![path.clone()]);
                }
            }
        }

        let tasks = targets.iter().zip(groups.iter()).map(|(target, files)| {
            let signer = match target {
                DispatchTarget::Leaf(index) => &self.signers[*index],
                DispatchTarget::Default => &self.default_signer,
            };

            async move { signer.sign(files, options).await }
        });

        let results = futures::future::join_all(tasks).await;

        for result in results {
            result?;
        }

        Ok(())
    }
}

#[async_trait]
impl DataFormatSigner for AggregatingSigner {
    fn can_sign(&self, path: &Path) -> bool {
        self.signers.iter().any(|s| s.can_sign(path)) || self.provider.is_zip_container(path)
    }

    async fn sign(&self, paths: &[PathBuf], options: &SigningOptions) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }

        if options.recurse_containers() {
            for pass in [
                RecursionPass::Archives,
                RecursionPass::Packages,
                RecursionPass::Bundles,
            ] {
                self.recurse_pass(paths, options, pass).await?;
            }
        }

        self.dispatch(paths, options).await
    }

    async fn copy_signing_dependencies(
        &self,
        path: &Path,
        destination: &Path,
        options: &SigningOptions,
    ) -> Result<()> {
        for signer in &self.signers {
            if signer.can_sign(path) {
                signer
                    .copy_signing_dependencies(path, destination, options)
                    .await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testutil::{
            file_inode, new_signing_log, pe_image_bytes, write_zip, RecordingSigner,
        },
        std::io::Read,
    };

    fn entry_names(path: &Path) -> Vec<String> {
        let fh = std::fs::File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(fh).unwrap();

        let mut names = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("inner.zip");
        write_zip(&path, entries);
        std::fs::read(&path).unwrap()
    }

    #[tokio::test]
    async fn nested_containers_sign_inside_out() -> Result<()> {
        let td = tempfile::tempdir()?;

        let pe = pe_image_bytes();

        let nested1 = zip_bytes(&[("c.dll", pe.as_slice())]);
        let nested0_inner = zip_bytes(&[("nestedcontainer1.zip", nested1.as_slice())]);
        let nested0 = zip_bytes(&[
            ("b.dll", pe.as_slice()),
            ("nestedcontainer0.zip", nested0_inner.as_slice()),
        ]);
        let nupkg = zip_bytes(&[("folder0/folder1/f.dll", pe.as_slice())]);
        let vsix = zip_bytes(&[("folder0/folder1/folder2/g.dll", pe.as_slice())]);

        let appx_path = td.path().join("container.appx");
        write_zip(
            &appx_path,
            &[
                ("a.dll", pe.as_slice()),
                ("d.appinstaller", b"<AppInstaller/>"),
                ("nestedcontainer.nupkg", nupkg.as_slice()),
                ("nestedcontainer.vsix", vsix.as_slice()),
                ("nestedcontainer0.zip", nested0.as_slice()),
            ],
        );

        let log = new_signing_log();
        let signer = AggregatingSigner::new(
            ContainerProvider::new(),
            vec![
                Arc::new(RecordingSigner::new(
                    "appinstaller",
                    &["appinstaller"],
                    log.clone(),
                )),
                Arc::new(RecordingSigner::new("nupkg", &["nupkg"], log.clone())),
                Arc::new(RecordingSigner::new("vsix", &["vsix"], log.clone())),
                Arc::new(RecordingSigner::new("appx", &["appx", "msix"], log.clone())),
            ],
            Arc::new(RecordingSigner::new("pe", &[], log.clone())),
        );

        let options = SigningOptions::builder().build()?;
        signer.sign(&[appx_path.clone()], &options).await?;

        assert_eq!(
            log.lock().unwrap().as_slice(),
            [
                "c.dll",
                "b.dll",
                "f.dll",
                "g.dll",
                "a.dll",
                "d.appinstaller",
                "nestedcontainer.nupkg",
                "nestedcontainer.vsix",
                "container.appx",
            ]
        );

        Ok(())
    }

    #[tokio::test]
    async fn glob_filters_apply_inside_archives() -> Result<()> {
        let td = tempfile::tempdir()?;

        let pe = pe_image_bytes();
        let zip_path = td.path().join("payload.zip");
        write_zip(
            &zip_path,
            &[
                ("a.dll", pe.as_slice()),
                ("b.DLL", pe.as_slice()),
                ("c.txt", b"text"),
                ("d.exe", pe.as_slice()),
                ("e.EXE", pe.as_slice()),
                ("f/g.dll", pe.as_slice()),
                ("f/h.txt", b"text"),
                ("f/i.exe", pe.as_slice()),
                ("DoNotSign/j.dll", pe.as_slice()),
                ("DoNotSign/k.txt", b"text"),
                ("DoNotSign/l/m.txt", b"text"),
                ("DoNotSign/l/n.exe", pe.as_slice()),
            ],
        );

        let log = new_signing_log();
        let signer = AggregatingSigner::new(
            ContainerProvider::new(),
            vec![],
            Arc::new(RecordingSigner::new("pe", &[], log.clone())),
        );

        let options = SigningOptions::builder()
            .file_patterns(["**/*.dll", "**/*.exe", "!**/*.txt", "!**/DoNotSign/**/*"])?
            .build()?;

        signer.sign(&[zip_path], &options).await?;

        assert_eq!(
            log.lock().unwrap().as_slice(),
            ["a.dll", "b.DLL", "d.exe", "e.EXE", "g.dll", "i.exe"]
        );

        Ok(())
    }

    #[tokio::test]
    async fn caller_matchers_do_not_apply_inside_bundles() -> Result<()> {
        let td = tempfile::tempdir()?;

        let pe = pe_image_bytes();
        let bundle_path = td.path().join("container.appxbundle");
        write_zip(
            &bundle_path,
            &[("x.dll", pe.as_slice()), ("y.txt", b"text")],
        );

        let log = new_signing_log();
        let signer = AggregatingSigner::new(
            ContainerProvider::new(),
            vec![Arc::new(RecordingSigner::new(
                "bundle",
                &["appxbundle", "msixbundle"],
                log.clone(),
            ))],
            Arc::new(RecordingSigner::new("pe", &[], log.clone())),
        );

        let options = SigningOptions::builder()
            .file_patterns(["**/*.dll", "**/*.exe", "!**/*.txt"])?
            .build()?;

        signer.sign(&[bundle_path], &options).await?;

        assert_eq!(log.lock().unwrap().as_slice(), ["container.appxbundle"]);

        Ok(())
    }

    #[tokio::test]
    async fn no_recursion_means_no_container_opens() -> Result<()> {
        let td = tempfile::tempdir()?;

        let pe = pe_image_bytes();
        let zip_path = td.path().join("payload.zip");
        write_zip(&zip_path, &[("a.dll", pe.as_slice())]);
        let before = std::fs::read(&zip_path)?;

        let log = new_signing_log();
        let signer = AggregatingSigner::new(
            ContainerProvider::new(),
            vec![],
            Arc::new(RecordingSigner::new("pe", &[], log.clone())),
        );

        let options = SigningOptions::builder().recurse_containers(false).build()?;
        signer.sign(&[zip_path.clone()], &options).await?;

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(std::fs::read(&zip_path)?, before);

        Ok(())
    }

    #[tokio::test]
    async fn empty_archive_is_not_resaved() -> Result<()> {
        let td = tempfile::tempdir()?;

        let zip_path = td.path().join("empty.zip");
        write_zip(&zip_path, &[]);
        let before = file_inode(&zip_path);

        let log = new_signing_log();
        let signer = AggregatingSigner::new(
            ContainerProvider::new(),
            vec![],
            Arc::new(RecordingSigner::new("pe", &[], log.clone())),
        );

        let options = SigningOptions::builder().build()?;
        signer.sign(&[zip_path.clone()], &options).await?;

        assert!(log.lock().unwrap().is_empty());
        if cfg!(unix) {
            assert_eq!(file_inode(&zip_path), before);
        }

        Ok(())
    }

    #[tokio::test]
    async fn empty_package_is_resaved_and_dispatched() -> Result<()> {
        let td = tempfile::tempdir()?;

        let appx_path = td.path().join("empty.appx");
        write_zip(&appx_path, &[]);
        let before = file_inode(&appx_path);

        let log = new_signing_log();
        let signer = AggregatingSigner::new(
            ContainerProvider::new(),
            vec![Arc::new(RecordingSigner::new(
                "appx",
                &["appx", "msix"],
                log.clone(),
            ))],
            Arc::new(RecordingSigner::new("pe", &[], log.clone())),
        );

        let options = SigningOptions::builder().build()?;
        signer.sign(&[appx_path.clone()], &options).await?;

        assert_eq!(log.lock().unwrap().as_slice(), ["empty.appx"]);
        if cfg!(unix) {
            assert_ne!(file_inode(&appx_path), before);
        }

        Ok(())
    }

    #[tokio::test]
    async fn empty_bundle_is_not_resaved() -> Result<()> {
        let td = tempfile::tempdir()?;

        let bundle_path = td.path().join("empty.appxbundle");
        write_zip(&bundle_path, &[]);
        let before = file_inode(&bundle_path);

        let log = new_signing_log();
        let signer = AggregatingSigner::new(
            ContainerProvider::new(),
            vec![Arc::new(RecordingSigner::new(
                "bundle",
                &["appxbundle", "msixbundle"],
                log.clone(),
            ))],
            Arc::new(RecordingSigner::new("pe", &[], log.clone())),
        );

        let options = SigningOptions::builder().build()?;
        signer.sign(&[bundle_path.clone()], &options).await?;

        assert_eq!(log.lock().unwrap().as_slice(), ["empty.appxbundle"]);
        if cfg!(unix) {
            assert_eq!(file_inode(&bundle_path), before);
        }

        Ok(())
    }

    #[tokio::test]
    async fn resigning_preserves_the_container_file_set() -> Result<()> {
        let td = tempfile::tempdir()?;

        let pe = pe_image_bytes();
        let zip_path = td.path().join("payload.zip");
        write_zip(
            &zip_path,
            &[("a.dll", pe.as_slice()), ("doc/readme.txt", b"text")],
        );

        let log = new_signing_log();
        let signer = AggregatingSigner::new(
            ContainerProvider::new(),
            vec![],
            Arc::new(RecordingSigner::new("pe", &[], log.clone())),
        );

        let options = SigningOptions::builder().build()?;
        signer.sign(&[zip_path.clone()], &options).await?;
        let after_first = entry_names(&zip_path);

        signer.sign(&[zip_path.clone()], &options).await?;
        let after_second = entry_names(&zip_path);

        assert_eq!(after_first, vec!["a.dll", "doc/readme.txt"]);
        assert_eq!(after_first, after_second);

        Ok(())
    }

    #[tokio::test]
    async fn leaf_failure_inside_container_skips_save() -> Result<()> {
        let td = tempfile::tempdir()?;

        let pe = pe_image_bytes();
        let zip_path = td.path().join("payload.zip");
        write_zip(&zip_path, &[("a.dll", pe.as_slice())]);
        let before = std::fs::read(&zip_path)?;

        let log = new_signing_log();
        let signer = AggregatingSigner::new(
            ContainerProvider::new(),
            vec![],
            Arc::new(RecordingSigner::failing("pe", &[], log.clone())),
        );

        let options = SigningOptions::builder().build()?;

        assert!(matches!(
            signer.sign(&[zip_path.clone()], &options).await,
            Err(SigningError::Signing(_))
        ));
        assert_eq!(std::fs::read(&zip_path)?, before);

        Ok(())
    }

    #[tokio::test]
    async fn malformed_container_surfaces_an_open_error() -> Result<()> {
        let td = tempfile::tempdir()?;

        let zip_path = td.path().join("broken.zip");
        std::fs::write(&zip_path, b"not a zip")?;

        let log = new_signing_log();
        let signer = AggregatingSigner::new(
            ContainerProvider::new(),
            vec![],
            Arc::new(RecordingSigner::new("pe", &[], log.clone())),
        );

        let options = SigningOptions::builder().build()?;

        assert!(matches!(
            signer.sign(&[zip_path], &options).await,
            Err(SigningError::Container(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn can_sign_covers_leaf_claims_and_zip_archives() -> Result<()> {
        let log = new_signing_log();
        let signer = AggregatingSigner::new(
            ContainerProvider::new(),
            vec![Arc::new(RecordingSigner::new(
                "appx",
                &["appx", "msix"],
                log.clone(),
            ))],
            Arc::new(RecordingSigner::new("pe", &[], log)),
        );

        assert!(signer.can_sign(Path::new("a.zip")));
        assert!(signer.can_sign(Path::new("a.APPXUPLOAD")));
        assert!(signer.can_sign(Path::new("a.msixupload")));
        assert!(signer.can_sign(Path::new("a.appx")));
        assert!(!signer.can_sign(Path::new("a.exe")));
        assert!(!signer.can_sign(Path::new("a.nupkg")));
        // Turkish dotted I must not fold into a recognized extension.
        assert!(!signer.can_sign(Path::new("a.zİp")));

        Ok(())
    }

    #[tokio::test]
    async fn copy_signing_dependencies_delegates_to_claiming_signers() -> Result<()> {
        let td = tempfile::tempdir()?;

        let log = new_signing_log();
        let signer = AggregatingSigner::new(
            ContainerProvider::new(),
            vec![
                Arc::new(RecordingSigner::new("appx", &["appx"], log.clone())),
                Arc::new(RecordingSigner::new("vsix", &["vsix"], log.clone())),
            ],
            Arc::new(RecordingSigner::new("pe", &[], log.clone())),
        );

        let options = SigningOptions::builder().build()?;
        signer
            .copy_signing_dependencies(Path::new("thing.appx"), td.path(), &options)
            .await?;

        assert_eq!(log.lock().unwrap().as_slice(), ["copy:thing.appx"]);

        Ok(())
    }

    #[tokio::test]
    async fn nested_package_content_is_repacked_after_signing() -> Result<()> {
        let td = tempfile::tempdir()?;

        let pe = pe_image_bytes();
        let inner = zip_bytes(&[("lib/tool.dll", pe.as_slice())]);
        let zip_path = td.path().join("outer.zip");
        write_zip(&zip_path, &[("inner.nupkg", inner.as_slice())]);

        let log = new_signing_log();
        let signer = AggregatingSigner::new(
            ContainerProvider::new(),
            vec![Arc::new(RecordingSigner::new("nupkg", &["nupkg"], log.clone()))],
            Arc::new(RecordingSigner::new("pe", &[], log.clone())),
        );

        let options = SigningOptions::builder().build()?;
        signer.sign(&[zip_path.clone()], &options).await?;

        assert_eq!(log.lock().unwrap().as_slice(), ["tool.dll", "inner.nupkg"]);

        // The outer archive still holds the nested package.
        assert_eq!(entry_names(&zip_path), vec!["inner.nupkg"]);

        let fh = std::fs::File::open(&zip_path)?;
        let mut archive = zip::ZipArchive::new(fh).unwrap();
        let mut entry = archive.by_name("inner.nupkg").unwrap();
        let mut data = vec![];
        entry.read_to_end(&mut data)?;
        let mut inner_archive = zip::ZipArchive::new(std::io::Cursor::new(data)).unwrap();
        assert!(inner_archive.by_name("lib/tool.dll").is_ok());

        Ok(())
    }
}
