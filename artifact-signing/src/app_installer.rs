// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! App installer service manifests.

`.appinstaller` files are XML documents describing how an installer
service acquires an application package or bundle. Recognition is by
XML namespace; documents in an unknown namespace yield a no-match and
are left untouched. After the referenced packages are re-signed, the
main element's `Publisher` must agree with the signing certificate
subject, so signing rewrites that attribute.
*/

use {
    crate::{
        cryptography::{publisher_from_certificate, CertificateProvider},
        error::{Result, SigningError},
        options::SigningOptions,
        signer::DataFormatSigner,
    },
    artifact_containers::invariant_extension,
    async_trait::async_trait,
    log::{info, warn},
    std::{
        borrow::Cow,
        io::{BufReader, Cursor},
        path::{Path, PathBuf},
        sync::Arc,
    },
    xml::{
        attribute::OwnedAttribute,
        name::OwnedName,
        reader::{EventReader, XmlEvent},
        EmitterConfig,
    },
};

/// Namespaces of recognized app installer manifests.
pub const APP_INSTALLER_NAMESPACES: &[&str] = &[
    "http://schemas.microsoft.com/appx/appinstaller/2017",
    "http://schemas.microsoft.com/appx/appinstaller/2017/2",
    "http://schemas.microsoft.com/appx/appinstaller/2018",
    "http://schemas.microsoft.com/appx/appinstaller/2021",
];

/// The artifact an app installer manifest points at.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MainElement {
    MainBundle,
    MainPackage,
}

impl MainElement {
    fn from_local_name(name: &str) -> Option<Self> {
        match name {
            "MainBundle" => Some(Self::MainBundle),
            "MainPackage" => Some(Self::MainPackage),
            _ => None,
        }
    }
}

/// Parsed identity of an app installer manifest.
#[derive(Clone, Debug)]
pub struct AppInstallerManifest {
    pub namespace: String,
    pub main_element: MainElement,
    pub publisher: Option<String>,
}

/// Attempt to classify a file as an app installer manifest.
///
/// Returns `None` for documents whose root element is not in a
/// recognized namespace or that lack a main element.
pub fn classify_app_installer(path: impl AsRef<Path>) -> Result<Option<AppInstallerManifest>> {
    let fh = std::fs::File::open(path.as_ref())?;
    let reader = EventReader::new(BufReader::new(fh));

    let mut namespace = None;
    let mut main = None;

    for event in reader {
        if let XmlEvent::StartElement {
            name, attributes, ..
        } = event?
        {
            if namespace.is_none() {
                match name.namespace.as_deref() {
                    Some(ns) if APP_INSTALLER_NAMESPACES.contains(&ns) => {
                        namespace = Some(ns.to_string());
                    }
                    _ => return Ok(None),
                }
            } else if main.is_none() {
                if let Some(element) = MainElement::from_local_name(&name.local_name) {
                    let publisher = attributes
                        .iter()
                        .find(|a| a.name.local_name == "Publisher")
                        .map(|a| a.value.clone());

                    main = Some((element, publisher));
                }
            }
        }
    }

    Ok(match (namespace, main) {
        (Some(namespace), Some((main_element, publisher))) => Some(AppInstallerManifest {
            namespace,
            main_element,
            publisher,
        }),
        _ => None,
    })
}

/// Leaf signer for app installer manifests.
pub struct AppInstallerSigner {
    certificates: Arc<dyn CertificateProvider>,
}

impl AppInstallerSigner {
    pub fn new(certificates: Arc<dyn CertificateProvider>) -> Self {
        Self { certificates }
    }
}

#[async_trait]
impl DataFormatSigner for AppInstallerSigner {
    fn can_sign(&self, path: &Path) -> bool {
        invariant_extension(path).as_deref() == Some("appinstaller")
    }

    async fn sign(&self, paths: &[PathBuf], _options: &SigningOptions) -> Result<()> {
        let certificate = self.certificates.signing_certificate().await?;
        let publisher = publisher_from_certificate(&certificate)?;

        for path in paths {
            match classify_app_installer(path)? {
                Some(manifest) => {
                    info!(
                        "updating publisher in {} ({:?})",
                        path.display(),
                        manifest.main_element
                    );
                    rewrite_publisher(path, &publisher)?;
                }
                None => {
                    warn!(
                        "{} is not in a recognized app installer namespace; leaving untouched",
                        path.display()
                    );
                }
            }
        }

        Ok(())
    }
}

fn rewrite_publisher(path: &Path, publisher: &str) -> Result<()> {
    let input = std::fs::read(path)?;

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let tmp = tempfile::Builder::new()
        .prefix(".appinstaller-")
        .tempfile_in(parent)?;

    {
        let reader = EventReader::new(Cursor::new(&input));
        let mut emitter = EmitterConfig::new()
            .perform_indent(true)
            .create_writer(tmp.as_file());

        for event in reader {
            let event = event?;

            match &event {
                XmlEvent::EndDocument => break,
                XmlEvent::Whitespace(_) => {}
                XmlEvent::StartElement {
                    name,
                    attributes,
                    namespace,
                } if MainElement::from_local_name(&name.local_name).is_some() => {
                    let mut attributes = attributes
                        .iter()
                        .filter(|a| a.name.local_name != "Publisher")
                        .cloned()
                        .collect::<Vec<_>>();
                    attributes.push(OwnedAttribute::new(
                        OwnedName::local("Publisher"),
                        publisher,
                    ));

                    emitter.write(xml::writer::XmlEvent::StartElement {
                        name: name.borrow(),
                        attributes: Cow::Owned(
                            attributes.iter().map(OwnedAttribute::borrow).collect(),
                        ),
                        namespace: Cow::Borrowed(namespace),
                    })?;
                }
                event => {
                    if let Some(writer_event) = event.as_writer_event() {
                        emitter.write(writer_event)?;
                    }
                }
            }
        }
    }

    tmp.persist(path).map_err(|e| SigningError::Io(e.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            cryptography::MemoryCertificateProvider,
            testutil::test_certificate,
        },
    };

    fn manifest_xml(namespace: &str, element: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<AppInstaller xmlns="{}" Uri="https://example.test/MyApp.appinstaller" Version="1.0.0.0">
  <{} Name="MyApp" Version="1.0.0.0" Publisher="CN=Old Publisher" Uri="https://example.test/MyApp.msixbundle"/>
</AppInstaller>
"#,
            namespace, element
        )
    }

    #[test]
    fn recognized_namespaces_classify() -> Result<()> {
        let td = tempfile::tempdir()?;

        for namespace in APP_INSTALLER_NAMESPACES {
            let path = td.path().join("MyApp.appinstaller");
            std::fs::write(&path, manifest_xml(namespace, "MainBundle"))?;

            let manifest = classify_app_installer(&path)?.expect("should classify");
            assert_eq!(manifest.namespace, *namespace);
            assert_eq!(manifest.main_element, MainElement::MainBundle);
            assert_eq!(manifest.publisher.as_deref(), Some("CN=Old Publisher"));
        }

        Ok(())
    }

    #[test]
    fn main_package_element_is_recognized() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("MyApp.appinstaller");
        std::fs::write(
            &path,
            manifest_xml(APP_INSTALLER_NAMESPACES[0], "MainPackage"),
        )?;

        let manifest = classify_app_installer(&path)?.expect("should classify");
        assert_eq!(manifest.main_element, MainElement::MainPackage);

        Ok(())
    }

    #[test]
    fn unknown_namespace_is_a_no_match() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("MyApp.appinstaller");
        std::fs::write(
            &path,
            manifest_xml("http://schemas.example.test/other/2022", "MainBundle"),
        )?;

        assert!(classify_app_installer(&path)?.is_none());

        Ok(())
    }

    #[test]
    fn missing_main_element_is_a_no_match() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("MyApp.appinstaller");
        std::fs::write(
            &path,
            format!(
                r#"<AppInstaller xmlns="{}" Version="1.0.0.0"></AppInstaller>"#,
                APP_INSTALLER_NAMESPACES[0]
            ),
        )?;

        assert!(classify_app_installer(&path)?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn signing_rewrites_the_publisher_attribute() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("MyApp.appinstaller");
        std::fs::write(
            &path,
            manifest_xml(APP_INSTALLER_NAMESPACES[0], "MainBundle"),
        )?;

        let signer = AppInstallerSigner::new(Arc::new(MemoryCertificateProvider::new(
            test_certificate(),
        )));

        let options = SigningOptions::builder().build()?;
        signer.sign(&[path.clone()], &options).await?;

        let manifest = classify_app_installer(&path)?.expect("should still classify");
        assert_eq!(
            manifest.publisher.as_deref(),
            Some("CN=Example Signing,O=Example Corp,C=US")
        );

        Ok(())
    }

    #[tokio::test]
    async fn unknown_namespace_is_left_untouched() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("MyApp.appinstaller");
        let content = manifest_xml("http://schemas.example.test/other/2022", "MainBundle");
        std::fs::write(&path, &content)?;

        let signer = AppInstallerSigner::new(Arc::new(MemoryCertificateProvider::new(
            test_certificate(),
        )));

        let options = SigningOptions::builder().build()?;
        signer.sign(&[path.clone()], &options).await?;

        assert_eq!(std::fs::read_to_string(&path)?, content);

        Ok(())
    }

    #[test]
    fn can_sign_is_extension_driven() {
        let signer = AppInstallerSigner::new(Arc::new(MemoryCertificateProvider::new(
            test_certificate(),
        )));

        assert!(signer.can_sign(Path::new("MyApp.appinstaller")));
        assert!(signer.can_sign(Path::new("MyApp.AppInstaller")));
        assert!(!signer.can_sign(Path::new("MyApp.appx")));
        assert!(!signer.can_sign(Path::new("MyApp.appİnstaller")));
    }
}
