// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Container kind classification.

Containers are recognized by file extension alone. Extension comparison
uses an invariant ASCII case fold (only `A-Z` map to `a-z`) so that
locale-sensitive foldings like the Turkish dotted/dotless I never
influence classification.
*/

use std::path::Path;

/// Extensions of generic zip archives, including upload archives.
pub const ZIP_EXTENSIONS: &[&str] = &["zip", "appxupload", "msixupload"];

/// Extensions of plugin packages that use the NuGet packaging conventions.
pub const NUGET_EXTENSIONS: &[&str] = &["nupkg", "vsix"];

/// Extensions of application packages.
pub const APPX_EXTENSIONS: &[&str] = &["appx", "msix"];

/// Extensions of application package bundles.
pub const APPX_BUNDLE_EXTENSIONS: &[&str] = &["appxbundle", "msixbundle"];

/// Obtain a path's extension folded with invariant ASCII casing.
///
/// Returns `None` when the path has no extension or the extension is not
/// valid UTF-8. Only `A-Z` are folded; all other characters pass through
/// unchanged, so `.applİcation` does not become `.application`.
pub fn invariant_extension(path: impl AsRef<Path>) -> Option<String> {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// The family of container a file belongs to.
///
/// The family determines how a container participates in recursive
/// signing: which dispatch pass handles it and whether a re-pack strips
/// a prior package signature.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContainerKind {
    /// A generic zip archive (`.zip`, `.appxupload`, `.msixupload`).
    Zip,
    /// A NuGet-convention plugin package (`.nupkg`, `.vsix`).
    NuGet,
    /// An application package (`.appx`, `.msix`).
    Appx,
    /// An application package bundle (`.appxbundle`, `.msixbundle`).
    AppxBundle,
}

impl ContainerKind {
    /// Attempt to classify a path as a container.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = invariant_extension(path)?;
        let ext = ext.as_str();

        if ZIP_EXTENSIONS.contains(&ext) {
            Some(Self::Zip)
        } else if NUGET_EXTENSIONS.contains(&ext) {
            Some(Self::NuGet)
        } else if APPX_EXTENSIONS.contains(&ext) {
            Some(Self::Appx)
        } else if APPX_BUNDLE_EXTENSIONS.contains(&ext) {
            Some(Self::AppxBundle)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_recognized_extensions() {
        assert_eq!(ContainerKind::from_path("a.zip"), Some(ContainerKind::Zip));
        assert_eq!(
            ContainerKind::from_path("a.appxupload"),
            Some(ContainerKind::Zip)
        );
        assert_eq!(
            ContainerKind::from_path("a.msixupload"),
            Some(ContainerKind::Zip)
        );
        assert_eq!(
            ContainerKind::from_path("a.nupkg"),
            Some(ContainerKind::NuGet)
        );
        assert_eq!(
            ContainerKind::from_path("a.vsix"),
            Some(ContainerKind::NuGet)
        );
        assert_eq!(ContainerKind::from_path("a.appx"), Some(ContainerKind::Appx));
        assert_eq!(ContainerKind::from_path("a.msix"), Some(ContainerKind::Appx));
        assert_eq!(
            ContainerKind::from_path("a.appxbundle"),
            Some(ContainerKind::AppxBundle)
        );
        assert_eq!(
            ContainerKind::from_path("a.msixbundle"),
            Some(ContainerKind::AppxBundle)
        );
        assert_eq!(ContainerKind::from_path("a.exe"), None);
        assert_eq!(ContainerKind::from_path("zip"), None);
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(ContainerKind::from_path("a.ZIP"), Some(ContainerKind::Zip));
        assert_eq!(
            ContainerKind::from_path("a.MsixBundle"),
            Some(ContainerKind::AppxBundle)
        );
        assert_eq!(
            ContainerKind::from_path("a.NuPkg"),
            Some(ContainerKind::NuGet)
        );
    }

    #[test]
    fn turkish_dotted_i_does_not_fold() {
        // U+0130 LATIN CAPITAL LETTER I WITH DOT ABOVE must not fold to `i`.
        assert_eq!(ContainerKind::from_path("a.zİp"), None);
        assert_eq!(ContainerKind::from_path("a.vsİx"), None);
        // U+0131 LATIN SMALL LETTER DOTLESS I must not match either.
        assert_eq!(ContainerKind::from_path("a.msıx"), None);
    }

    #[test]
    fn invariant_extension_folds_ascii_only() {
        assert_eq!(invariant_extension("A.TXT"), Some("txt".to_string()));
        assert_eq!(
            invariant_extension("a.applİcation"),
            Some("applİcation".to_string())
        );
        assert_eq!(invariant_extension("noext"), None);
    }
}
