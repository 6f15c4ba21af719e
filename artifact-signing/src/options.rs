// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Signing options. */

use {
    crate::error::{Result, SigningError},
    artifact_containers::{split_patterns, FileMatcher},
    url::Url,
};

/// Supported file and timestamp hash algorithms.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// The lowercase token used in manifest utility arguments.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::Sha256
    }
}

/// Immutable options controlling a signing operation.
///
/// Construct instances with [SigningOptions::builder].
#[derive(Clone, Debug)]
pub struct SigningOptions {
    application_name: Option<String>,
    publisher_name: Option<String>,
    description: Option<String>,
    description_url: Option<Url>,
    file_hash_algorithm: HashAlgorithm,
    timestamp_hash_algorithm: HashAlgorithm,
    timestamp_service_url: Option<Url>,
    matcher: Option<FileMatcher>,
    anti_matcher: Option<FileMatcher>,
    recurse_containers: bool,
}

impl SigningOptions {
    pub fn builder() -> SigningOptionsBuilder {
        SigningOptionsBuilder::default()
    }

    /// Application name embedded into manifests.
    pub fn application_name(&self) -> Option<&str> {
        self.application_name.as_deref()
    }

    /// Publisher name. When absent, the certificate subject is used.
    pub fn publisher_name(&self) -> Option<&str> {
        self.publisher_name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Publisher support URL embedded into deployment manifests.
    pub fn description_url(&self) -> Option<&Url> {
        self.description_url.as_ref()
    }

    pub fn file_hash_algorithm(&self) -> HashAlgorithm {
        self.file_hash_algorithm
    }

    pub fn timestamp_hash_algorithm(&self) -> HashAlgorithm {
        self.timestamp_hash_algorithm
    }

    /// URL of the trusted timestamp authority leaf signers should use.
    pub fn timestamp_service_url(&self) -> Option<&Url> {
        self.timestamp_service_url.as_ref()
    }

    /// Include patterns applied to files inside containers.
    pub fn matcher(&self) -> Option<&FileMatcher> {
        self.matcher.as_ref()
    }

    /// Exclude patterns applied to files inside containers.
    pub fn anti_matcher(&self) -> Option<&FileMatcher> {
        self.anti_matcher.as_ref()
    }

    /// Whether containers are opened and their contents signed. When
    /// false, containers are treated as opaque leaves.
    pub fn recurse_containers(&self) -> bool {
        self.recurse_containers
    }
}

/// Builder for [SigningOptions].
#[derive(Clone, Debug)]
pub struct SigningOptionsBuilder {
    application_name: Option<String>,
    publisher_name: Option<String>,
    description: Option<String>,
    description_url: Option<Url>,
    file_hash_algorithm: HashAlgorithm,
    timestamp_hash_algorithm: HashAlgorithm,
    timestamp_service_url: Option<Url>,
    matcher: Option<FileMatcher>,
    anti_matcher: Option<FileMatcher>,
    recurse_containers: bool,
}

impl Default for SigningOptionsBuilder {
    fn default() -> Self {
        Self {
            application_name: None,
            publisher_name: None,
            description: None,
            description_url: None,
            file_hash_algorithm: HashAlgorithm::default(),
            timestamp_hash_algorithm: HashAlgorithm::default(),
            timestamp_service_url: None,
            matcher: None,
            anti_matcher: None,
            recurse_containers: true,
        }
    }
}

impl SigningOptionsBuilder {
    pub fn application_name(mut self, value: impl ToString) -> Self {
        self.application_name = Some(value.to_string());
        self
    }

    pub fn publisher_name(mut self, value: impl ToString) -> Self {
        self.publisher_name = Some(value.to_string());
        self
    }

    pub fn description(mut self, value: impl ToString) -> Self {
        self.description = Some(value.to_string());
        self
    }

    pub fn description_url(mut self, value: Url) -> Self {
        self.description_url = Some(value);
        self
    }

    pub fn file_hash_algorithm(mut self, value: HashAlgorithm) -> Self {
        self.file_hash_algorithm = value;
        self
    }

    pub fn timestamp_hash_algorithm(mut self, value: HashAlgorithm) -> Self {
        self.timestamp_hash_algorithm = value;
        self
    }

    pub fn timestamp_service_url(mut self, value: Url) -> Self {
        self.timestamp_service_url = Some(value);
        self
    }

    pub fn matcher(mut self, value: FileMatcher) -> Self {
        self.matcher = Some(value);
        self
    }

    pub fn anti_matcher(mut self, value: FileMatcher) -> Self {
        self.anti_matcher = Some(value);
        self
    }

    /// Install matchers from a raw pattern list, where a leading `!`
    /// routes a pattern into the anti-matcher.
    pub fn file_patterns<'a>(
        mut self,
        patterns: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        let (includes, excludes) = split_patterns(patterns);

        if !includes.is_empty() {
            self.matcher = Some(FileMatcher::new(&includes).map_err(SigningError::Container)?);
        }
        if !excludes.is_empty() {
            self.anti_matcher = Some(FileMatcher::new(&excludes).map_err(SigningError::Container)?);
        }

        Ok(self)
    }

    pub fn recurse_containers(mut self, value: bool) -> Self {
        self.recurse_containers = value;
        self
    }

    pub fn build(self) -> Result<SigningOptions> {
        if matches!(&self.application_name, Some(v) if v.is_empty()) {
            return Err(SigningError::InputValidation("applicationName"));
        }
        if matches!(&self.description, Some(v) if v.is_empty()) {
            return Err(SigningError::InputValidation("description"));
        }

        Ok(SigningOptions {
            application_name: self.application_name,
            publisher_name: self.publisher_name,
            description: self.description,
            description_url: self.description_url,
            file_hash_algorithm: self.file_hash_algorithm,
            timestamp_hash_algorithm: self.timestamp_hash_algorithm,
            timestamp_service_url: self.timestamp_service_url,
            matcher: self.matcher,
            anti_matcher: self.anti_matcher,
            recurse_containers: self.recurse_containers,
        })
    }
}
