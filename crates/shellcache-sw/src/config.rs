//! Compiled-in policy configuration.
//!
//! Everything here is fixed at deploy time. Bumping [`VERSION`] renames both
//! buckets, so the next activation deletes every entry cached by the previous
//! release.

use url::Url;

use crate::{Result, ServiceWorkerError};

/// Version tag baked into every bucket name.
pub const VERSION: &str = "v2";

/// Bucket name prefix for the application shell.
pub const SHELL_CACHE_PREFIX: &str = "watchlist-shell-";

/// Bucket name prefix for remote poster images.
pub const IMAGE_CACHE_PREFIX: &str = "watchlist-images-";

/// Registration scope used when the host does not provide one.
pub const DEFAULT_SCOPE: &str = "http://localhost/";

/// Assets pre-cached at install time, relative to the scope.
pub const ASSET_MANIFEST: &[&str] = &["./", "./index.html"];

/// The document served for every navigation, relative to the scope.
pub const SHELL_DOCUMENT: &str = "./index.html";

/// Third-party host serving poster images.
pub const IMAGE_HOST: &str = "image.tmdb.org";

/// Ceiling on the number of entries kept in the image bucket.
pub const IMAGE_CACHE_MAX_ENTRIES: usize = 300;

/// Optional behaviours. Turning them off reproduces the earlier
/// single-bucket worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyFeatures {
    /// Cache images from [`IMAGE_HOST`] in their own trimmed bucket.
    pub remote_images: bool,
    /// Enable navigation preload on activation and consume preload responses.
    pub navigation_preload: bool,
}

impl Default for PolicyFeatures {
    fn default() -> Self {
        Self {
            remote_images: true,
            navigation_preload: true,
        }
    }
}

impl PolicyFeatures {
    /// The earlier worker: one bucket, no image handling, no preload.
    pub fn legacy() -> Self {
        Self {
            remote_images: false,
            navigation_preload: false,
        }
    }
}

/// Policy configuration.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Registration scope; its path is the scope prefix.
    pub scope: Url,
    pub version: String,
    pub shell_cache_prefix: String,
    pub image_cache_prefix: String,
    /// Scope-relative paths pre-cached at install.
    pub asset_manifest: Vec<String>,
    /// Scope-relative path of the shell document.
    pub shell_document: String,
    pub image_host: String,
    pub image_cache_max_entries: usize,
    pub features: PolicyFeatures,
}

impl PolicyConfig {
    /// Create the compiled-in configuration for a registration scope.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            version: VERSION.to_string(),
            shell_cache_prefix: SHELL_CACHE_PREFIX.to_string(),
            image_cache_prefix: IMAGE_CACHE_PREFIX.to_string(),
            asset_manifest: ASSET_MANIFEST.iter().map(|s| s.to_string()).collect(),
            shell_document: SHELL_DOCUMENT.to_string(),
            image_host: IMAGE_HOST.to_string(),
            image_cache_max_entries: IMAGE_CACHE_MAX_ENTRIES,
            features: PolicyFeatures::default(),
        }
    }

    /// Parse a scope URL and create the configuration for it.
    pub fn for_scope(scope: &str) -> Result<Self> {
        let scope = Url::parse(scope)
            .map_err(|e| ServiceWorkerError::InvalidConfig(format!("scope {scope:?}: {e}")))?;
        Ok(Self::new(scope))
    }

    /// Configuration for [`DEFAULT_SCOPE`].
    pub fn default_scope() -> Result<Self> {
        Self::for_scope(DEFAULT_SCOPE)
    }

    pub fn with_scope(mut self, scope: Url) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_features(mut self, features: PolicyFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn with_asset_manifest<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.asset_manifest = assets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_image_host(mut self, host: impl Into<String>) -> Self {
        self.image_host = host.into();
        self
    }

    pub fn with_image_cache_max_entries(mut self, max_entries: usize) -> Self {
        self.image_cache_max_entries = max_entries;
        self
    }

    /// Name of the application shell bucket for this version.
    pub fn shell_cache_name(&self) -> String {
        format!("{}{}", self.shell_cache_prefix, self.version)
    }

    /// Name of the remote image bucket for this version.
    pub fn image_cache_name(&self) -> String {
        format!("{}{}", self.image_cache_prefix, self.version)
    }

    /// Buckets that survive activation.
    pub fn retained_caches(&self) -> Vec<String> {
        let mut names = vec![self.shell_cache_name()];
        if self.features.remote_images {
            names.push(self.image_cache_name());
        }
        names
    }

    /// Path prefix under which the policy caches same-origin requests.
    pub fn scope_prefix(&self) -> &str {
        self.scope.path()
    }

    /// Whether a URL is same-origin with the scope and under its path.
    pub fn is_in_scope(&self, url: &Url) -> bool {
        url.origin() == self.scope.origin() && url.path().starts_with(self.scope_prefix())
    }

    /// Resolve a scope-relative path.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.scope
            .join(path)
            .map_err(|e| ServiceWorkerError::InvalidConfig(format!("asset {path:?}: {e}")))
    }

    /// Absolute URLs of the asset manifest, in manifest order.
    pub fn manifest_urls(&self) -> Result<Vec<Url>> {
        self.asset_manifest.iter().map(|p| self.resolve(p)).collect()
    }

    /// Absolute URL of the shell document.
    pub fn shell_document_url(&self) -> Result<Url> {
        self.resolve(&self.shell_document)
    }

    /// Check the configuration for values that would break the policy.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ServiceWorkerError::InvalidConfig(msg));

        if self.scope.cannot_be_a_base() || !self.scope_prefix().ends_with('/') {
            return invalid(format!("scope {} must be a directory URL", self.scope));
        }
        if self.version.is_empty() {
            return invalid("version tag is empty".to_string());
        }
        if self.shell_cache_name() == self.image_cache_name() {
            return invalid(format!(
                "shell and image buckets share the name {}",
                self.shell_cache_name()
            ));
        }
        if self.features.remote_images {
            if self.image_host.is_empty() {
                return invalid("image host is empty".to_string());
            }
            if self.image_cache_max_entries == 0 {
                return invalid("image cache ceiling must be positive".to_string());
            }
        }

        let shell = self.shell_document_url()?;
        if !self.is_in_scope(&shell) {
            return invalid(format!("shell document {shell} is outside the scope"));
        }
        for url in self.manifest_urls()? {
            if !self.is_in_scope(&url) {
                return invalid(format!("manifest asset {url} is outside the scope"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PolicyConfig {
        PolicyConfig::for_scope("https://watchlist.example/app/").unwrap()
    }

    #[test]
    fn test_bucket_names_carry_version() {
        let config = config();
        assert_eq!(config.shell_cache_name(), "watchlist-shell-v2");
        assert_eq!(config.image_cache_name(), "watchlist-images-v2");

        let bumped = config.with_version("v3");
        assert_eq!(bumped.shell_cache_name(), "watchlist-shell-v3");
    }

    #[test]
    fn test_retained_caches() {
        let config = config();
        assert_eq!(
            config.retained_caches(),
            vec!["watchlist-shell-v2", "watchlist-images-v2"]
        );

        let legacy = config.with_features(PolicyFeatures::legacy());
        assert_eq!(legacy.retained_caches(), vec!["watchlist-shell-v2"]);
    }

    #[test]
    fn test_manifest_resolves_against_scope() {
        let urls = config().manifest_urls().unwrap();
        let urls: Vec<&str> = urls.iter().map(Url::as_str).collect();
        assert_eq!(
            urls,
            vec![
                "https://watchlist.example/app/",
                "https://watchlist.example/app/index.html",
            ]
        );
    }

    #[test]
    fn test_scope_membership() {
        let config = config();
        let inside = Url::parse("https://watchlist.example/app/js/main.js").unwrap();
        let outside_path = Url::parse("https://watchlist.example/other.js").unwrap();
        let other_origin = Url::parse("https://cdn.example/app/main.js").unwrap();
        let other_scheme = Url::parse("http://watchlist.example/app/main.js").unwrap();

        assert!(config.is_in_scope(&inside));
        assert!(!config.is_in_scope(&outside_path));
        assert!(!config.is_in_scope(&other_origin));
        assert!(!config.is_in_scope(&other_scheme));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(PolicyConfig::default_scope().unwrap().validate().is_ok());
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_file_scope() {
        let config = PolicyConfig::for_scope("https://watchlist.example/app").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ServiceWorkerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_ceiling() {
        let config = config().with_image_cache_max_entries(0);
        assert!(config.validate().is_err());

        // Irrelevant once image caching is off.
        let legacy = config.with_features(PolicyFeatures::legacy());
        assert!(legacy.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_asset_outside_scope() {
        let config = config().with_asset_manifest(["./", "../escape.js"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_colliding_buckets() {
        let mut config = config();
        config.image_cache_prefix = config.shell_cache_prefix.clone();
        assert!(config.validate().is_err());
    }
}
