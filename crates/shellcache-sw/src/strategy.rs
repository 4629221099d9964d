//! Request classification.

use shellcache_net::Request;

use crate::config::PolicyConfig;

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Not a GET: left to the host untouched.
    Bypass,
    /// Poster image: cache-first in the image bucket, trimmed, placeholder on failure.
    RemoteImage,
    /// Page load: shell document, preload, network, shell fallback.
    Navigation,
    /// Same-origin asset under the scope: cache-first, store on 200.
    InScope,
    /// Anything else: network only, never cached.
    Network,
}

impl Strategy {
    /// Whether this strategy ever reads or writes a bucket.
    pub fn uses_cache(self) -> bool {
        matches!(
            self,
            Strategy::RemoteImage | Strategy::Navigation | Strategy::InScope
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Bypass => "bypass",
            Strategy::RemoteImage => "remote_image",
            Strategy::Navigation => "navigation",
            Strategy::InScope => "in_scope",
            Strategy::Network => "network",
        }
    }
}

/// Classify a request. The first matching rule wins.
pub fn classify(config: &PolicyConfig, request: &Request) -> Strategy {
    if !request.is_get() {
        return Strategy::Bypass;
    }
    if config.features.remote_images && request.url.host_str() == Some(config.image_host.as_str())
    {
        return Strategy::RemoteImage;
    }
    if request.is_navigation() {
        return Strategy::Navigation;
    }
    if config.is_in_scope(&request.url) {
        return Strategy::InScope;
    }
    Strategy::Network
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyFeatures;
    use http::Method;
    use url::Url;

    fn config() -> PolicyConfig {
        PolicyConfig::for_scope("https://watchlist.example/app/").unwrap()
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_non_get_bypasses() {
        let request = Request::new(Method::POST, url("https://watchlist.example/app/api"));
        assert_eq!(classify(&config(), &request), Strategy::Bypass);

        let head = Request::new(Method::HEAD, url("https://image.tmdb.org/t/p/w342/a.jpg"));
        assert_eq!(classify(&config(), &head), Strategy::Bypass);
    }

    #[test]
    fn test_image_host_wins_over_navigation() {
        let request = Request::navigate(url("https://image.tmdb.org/t/p/w342/a.jpg"));
        assert_eq!(classify(&config(), &request), Strategy::RemoteImage);
    }

    #[test]
    fn test_image_subdomain_is_not_image_host() {
        let request = Request::get(url("https://cdn.image.tmdb.org/a.jpg"));
        assert_eq!(classify(&config(), &request), Strategy::Network);
    }

    #[test]
    fn test_navigation_anywhere() {
        let inside = Request::navigate(url("https://watchlist.example/app/list?id=3"));
        let outside = Request::navigate(url("https://watchlist.example/elsewhere"));
        assert_eq!(classify(&config(), &inside), Strategy::Navigation);
        assert_eq!(classify(&config(), &outside), Strategy::Navigation);
    }

    #[test]
    fn test_in_scope_subresource() {
        let request = Request::get(url("https://watchlist.example/app/js/main.js"));
        assert_eq!(classify(&config(), &request), Strategy::InScope);
    }

    #[test]
    fn test_everything_else_is_network() {
        let api = Request::get(url("https://api.themoviedb.org/3/search/movie?q=x"));
        let sibling = Request::get(url("https://watchlist.example/other/main.js"));
        assert_eq!(classify(&config(), &api), Strategy::Network);
        assert_eq!(classify(&config(), &sibling), Strategy::Network);
        assert!(!Strategy::Network.uses_cache());
    }

    #[test]
    fn test_legacy_features_skip_image_bucket() {
        let config = config().with_features(PolicyFeatures::legacy());
        let request = Request::get(url("https://image.tmdb.org/t/p/w342/a.jpg"));
        assert_eq!(classify(&config, &request), Strategy::Network);
    }
}
