//! Content sources for the CLI: a local directory of pages or an HTTP API

use std::path::PathBuf;
use treemirror_core::{ContentFetcher, FetchError};

/// Reads `<dir>/<id>.md`
#[derive(Debug, Clone)]
pub struct DirFetcher {
    dir: PathBuf,
}

impl DirFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn page_path(&self, id: &str) -> Result<PathBuf, FetchError> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(FetchError::new(format!("refusing to map id '{}' to a file", id)));
        }
        Ok(self.dir.join(format!("{}.md", id)))
    }
}

impl ContentFetcher for DirFetcher {
    async fn fetch(&self, id: &str) -> Result<String, FetchError> {
        let path = self.page_path(id)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| FetchError::new(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(feature = "http")]
pub use http::HttpFetcher;

#[cfg(feature = "http")]
mod http {
    use reqwest::Url;
    use std::time::Duration;
    use treemirror_core::{ContentFetcher, FetchError};

    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// `GET {base}/items/{id}/content`, body returned as-is
    #[derive(Debug, Clone)]
    pub struct HttpFetcher {
        client: reqwest::Client,
        base: Url,
    }

    impl HttpFetcher {
        pub fn new(base_url: &str) -> Result<Self, FetchError> {
            let base = Url::parse(base_url)
                .map_err(|e| FetchError::new(format!("{}: {}", base_url, e)))?;
            if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
                return Err(FetchError::new(format!(
                    "{}: expected an http(s) base URL",
                    base_url
                )));
            }
            Ok(Self {
                client: reqwest::Client::new(),
                base,
            })
        }

        /// The id becomes a single percent-encoded path segment
        pub fn content_url(&self, id: &str) -> Result<Url, FetchError> {
            let mut url = self.base.clone();
            url.path_segments_mut()
                .map_err(|_| FetchError::new(format!("{}: not a base URL", self.base)))?
                .pop_if_empty()
                .extend(["items", id, "content"]);
            Ok(url)
        }
    }

    impl ContentFetcher for HttpFetcher {
        async fn fetch(&self, id: &str) -> Result<String, FetchError> {
            let response = self
                .client
                .get(self.content_url(id)?)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await
                .map_err(|e| FetchError::new(e.to_string()))?
                .error_for_status()
                .map_err(|e| FetchError::new(e.to_string()))?;
            response
                .text()
                .await
                .map_err(|e| FetchError::new(e.to_string()))
        }
    }
}

/// Fetcher selected from the command line
#[derive(Debug, Clone)]
pub enum Fetcher {
    Dir(DirFetcher),
    #[cfg(feature = "http")]
    Http(HttpFetcher),
    /// No source configured: only cached content is available
    Offline,
}

impl Fetcher {
    pub fn from_args(
        content_dir: Option<PathBuf>,
        content_url: Option<&str>,
    ) -> Result<Self, FetchError> {
        if let Some(dir) = content_dir {
            return Ok(Fetcher::Dir(DirFetcher::new(dir)));
        }
        #[cfg(feature = "http")]
        if let Some(url) = content_url {
            return HttpFetcher::new(url).map(Fetcher::Http);
        }
        #[cfg(not(feature = "http"))]
        if content_url.is_some() {
            tracing::warn!("built without the http feature; --content-url ignored");
        }
        Ok(Fetcher::Offline)
    }
}

impl ContentFetcher for Fetcher {
    async fn fetch(&self, id: &str) -> Result<String, FetchError> {
        match self {
            Fetcher::Dir(dir) => dir.fetch(id).await,
            #[cfg(feature = "http")]
            Fetcher::Http(http) => http.fetch(id).await,
            Fetcher::Offline => Err(FetchError::new(
                "no content source (pass --content-dir or --content-url)",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_dir_fetcher_reads_markdown_page() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("page-1.md"), "# Hello\n").unwrap();

        let fetcher = DirFetcher::new(dir.path());
        assert_eq!(fetcher.fetch("page-1").await.unwrap(), "# Hello\n");
    }

    #[tokio::test]
    async fn test_dir_fetcher_missing_page_is_error() {
        let dir = TempDir::new().unwrap();
        let err = DirFetcher::new(dir.path()).fetch("absent").await.unwrap_err();
        assert!(err.message.contains("absent.md"), "{}", err.message);
    }

    #[tokio::test]
    async fn test_dir_fetcher_rejects_path_ids() {
        let dir = TempDir::new().unwrap();
        let fetcher = DirFetcher::new(dir.path());
        assert!(fetcher.fetch("../secrets").await.is_err());
        assert!(fetcher.fetch("a/b").await.is_err());
    }

    #[tokio::test]
    async fn test_offline_fetcher_always_fails() {
        let fetcher = Fetcher::from_args(None, None).unwrap();
        assert!(matches!(fetcher, Fetcher::Offline));
        assert!(fetcher.fetch("x").await.is_err());
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_content_url_trims_slash() {
        for base in ["https://docs.example.com/api/", "https://docs.example.com/api"] {
            let fetcher = HttpFetcher::new(base).unwrap();
            assert_eq!(
                fetcher.content_url("abc").unwrap().as_str(),
                "https://docs.example.com/api/items/abc/content"
            );
        }
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_content_url_encodes_id_as_one_segment() {
        let fetcher = HttpFetcher::new("https://docs.example.com/api").unwrap();
        let url = fetcher.content_url("a/b?c#d e").unwrap();
        assert_eq!(
            url.as_str(),
            "https://docs.example.com/api/items/a%2Fb%3Fc%23d%20e/content"
        );
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_fetcher_rejects_unusable_base() {
        assert!(HttpFetcher::new("not a url").is_err());
        assert!(HttpFetcher::new("mailto:docs@example.com").is_err());
        assert!(Fetcher::from_args(None, Some("ftp://example.com")).is_err());
    }

    #[test]
    fn test_content_dir_wins_over_url() {
        let fetcher = Fetcher::from_args(Some(PathBuf::from("pages")), Some("::bad::")).unwrap();
        assert!(matches!(fetcher, Fetcher::Dir(_)));
    }
}
