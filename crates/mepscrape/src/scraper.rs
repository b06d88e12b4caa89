use crate::pages;
use crate::parser::{ParseError, parse_member_list};
use crate::types::{FailurePolicy, MemberId, MemberListing};
use crate::utils::{PrepareError, check_output_path, prepare_output_dir};

use futures::StreamExt;
use futures::stream;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),
    #[error("{0}")]
    Download(FetchFailure),
    #[error("Invalid fetch configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Output(#[from] PrepareError),
}

#[derive(Debug, thiserror::Error)]
pub enum PageFetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to write page: {0}")]
    Io(#[from] std::io::Error),
}

/// A member page that could not be downloaded or stored.
#[derive(Debug, thiserror::Error)]
#[error("Failed to download member {id} from {url}: {error}")]
pub struct FetchFailure {
    pub id: MemberId,
    pub url: String,
    #[source]
    pub error: PageFetchError,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Maximum number of requests in flight. The site starts blocking
    /// clients that open too many connections at once.
    pub concurrency: usize,
    pub timeout: Duration,
    pub retries: u32,
    pub retry_backoff: Duration,
    pub policy: FailurePolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            timeout: Duration::from_secs(30),
            retries: 0,
            retry_backoff: Duration::from_millis(500),
            policy: FailurePolicy::Abort,
        }
    }
}

impl FetchConfig {
    pub fn validate(self) -> Result<Self, String> {
        if self.concurrency == 0 {
            return Err("Connection limit must be greater than 0".to_string());
        }
        if self.timeout.is_zero() {
            return Err("Timeout must be greater than 0".to_string());
        }
        Ok(self)
    }
}

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub requested: usize,
    pub saved: usize,
    pub failures: Vec<FetchFailure>,
}

impl std::fmt::Display for DownloadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nDownload:")?;
        writeln!(f, "  Requested: {}", self.requested)?;
        writeln!(f, "  Saved:     {}", self.saved)?;
        writeln!(f, "  Failed:    {}", self.failures.len())?;
        for failure in &self.failures {
            writeln!(f, "    - {}", failure)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WebScraper {
    client: Client,
    base_url: String,
    config: FetchConfig,
}

impl WebScraper {
    pub fn new(config: FetchConfig) -> Result<Self, ScraperError> {
        let config = config.validate().map_err(ScraperError::InvalidConfig)?;

        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.concurrency)
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self {
            client,
            base_url: crate::BASE_URL.to_string(),
            config,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub async fn fetch_member_list(&self) -> Result<Vec<MemberListing>, ScraperError> {
        let url = format!("{}{}", self.base_url, crate::MEMBER_LIST_PATH);
        log::info!("Fetching member list from {}...", url);

        let html = self.get_html(&url).await?;
        let listings = parse_member_list(&html)?;

        log::info!("Found {} member pages to download", listings.len());
        Ok(listings)
    }

    /// Fetches the member list and downloads every page into a fresh `dir`.
    ///
    /// An existing `dir` is refused up front unless `force` is set, and is
    /// only replaced once the member list has been fetched and parsed. A
    /// listing failure leaves the file system as it was.
    pub async fn download_all(
        &self,
        dir: &Path,
        force: bool,
    ) -> Result<DownloadReport, ScraperError> {
        check_output_path(dir, force)?;
        let listings = self.fetch_member_list().await?;
        prepare_output_dir(dir, force)?;
        self.download_member_pages(&listings, dir).await
    }

    /// Downloads every listed page into `dir` as `<id>.html`, keeping at most
    /// `concurrency` requests in flight.
    ///
    /// Under [`FailurePolicy::Abort`] the first failure is returned as
    /// [`ScraperError::Download`] and the remaining requests are dropped.
    /// Under [`FailurePolicy::Continue`] failures are collected in the report.
    pub async fn download_member_pages(
        &self,
        listings: &[MemberListing],
        dir: &Path,
    ) -> Result<DownloadReport, ScraperError> {
        log::info!(
            "Downloading {} member pages to '{}' with connection limit {}",
            listings.len(),
            dir.display(),
            self.config.concurrency
        );

        let mut downloads = stream::iter(listings)
            .map(|listing| async move { (listing, self.save_member_page(listing, dir).await) })
            .buffer_unordered(self.config.concurrency);

        let mut report = DownloadReport {
            requested: listings.len(),
            ..Default::default()
        };

        while let Some((listing, result)) = downloads.next().await {
            match result {
                Ok(()) => report.saved += 1,
                Err(error) => {
                    let failure = FetchFailure {
                        id: listing.id,
                        url: listing.url.clone(),
                        error,
                    };
                    match self.config.policy {
                        FailurePolicy::Abort => return Err(ScraperError::Download(failure)),
                        FailurePolicy::Continue => {
                            log::warn!("{}", failure);
                            report.failures.push(failure);
                        }
                    }
                }
            }
        }

        log::info!(
            "Saved {} of {} member pages",
            report.saved,
            report.requested
        );
        Ok(report)
    }

    async fn save_member_page(
        &self,
        listing: &MemberListing,
        dir: &Path,
    ) -> Result<(), PageFetchError> {
        let url = self.resolve_url(&listing.url);
        log::debug!("Saving member page {} from {}", listing.id, url);

        let mut attempt = 0;
        let html = loop {
            match self.get_html(&url).await {
                Ok(html) => break html,
                Err(e) if attempt < self.config.retries => {
                    let backoff = self
                        .config
                        .retry_backoff
                        .saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    log::warn!(
                        "Member {} failed (attempt {}/{}), retrying in {:.1}s: {}",
                        listing.id,
                        attempt,
                        self.config.retries,
                        backoff.as_secs_f64(),
                        e
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        pages::write_page(dir, listing.id, &html)?;
        Ok(())
    }

    fn resolve_url(&self, url_or_path: &str) -> String {
        if url_or_path.starts_with("http") {
            url_or_path.to_string()
        } else {
            format!("{}/{}", self.base_url, url_or_path.trim_start_matches('/'))
        }
    }

    async fn get_html(&self, url: &str) -> Result<String, reqwest::Error> {
        self.client
            .get(url)
            .send()
            .await
            .inspect_err(|e| log::debug!("HTTP error: {e:?}"))?
            .error_for_status()
            .inspect_err(|e| log::debug!("HTTP status error: {e}"))?
            .text()
            .await
            .inspect_err(|e| log::debug!("Decode error: {e:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_config_validate() {
        assert!(FetchConfig::default().validate().is_ok());

        let config = FetchConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = FetchConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_new_rejects_zero_concurrency() {
        let config = FetchConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(
            WebScraper::new(config),
            Err(ScraperError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_resolve_url() {
        let scraper = WebScraper::new(FetchConfig::default())
            .unwrap()
            .with_base_url("http://localhost:8080/");

        assert_eq!(
            scraper.resolve_url("/meps/en/124831"),
            "http://localhost:8080/meps/en/124831"
        );
        assert_eq!(
            scraper.resolve_url("https://www.europarl.europa.eu/meps/en/1"),
            "https://www.europarl.europa.eu/meps/en/1"
        );
    }
}
