pub mod db;
pub mod pages;
pub mod parser;
pub mod scraper;
pub mod types;
pub mod utils;

pub use db::{MemberStore, StoreError};
pub use scraper::{FetchConfig, ScraperError, WebScraper};

pub(crate) const BASE_URL: &str = "https://www.europarl.europa.eu";
pub(crate) const MEMBER_LIST_PATH: &str = "/meps/en/full-list/all";
