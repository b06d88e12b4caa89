//! On-disk storage of downloaded member pages, one `<id>.html` file per
//! member, and extraction of records from such a directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::parser::{ParseError, parse_member_record};
use crate::types::{FailurePolicy, MemberId, MemberRecord};

const PAGE_EXTENSION: &str = "html";

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to extract member {id}: {source}")]
    Extract {
        id: MemberId,
        #[source]
        source: ParseError,
    },
}

#[derive(Debug)]
pub struct ExtractFailure {
    pub id: MemberId,
    pub path: PathBuf,
    pub error: ParseError,
}

#[derive(Debug, Default)]
pub struct ExtractReport {
    pub records: Vec<MemberRecord>,
    pub failures: Vec<ExtractFailure>,
}

pub fn page_path(dir: &Path, id: MemberId) -> PathBuf {
    dir.join(format!("{}.{}", id, PAGE_EXTENSION))
}

/// Writes a page body verbatim, replacing any earlier download of the same member.
pub fn write_page(dir: &Path, id: MemberId, html: &str) -> io::Result<()> {
    fs::write(page_path(dir, id), html)
}

/// Lists stored pages in ascending member id order. Files whose stem is not a
/// member id are ignored.
pub fn list_pages(dir: &Path) -> Result<Vec<(MemberId, PathBuf)>, PageError> {
    let io_err = |source: io::Error| PageError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut pages = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(PAGE_EXTENSION) {
            continue;
        }

        match path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<MemberId>().ok())
        {
            Some(id) => pages.push((id, path)),
            None => log::debug!("Skipping {}: not a member page", path.display()),
        }
    }

    pages.sort_by_key(|(id, _)| *id);
    Ok(pages)
}

pub fn extract_member_page(id: MemberId, path: &Path) -> Result<MemberRecord, PageError> {
    let html = fs::read_to_string(path).map_err(|source| PageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_member_record(id, &html).map_err(|source| PageError::Extract { id, source })
}

/// Extracts every stored page in `dir`.
///
/// [`FailurePolicy::Abort`] returns the first extraction error.
/// [`FailurePolicy::Continue`] skips broken pages and lists them in the report.
/// Read errors are always fatal.
pub fn extract_member_pages(dir: &Path, policy: FailurePolicy) -> Result<ExtractReport, PageError> {
    let pages = list_pages(dir)?;
    log::info!("Scraping {} member pages in '{}'", pages.len(), dir.display());

    let mut report = ExtractReport::default();

    for (id, path) in pages {
        log::debug!("Scraping member {} ({})", id, path.display());
        match extract_member_page(id, &path) {
            Ok(record) => report.records.push(record),
            Err(PageError::Extract { id, source }) if policy == FailurePolicy::Continue => {
                log::warn!("Skipping member {}: {}", id, source);
                report.failures.push(ExtractFailure {
                    id,
                    path,
                    error: source,
                });
            }
            Err(e) => return Err(e),
        }
    }

    if !report.failures.is_empty() {
        log::warn!(
            "{} member pages could not be scraped: {:?}",
            report.failures.len(),
            report.failures.iter().map(|f| f.id).collect::<Vec<_>>()
        );
    }

    Ok(report)
}
