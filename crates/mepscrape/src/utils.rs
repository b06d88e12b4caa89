use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("The path {} already exists. Consider using the --force option.", .0.display())]
    AlreadyExists(PathBuf),
    #[error("The input directory {} does not exist.", .0.display())]
    NotADirectory(PathBuf),
    #[error("Failed to prepare {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_error(path: &Path) -> impl Fn(io::Error) -> PrepareError + '_ {
    move |source| PrepareError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Refuses an existing `path` unless `force` is set. Nothing is removed.
pub fn check_output_path(path: &Path, force: bool) -> Result<(), PrepareError> {
    if path.exists() && !force {
        return Err(PrepareError::AlreadyExists(path.to_path_buf()));
    }
    Ok(())
}

/// Creates an empty output directory. An existing one is only removed when
/// `force` is set.
pub fn prepare_output_dir(path: &Path, force: bool) -> Result<(), PrepareError> {
    check_output_path(path, force)?;
    if path.exists() {
        log::info!("Removing existing directory '{}'", path.display());
        if path.is_dir() {
            fs::remove_dir_all(path).map_err(io_error(path))?;
        } else {
            fs::remove_file(path).map_err(io_error(path))?;
        }
    }
    fs::create_dir_all(path).map_err(io_error(path))
}

pub fn ensure_input_dir(path: &Path) -> Result<(), PrepareError> {
    if !path.is_dir() {
        return Err(PrepareError::NotADirectory(path.to_path_buf()));
    }
    Ok(())
}

/// Narrows the members addressed by a mailto link. Values match exactly.
#[derive(Debug, Default, Clone)]
pub struct MemberFilter {
    pub country: Option<String>,
    pub party: Option<String>,
    pub eu_fraction: Option<String>,
}

impl MemberFilter {
    pub fn validate(self) -> Result<Self, String> {
        for (name, value) in [
            ("Country", &self.country),
            ("Party", &self.party),
            ("EU fraction", &self.eu_fraction),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(format!("{name} must not be empty"));
            }
        }
        Ok(self)
    }
}
