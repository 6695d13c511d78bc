use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DumpError {
    // The one condition that aborts a whole run.
    #[error("xz binary missing, please install xz")]
    UnxzMissing,
    #[error("dump download failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unxz exited with {0}")]
    Unxz(std::process::ExitStatus),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn sibling(destination: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    destination.with_file_name(name)
}

// Download and extract the xz-compressed dump. The previous download's ETag
// is kept next to the destination so an unchanged dump is not re-fetched.
pub fn retrieve_xz_json(url: &str, destination: &Path) -> Result<PathBuf, DumpError> {
    if Command::new("unxz").arg("--version").output().is_err() {
        return Err(DumpError::UnxzMissing);
    }

    let hash_path = sibling(destination, ".hash");
    let xz_path = sibling(destination, ".xz");
    let previous_etag = fs::read_to_string(&hash_path).ok();

    info!("checking vote dump at {url}");
    let mut response = reqwest::blocking::get(url)?;
    let remote_etag = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let unchanged = matches!((&previous_etag, &remote_etag), (Some(a), Some(b)) if a == b);
    if unchanged && destination.exists() {
        info!("dump unchanged, reusing {}", destination.display());
        return Ok(destination.to_path_buf());
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    if xz_path.exists() {
        fs::remove_file(&xz_path)?;
    }
    if destination.exists() {
        fs::remove_file(destination)?;
    }

    info!("downloading vote dump to {}", xz_path.display());
    let mut file = fs::File::create(&xz_path)?;
    response.copy_to(&mut file)?;

    if let Some(etag) = &remote_etag {
        fs::write(&hash_path, etag)?;
    }

    info!("decompressing {}", xz_path.display());
    let status = Command::new("unxz").arg(&xz_path).status()?;
    if !status.success() {
        return Err(DumpError::Unxz(status));
    }

    Ok(destination.to_path_buf())
}
