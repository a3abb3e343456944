use crate::config::DOWNLOAD_RETRIES;
use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Stages one source artifact into the staging directory and returns the
/// local path the extractor should open.
///
/// - Files already present are not fetched again.
/// - `.gz` artifacts are decompressed; `extracted_name` overrides the
///   decompressed file name when the catalog supplies one.
/// - A local source that does not exist is not an error here: the would-be
///   path is returned and the extractor treats the absent artifact as an
///   empty pass.
pub fn stage_artifact(
    location: &str,
    staging_dir: &Path,
    extracted_name: Option<&str>,
) -> Result<PathBuf> {
    fs::create_dir_all(staging_dir)
        .with_context(|| format!("Failed to create staging dir: {}", staging_dir.display()))?;

    let fetched_name = file_name_of(location);
    let fetched_path = staging_dir.join(&fetched_name);
    let final_path = match (extracted_name, fetched_name.strip_suffix(".gz")) {
        (Some(name), _) => staging_dir.join(name.trim_start_matches('/')),
        (None, Some(bare)) => staging_dir.join(bare),
        (None, None) => fetched_path.clone(),
    };

    if final_path.exists() {
        debug!(artifact = %final_path.display(), "Artifact already staged, not downloading");
        return Ok(final_path);
    }

    if !fetched_path.exists() {
        if let Some(url) = http_url(location) {
            download(url, &fetched_path)?;
        } else {
            let source = local_path(location);
            if source.exists() {
                debug!(from = %source.display(), to = %fetched_path.display(), "Copying local artifact");
                fs::copy(&source, &fetched_path).with_context(|| {
                    format!("Failed to copy artifact from: {}", source.display())
                })?;
            } else {
                warn!(source = %source.display(), "Source artifact not found");
                return Ok(final_path);
            }
        }
    }

    if fetched_name.ends_with(".gz") {
        decompress(&fetched_path, &final_path)?;
    } else if final_path != fetched_path {
        // Plain artifact with a catalog-supplied extraction name: the
        // extractor opens final_path, so the fetched file must move there.
        fs::rename(&fetched_path, &final_path).with_context(|| {
            format!(
                "Failed to move artifact to: {}",
                final_path.display()
            )
        })?;
    }
    Ok(final_path)
}

fn file_name_of(location: &str) -> String {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(location)
        .to_string()
}

fn http_url(location: &str) -> Option<&str> {
    (location.starts_with("http://") || location.starts_with("https://")).then_some(location)
}

fn local_path(location: &str) -> PathBuf {
    PathBuf::from(location.strip_prefix("file://").unwrap_or(location))
}

fn download(url: &str, target: &Path) -> Result<()> {
    info!(url, target = %target.display(), "Downloading artifact");
    let mut last_err = None;
    for attempt in 0..=DOWNLOAD_RETRIES {
        match try_download(url, target) {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(url, attempt, error = %e, "Download failed");
                last_err = Some(e);
            }
        }
    }
    // partial file from a failed attempt must not satisfy skip-if-present
    fs::remove_file(target).ok();
    match last_err {
        Some(e) => Err(e).with_context(|| format!("Failed to download: {url}")),
        None => bail!("Failed to download: {url}"),
    }
}

fn try_download(url: &str, target: &Path) -> Result<()> {
    let mut response = reqwest::blocking::get(url)?.error_for_status()?;
    let mut file = BufWriter::new(File::create(target)?);
    response.copy_to(&mut file)?;
    Ok(())
}

fn decompress(source: &Path, target: &Path) -> Result<()> {
    info!(from = %source.display(), to = %target.display(), "Decompressing artifact");
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut decoder = GzDecoder::new(BufReader::new(
        File::open(source)
            .with_context(|| format!("Failed to open archive: {}", source.display()))?,
    ));
    let mut out = BufWriter::new(
        File::create(target)
            .with_context(|| format!("Failed to create: {}", target.display()))?,
    );
    std::io::copy(&mut decoder, &mut out)
        .with_context(|| format!("Failed to decompress: {}", source.display()))?;
    Ok(())
}
