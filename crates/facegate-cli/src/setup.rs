//! `facegate setup` — downloads the detection assets listed in a manifest.

use anyhow::{bail, Context, Result};
use facegate_models::{
    sha256_file_hex, verify_file_sha256, AssetFile, AssetManifest, ModelIntegrityError,
    MANIFEST_FILE,
};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Determine the model directory.
///
/// `FACEGATE_MODEL_DIR` wins; otherwise `$XDG_DATA_HOME/facegate/models`
/// (~/.local/share/facegate/models).
pub fn default_model_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FACEGATE_MODEL_DIR") {
        return PathBuf::from(dir);
    }
    let data_home = std::env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.local/share")
    });
    PathBuf::from(data_home).join("facegate/models")
}

pub fn resolve_model_dir(model_dir: Option<String>) -> PathBuf {
    model_dir.map(PathBuf::from).unwrap_or_else(default_model_dir)
}

/// Download a single asset with progress output, verify it, then move it
/// into place.
fn download_asset(asset: &AssetFile, dest: &Path) -> Result<()> {
    let tmp_path = part_path(dest);

    if asset.size_display.is_empty() {
        println!("  downloading {}...", asset.name);
    } else {
        println!("  downloading {} ({})...", asset.name, asset.size_display);
    }
    tracing::debug!(url = %asset.url, dest = %dest.display(), "asset download");

    let resp = ureq::get(&asset.url)
        .call()
        .with_context(|| format!("failed to download {}", asset.url))?;

    let content_length = resp
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut reader = resp.into_body().into_reader();
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut buf = [0u8; 65536];
    let mut total: u64 = 0;
    let mut last_pct: u64 = 0;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        total += n as u64;

        if let Some(len) = content_length.filter(|len| *len > 0) {
            let pct = (total * 100) / len;
            if pct / 10 > last_pct / 10 {
                print!("  {pct}%\r");
                io::stdout().flush().ok();
                last_pct = pct;
            }
        }
    }

    file.flush()?;
    drop(file);

    print!("  verifying checksum... ");
    io::stdout().flush().ok();
    if let Err(e) = verify_file_sha256(&asset.name, &tmp_path, &asset.sha256) {
        fs::remove_file(&tmp_path).ok();
        bail!("{e}");
    }
    println!("ok");

    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to rename {} -> {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    Ok(())
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Whether an existing file already matches the manifest entry.
fn already_present(asset: &AssetFile, dest: &Path) -> bool {
    if !dest.exists() {
        return false;
    }
    match sha256_file_hex(dest) {
        Ok(digest) if digest.eq_ignore_ascii_case(&asset.sha256) => {
            println!("  {} already present (checksum ok)", asset.name);
            true
        }
        Ok(_) => {
            println!("  {} exists but checksum differs, re-downloading", asset.name);
            false
        }
        Err(_) => {
            println!("  {} exists but is unreadable, re-downloading", asset.name);
            false
        }
    }
}

/// Run the setup command: download and verify every asset in `manifest_path`,
/// then install the manifest next to them.
pub fn run(manifest_path: &Path, model_dir: Option<String>) -> Result<()> {
    let text = fs::read_to_string(manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    let manifest = AssetManifest::from_json(&text, manifest_path)?;
    if manifest.assets.is_empty() {
        bail!("manifest {} lists no assets", manifest_path.display());
    }

    let dir = resolve_model_dir(model_dir);
    println!("Model directory: {}", dir.display());

    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let mut downloaded = 0;
    let mut skipped = 0;

    for asset in &manifest.assets {
        let dest = dir.join(&asset.name);
        if already_present(asset, &dest) {
            skipped += 1;
            continue;
        }
        download_asset(asset, &dest)?;
        downloaded += 1;
    }

    fs::write(dir.join(MANIFEST_FILE), text)
        .with_context(|| format!("failed to write manifest into {}", dir.display()))?;

    println!();
    if downloaded > 0 {
        println!("Setup complete: {downloaded} asset(s) downloaded, {skipped} already present.");
    } else {
        println!("All assets already present. Nothing to download.");
    }
    tracing::info!(downloaded, skipped, dir = %dir.display(), "model setup finished");

    Ok(())
}

/// `facegate models verify`: check every installed asset against its manifest.
pub fn verify(model_dir: Option<String>) -> Result<()> {
    let dir = resolve_model_dir(model_dir);
    match facegate_models::verify_models_dir(&dir) {
        Ok(manifest) => {
            for asset in &manifest.assets {
                println!("  {:<32} ok", asset.name);
            }
            println!("{} asset(s) verified in {}", manifest.assets.len(), dir.display());
            Ok(())
        }
        Err(ModelIntegrityError::MissingAsset { name, .. }) if name == MANIFEST_FILE => {
            bail!(
                "no {MANIFEST_FILE} in {}; run `facegate setup --manifest <file>` first",
                dir.display()
            )
        }
        Err(e) => Err(e.into()),
    }
}
