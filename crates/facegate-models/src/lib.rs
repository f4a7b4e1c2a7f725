use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the manifest expected at the root of an asset directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// One detection asset: download URL, expected filename, SHA-256 checksum,
/// human-readable size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFile {
    pub name: String,
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub size_display: String,
}

/// The set of assets a detection backend needs before its first inference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
    pub assets: Vec<AssetFile>,
}

#[derive(Error, Debug)]
pub enum ModelIntegrityError {
    #[error("model asset not found: {name} ({path})")]
    MissingAsset { name: String, path: PathBuf },

    #[error("failed to open model asset: {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read model asset: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid asset manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "asset checksum mismatch for {name} ({path})\n  expected: {expected}\n  got:      {got}"
    )]
    ChecksumMismatch {
        name: String,
        path: PathBuf,
        expected: String,
        got: String,
    },
}

impl AssetManifest {
    /// Parse a manifest from its JSON text.
    pub fn from_json(text: &str, origin: &Path) -> Result<Self, ModelIntegrityError> {
        serde_json::from_str(text).map_err(|source| ModelIntegrityError::Manifest {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load `manifest.json` from an asset directory.
    pub fn load(model_dir: &Path) -> Result<Self, ModelIntegrityError> {
        let path = model_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(ModelIntegrityError::MissingAsset {
                name: MANIFEST_FILE.to_string(),
                path,
            });
        }
        let text = fs::read_to_string(&path).map_err(|source| ModelIntegrityError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_json(&text, &path)
    }
}

/// Compute SHA-256 hex digest of a file.
pub fn sha256_file_hex(path: &Path) -> Result<String, ModelIntegrityError> {
    let mut file = fs::File::open(path).map_err(|source| ModelIntegrityError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = file
            .read(&mut buf)
            .map_err(|source| ModelIntegrityError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn verify_file_sha256(
    name: &str,
    path: &Path,
    expected_sha256: &str,
) -> Result<(), ModelIntegrityError> {
    if !path.exists() {
        return Err(ModelIntegrityError::MissingAsset {
            name: name.to_string(),
            path: path.to_path_buf(),
        });
    }

    let digest = sha256_file_hex(path)?;
    if !digest.eq_ignore_ascii_case(expected_sha256) {
        return Err(ModelIntegrityError::ChecksumMismatch {
            name: name.to_string(),
            path: path.to_path_buf(),
            expected: expected_sha256.to_string(),
            got: digest,
        });
    }

    Ok(())
}

/// Verify every asset listed in the directory's manifest. Returns the
/// manifest on success so callers can hand asset paths to their backend.
pub fn verify_models_dir(model_dir: &Path) -> Result<AssetManifest, ModelIntegrityError> {
    let manifest = AssetManifest::load(model_dir)?;
    for asset in &manifest.assets {
        let path = model_dir.join(&asset.name);
        verify_file_sha256(&asset.name, &path, &asset.sha256)?;
    }

    Ok(manifest)
}
