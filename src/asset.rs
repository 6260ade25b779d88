//! Function code assets.
//!
//! A code asset is a local directory that is zipped and uploaded as function code. Its identity
//! is a content fingerprint, so unchanged code maps to the same object key and redeploys only
//! happen when the directory contents change.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Errors raised while fingerprinting or packaging a code asset.
#[derive(Debug, Error)]
pub enum AssetError {
    /// Asset directory does not exist or is not a directory.
    #[error("code asset directory not found: {0}")]
    NotFound(PathBuf),
    /// Asset directory exists but contains no files.
    #[error("code asset directory is empty: {0}")]
    Empty(PathBuf),
    /// Filesystem access failed.
    #[error("failed to read code asset {path}: {source}")]
    Io {
        /// File or directory being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Directory traversal failed.
    #[error("failed to walk code asset directory: {0}")]
    Walk(#[from] walkdir::Error),
    /// Archive could not be written.
    #[error("failed to write code archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Directory packaged as function code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeAsset {
    path: PathBuf,
}

impl CodeAsset {
    /// Reference a directory as a code asset. The directory is read lazily.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Source directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// SHA-256 over every file's relative path and contents, in path order.
    pub fn fingerprint(&self) -> Result<String, AssetError> {
        let files = self.files()?;
        let mut hasher = Sha256::new();
        for file in &files {
            let contents = read(&file.absolute)?;
            hasher.update(file.relative.as_bytes());
            hasher.update([0u8]);
            hasher.update((contents.len() as u64).to_le_bytes());
            hasher.update(&contents);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Object key the packaged archive is uploaded under.
    pub fn object_key(&self) -> Result<String, AssetError> {
        Ok(object_key_for(&self.fingerprint()?))
    }

    fn files(&self) -> Result<Vec<AssetFile>, AssetError> {
        if !self.path.is_dir() {
            return Err(AssetError::NotFound(self.path.clone()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.path).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.path)
                .unwrap_or(entry.path())
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push(AssetFile {
                relative,
                absolute: entry.path().to_path_buf(),
            });
        }

        if files.is_empty() {
            return Err(AssetError::Empty(self.path.clone()));
        }
        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        Ok(files)
    }
}

struct AssetFile {
    relative: String,
    absolute: PathBuf,
}

/// Result of packaging a code asset.
#[derive(Debug, Clone)]
pub struct PackagedAsset {
    /// Content fingerprint of the source directory.
    pub fingerprint: String,
    /// Object key the archive should be uploaded under.
    pub object_key: String,
    /// Location of the written archive.
    pub archive: PathBuf,
    /// Number of files stored in the archive.
    pub file_count: usize,
}

/// Zip a code asset into `out_dir/<fingerprint>.zip`.
pub fn package_asset(asset: &CodeAsset, out_dir: &Path) -> Result<PackagedAsset, AssetError> {
    let files = asset.files()?;
    let fingerprint = asset.fingerprint()?;
    let object_key = object_key_for(&fingerprint);

    fs::create_dir_all(out_dir).map_err(|source| AssetError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;
    let archive = out_dir.join(&object_key);
    let file = fs::File::create(&archive).map_err(|source| AssetError::Io {
        path: archive.clone(),
        source,
    })?;

    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);
    for entry in &files {
        let contents = read(&entry.absolute)?;
        zip.start_file(entry.relative.as_str(), options)?;
        zip.write_all(&contents).map_err(|source| AssetError::Io {
            path: archive.clone(),
            source,
        })?;
    }
    zip.finish()?;

    tracing::info!(
        source = %asset.path().display(),
        archive = %archive.display(),
        files = files.len(),
        "Packaged code asset"
    );

    Ok(PackagedAsset {
        fingerprint,
        object_key,
        archive,
        file_count: files.len(),
    })
}

/// Record of the code assets a synthesized template expects to find uploaded.
#[derive(Debug, Clone, Serialize)]
pub struct AssetManifest {
    /// RFC 3339 time the manifest was produced.
    pub generated_at: String,
    /// Template parameter naming the bucket the assets are uploaded to.
    pub bucket_parameter: String,
    /// One entry per distinct asset directory.
    pub assets: Vec<AssetManifestEntry>,
}

/// Single asset described in an [`AssetManifest`].
#[derive(Debug, Clone, Serialize)]
pub struct AssetManifestEntry {
    /// Source directory as configured.
    pub source: String,
    /// Content fingerprint.
    pub fingerprint: String,
    /// Object key referenced by the template.
    pub object_key: String,
}

impl AssetManifest {
    /// Empty manifest stamped with the current time.
    pub fn new(bucket_parameter: impl Into<String>) -> Self {
        Self {
            generated_at: current_timestamp_rfc3339(),
            bucket_parameter: bucket_parameter.into(),
            assets: Vec::new(),
        }
    }
}

pub(crate) fn object_key_for(fingerprint: &str) -> String {
    format!("{fingerprint}.zip")
}

fn read(path: &Path) -> Result<Vec<u8>, AssetError> {
    fs::read(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, relative: &str, contents: &str) {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "file_processing.py", "def lambda_handler(e, c): pass\n");
        write(dir.path(), "lib/util.py", "X = 1\n");
        let asset = CodeAsset::new(dir.path());

        let first = asset.fingerprint().unwrap();
        assert_eq!(first, asset.fingerprint().unwrap());
        assert_eq!(first.len(), 64);

        write(dir.path(), "lib/util.py", "X = 2\n");
        assert_ne!(first, asset.fingerprint().unwrap());
    }

    #[test]
    fn fingerprint_covers_file_names() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        write(a.path(), "one.py", "same");
        write(b.path(), "two.py", "same");
        assert_ne!(
            CodeAsset::new(a.path()).fingerprint().unwrap(),
            CodeAsset::new(b.path()).fingerprint().unwrap()
        );
    }

    #[test]
    fn missing_and_empty_directories_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = CodeAsset::new(dir.path().join("absent"));
        assert!(matches!(missing.fingerprint(), Err(AssetError::NotFound(_))));

        let empty = CodeAsset::new(dir.path());
        assert!(matches!(empty.fingerprint(), Err(AssetError::Empty(_))));
    }

    #[test]
    fn object_key_uses_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "query_lambda.py", "pass\n");
        let asset = CodeAsset::new(dir.path());
        let key = asset.object_key().unwrap();
        assert_eq!(key, format!("{}.zip", asset.fingerprint().unwrap()));
    }

    #[test]
    fn manifest_timestamp_is_rfc3339_like() {
        let manifest = AssetManifest::new("AssetBucket");
        assert!(manifest.generated_at.contains('T') && manifest.generated_at.ends_with('Z'));
        assert!(manifest.assets.is_empty());
    }
}
