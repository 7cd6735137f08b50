//! Checkpoints for multi-stage runs.
//!
//! Each stage output is stored as parquet next to a bincode manifest holding
//! the fingerprint of the inputs it was computed from. A checkpoint is reused
//! only when the fingerprint matches; otherwise the stage is recomputed and
//! the checkpoint replaced.

use bincode::config::{Configuration, Fixint, LittleEndian};
use chrono::{DateTime, Utc};
use log::info;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::Xxh3;

const BINCODE_CONFIG: Configuration<LittleEndian, Fixint> =
    bincode::config::standard().with_fixed_int_encoding();
const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StageCacheError {
    #[error("Failed to create checkpoint directory '{0}'")]
    DirCreation(PathBuf, #[source] std::io::Error),

    #[error("Failed to read checkpoint manifest '{0}'")]
    ManifestRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to decode checkpoint manifest '{0}'")]
    ManifestDecode(PathBuf, #[source] Box<bincode::error::DecodeError>),

    #[error("Failed to encode checkpoint manifest")]
    ManifestEncode(#[source] Box<bincode::error::EncodeError>),

    #[error("I/O error writing checkpoint '{0}'")]
    WriteIo(PathBuf, #[source] std::io::Error),

    #[error("Failed to move checkpoint into place at '{0}'")]
    Persist(PathBuf, #[source] std::io::Error),

    #[error("Encoding error writing checkpoint '{0}'")]
    ParquetWrite(PathBuf, #[source] PolarsError),

    #[error("Failed to read checkpoint '{0}'")]
    ParquetRead(PathBuf, #[source] PolarsError),
}

/// Incremental content hash of a stage's inputs.
pub struct Fingerprint(Xxh3);

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new()
    }
}

impl Fingerprint {
    pub fn new() -> Self {
        Self(Xxh3::new())
    }

    pub fn str(mut self, value: &str) -> Self {
        self.0.update(value.as_bytes());
        self.0.update(&[0]);
        self
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.0.update(&value.to_le_bytes());
        self
    }

    pub fn f64(mut self, value: f64) -> Self {
        self.0.update(&value.to_bits().to_le_bytes());
        self
    }

    pub fn finish(self) -> u64 {
        self.0.digest()
    }
}

/// Metadata stored beside a checkpointed stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageManifest {
    pub version: u32,
    pub stage: String,
    pub fingerprint: u64,
    pub created_at: DateTime<Utc>,
    pub rows: usize,
}

/// Where a stage result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageSource {
    Checkpoint,
    Computed,
}

/// Fingerprint-keyed checkpoint store rooted at one directory.
#[derive(Debug, Clone)]
pub struct StageCache {
    root: PathBuf,
}

impl StageCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_path(&self, stage: &str) -> PathBuf {
        self.root.join(format!("{stage}.parquet"))
    }

    pub fn manifest_path(&self, stage: &str) -> PathBuf {
        self.root.join(format!("{stage}.manifest.bin"))
    }

    pub fn manifest(&self, stage: &str) -> Result<Option<StageManifest>, StageCacheError> {
        let path = self.manifest_path(stage);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StageCacheError::ManifestRead(path, e)),
        };
        let (manifest, _) =
            bincode::serde::decode_from_slice::<StageManifest, _>(&bytes, BINCODE_CONFIG)
                .map_err(|e| StageCacheError::ManifestDecode(path.clone(), Box::new(e)))?;
        Ok(Some(manifest))
    }

    /// The checkpointed output of `stage`, if it was computed from `fingerprint`.
    pub fn load(&self, stage: &str, fingerprint: u64) -> Result<Option<DataFrame>, StageCacheError> {
        let Some(manifest) = self.manifest(stage)? else {
            return Ok(None);
        };
        if manifest.version != MANIFEST_VERSION || manifest.fingerprint != fingerprint {
            info!(
                "Checkpoint for stage '{}' from {} is stale (inputs changed); recomputing",
                stage, manifest.created_at
            );
            return Ok(None);
        }

        let path = self.data_path(stage);
        if !path.exists() {
            return Ok(None);
        }
        let df = LazyFrame::scan_parquet(&path, Default::default())
            .and_then(|lf| lf.collect())
            .map_err(|e| StageCacheError::ParquetRead(path.clone(), e))?;
        info!(
            "Resuming stage '{}' from checkpoint {:?} ({} rows)",
            stage,
            path,
            df.height()
        );
        Ok(Some(df))
    }

    /// Writes `df` as the checkpoint of `stage`.
    ///
    /// Data and manifest are written to temporary files and moved into place,
    /// the manifest last, so an interrupted write never leaves a manifest
    /// pointing at partial data.
    pub fn store(
        &self,
        stage: &str,
        fingerprint: u64,
        df: &mut DataFrame,
    ) -> Result<StageManifest, StageCacheError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| StageCacheError::DirCreation(self.root.clone(), e))?;

        let data_path = self.data_path(stage);
        let tmp = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|e| StageCacheError::WriteIo(data_path.clone(), e))?;
        let file = tmp
            .reopen()
            .map_err(|e| StageCacheError::WriteIo(data_path.clone(), e))?;
        ParquetWriter::new(file)
            .with_compression(ParquetCompression::Snappy)
            .finish(df)
            .map_err(|e| StageCacheError::ParquetWrite(data_path.clone(), e))?;
        tmp.persist(&data_path)
            .map_err(|e| StageCacheError::Persist(data_path.clone(), e.error))?;

        let manifest = StageManifest {
            version: MANIFEST_VERSION,
            stage: stage.to_string(),
            fingerprint,
            created_at: Utc::now(),
            rows: df.height(),
        };
        let bytes = bincode::serde::encode_to_vec(&manifest, BINCODE_CONFIG)
            .map_err(|e| StageCacheError::ManifestEncode(Box::new(e)))?;
        let manifest_path = self.manifest_path(stage);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|e| StageCacheError::WriteIo(manifest_path.clone(), e))?;
        tmp.write_all(&bytes)
            .map_err(|e| StageCacheError::WriteIo(manifest_path.clone(), e))?;
        tmp.persist(&manifest_path)
            .map_err(|e| StageCacheError::Persist(manifest_path.clone(), e.error))?;

        info!(
            "Checkpointed stage '{}' ({} rows) to {:?}",
            stage, manifest.rows, data_path
        );
        Ok(manifest)
    }

    /// Removes the checkpoint of `stage` if present.
    pub fn invalidate(&self, stage: &str) -> Result<(), StageCacheError> {
        for path in [self.manifest_path(stage), self.data_path(stage)] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StageCacheError::WriteIo(path, e)),
            }
        }
        Ok(())
    }

    /// Returns the checkpoint for `fingerprint`, or runs `compute` and
    /// checkpoints its result.
    ///
    /// `compute` returns the output frame and whether it may be checkpointed;
    /// degraded outputs are returned but not stored so the next run retries.
    pub fn load_or_compute<E, F>(
        &self,
        stage: &str,
        fingerprint: u64,
        compute: F,
    ) -> Result<(DataFrame, StageSource), E>
    where
        E: From<StageCacheError>,
        F: FnOnce() -> Result<(DataFrame, bool), E>,
    {
        if let Some(df) = self.load(stage, fingerprint)? {
            return Ok((df, StageSource::Checkpoint));
        }
        let (mut df, cacheable) = compute()?;
        if cacheable {
            self.store(stage, fingerprint, &mut df)?;
        } else {
            self.invalidate(stage)?;
            info!("Stage '{}' output is degraded; not checkpointing", stage);
        }
        Ok((df, StageSource::Computed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn frame(values: &[f64]) -> DataFrame {
        DataFrame::new(vec![Column::new("flood_days".into(), values.to_vec())]).unwrap()
    }

    #[test]
    fn test_fingerprint_is_order_sensitive() {
        let a = Fingerprint::new().str("a").str("b").finish();
        let b = Fingerprint::new().str("b").str("a").finish();
        let c = Fingerprint::new().str("ab").finish();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, Fingerprint::new().str("a").str("b").finish());
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StageCache::new(dir.path());
        let manifest = cache.store("historical", 42, &mut frame(&[1.0, 2.0])).unwrap();
        assert_eq!(manifest.rows, 2);
        assert_eq!(cache.manifest("historical").unwrap(), Some(manifest));

        let loaded = cache.load("historical", 42).unwrap().unwrap();
        assert_eq!(loaded.height(), 2);
        assert!(cache.load("historical", 43).unwrap().is_none());
        assert!(cache.load("projected", 42).unwrap().is_none());
    }

    #[test]
    fn test_load_or_compute_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StageCache::new(dir.path());
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok::<_, StageCacheError>((frame(&[4.0]), true))
        };

        let (_, first) = cache.load_or_compute("historical", 7, compute).unwrap();
        let (df, second) = cache.load_or_compute("historical", 7, compute).unwrap();
        assert_eq!(first, StageSource::Computed);
        assert_eq!(second, StageSource::Checkpoint);
        assert_eq!(df.height(), 1);
        assert_eq!(calls.get(), 1);

        let (_, changed) = cache.load_or_compute("historical", 8, compute).unwrap();
        assert_eq!(changed, StageSource::Computed);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_degraded_output_not_checkpointed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StageCache::new(dir.path());
        cache
            .load_or_compute("historical", 1, || {
                Ok::<_, StageCacheError>((frame(&[1.0]), false))
            })
            .unwrap();
        assert!(cache.manifest("historical").unwrap().is_none());
    }
}
