//! On-disk snapshot of the vector store.
//!
//! A snapshot is two JSON artifacts in one directory:
//!
//! - `index.json`: record id → [`RecordMetadata`]
//! - `vectors.json`: record id → vector
//!
//! Both carry the same `snapshot_id`, so a pair that was not written by the
//! same save is detected on load. Writes go to `*.tmp` files which are
//! fsynced and then renamed over the previous artifacts; a failure before
//! the renames leaves the prior snapshot untouched.
//!
//! The previous `index.json` is copied to `index.json.bak` before the
//! renames. If the second rename fails the backup is put back, and if the
//! process dies between the two renames the load path falls back to the
//! backup whose `snapshot_id` matches `vectors.json`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use prism_core::error::{PrismError, Result};
use prism_core::types::{RecordMetadata, StoredRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// File name of the metadata artifact.
pub const INDEX_FILE: &str = "index.json";

/// File name of the vector artifact.
pub const VECTORS_FILE: &str = "vectors.json";

/// Previous metadata artifact, kept while a save is committing.
pub const INDEX_BACKUP_FILE: &str = "index.json.bak";

/// Metadata artifact layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFile {
    pub snapshot_id: String,
    pub dimension: usize,
    pub saved_at: DateTime<Utc>,
    pub records: BTreeMap<String, RecordMetadata>,
}

/// Vector artifact layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorsFile {
    pub snapshot_id: String,
    pub dimension: usize,
    pub vectors: BTreeMap<String, Vec<f32>>,
}

fn index_path(dir: &Path) -> PathBuf {
    dir.join(INDEX_FILE)
}

fn vectors_path(dir: &Path) -> PathBuf {
    dir.join(VECTORS_FILE)
}

fn backup_path(dir: &Path) -> PathBuf {
    dir.join(INDEX_BACKUP_FILE)
}

/// Write a full snapshot of `records` into `dir`.
pub fn write_snapshot<'a, I>(dir: &Path, dimension: usize, records: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a str, &'a [f32], &'a RecordMetadata)>,
{
    std::fs::create_dir_all(dir).map_err(|e| {
        PrismError::Persistence(format!("Failed to create {}: {}", dir.display(), e))
    })?;

    let snapshot_id = Uuid::new_v4().to_string();
    let mut index = IndexFile {
        snapshot_id: snapshot_id.clone(),
        dimension,
        saved_at: Utc::now(),
        records: BTreeMap::new(),
    };
    let mut vectors = VectorsFile {
        snapshot_id,
        dimension,
        vectors: BTreeMap::new(),
    };
    for (record_id, vector, metadata) in records {
        index.records.insert(record_id.to_string(), metadata.clone());
        vectors.vectors.insert(record_id.to_string(), vector.to_vec());
    }

    let index_json = serde_json::to_vec_pretty(&index)?;
    let vectors_json = serde_json::to_vec(&vectors)?;

    let index_tmp = write_temp(&index_path(dir), &index_json)?;
    let vectors_tmp = match write_temp(&vectors_path(dir), &vectors_json) {
        Ok(tmp) => tmp,
        Err(e) => {
            let _ = std::fs::remove_file(&index_tmp);
            return Err(e);
        }
    };

    commit(dir, &index_tmp, &vectors_tmp, |from, to| std::fs::rename(from, to))?;

    info!(
        path = %dir.display(),
        records = index.records.len(),
        "Vector store snapshot written"
    );
    Ok(())
}

/// Read the snapshot in `dir`.
///
/// Returns `Ok(None)` when neither artifact exists. Any other inconsistency
/// is an error.
pub fn read_snapshot(dir: &Path, dimension: usize) -> Result<Option<Vec<StoredRecord>>> {
    let index_path = index_path(dir);
    let vectors_path = vectors_path(dir);

    match (index_path.exists(), vectors_path.exists()) {
        (false, false) => {
            debug!(path = %dir.display(), "No snapshot on disk");
            return Ok(None);
        }
        (true, false) => {
            return Err(PrismError::CorruptStore(format!(
                "{} exists without {}",
                INDEX_FILE, VECTORS_FILE
            )))
        }
        (false, true) => {
            return Err(PrismError::CorruptStore(format!(
                "{} exists without {}",
                VECTORS_FILE, INDEX_FILE
            )))
        }
        (true, true) => {}
    }

    let mut index: IndexFile = read_json(&index_path)?;
    let vectors: VectorsFile = read_json(&vectors_path)?;

    if index.snapshot_id != vectors.snapshot_id {
        match read_backup_index(dir, &vectors.snapshot_id) {
            Some(previous) => {
                warn!(
                    path = %dir.display(),
                    "Index does not match vectors; using the index of the previous save"
                );
                index = previous;
            }
            None => {
                return Err(PrismError::CorruptStore(format!(
                    "snapshot ids disagree ({} vs {})",
                    index.snapshot_id, vectors.snapshot_id
                )))
            }
        }
    }
    if index.dimension != dimension || vectors.dimension != dimension {
        return Err(PrismError::Persistence(format!(
            "snapshot has dimension {} but the store is configured for {}",
            index.dimension, dimension
        )));
    }
    if index.records.len() != vectors.vectors.len() {
        return Err(PrismError::CorruptStore(format!(
            "{} metadata entries but {} vectors",
            index.records.len(),
            vectors.vectors.len()
        )));
    }

    let mut vectors = vectors.vectors;
    let mut records = Vec::with_capacity(index.records.len());
    for (record_id, metadata) in index.records {
        let vector = vectors.remove(&record_id).ok_or_else(|| {
            PrismError::CorruptStore(format!("no vector for record '{}'", record_id))
        })?;
        if vector.len() != dimension {
            return Err(PrismError::CorruptStore(format!(
                "record '{}' has {} components, expected {}",
                record_id,
                vector.len(),
                dimension
            )));
        }
        records.push(StoredRecord {
            record_id,
            vector,
            metadata,
        });
    }

    Ok(Some(records))
}

/// Delete both artifacts and any index backup. Missing files are not an
/// error.
pub fn remove_snapshot(dir: &Path) -> Result<()> {
    for path in [index_path(dir), vectors_path(dir), backup_path(dir)] {
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "Snapshot artifact removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(PrismError::Persistence(format!(
                    "Failed to remove {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }
    Ok(())
}

/// Move both temp files into place with `rename_file`.
///
/// If the vectors rename fails, the previous index is restored from the
/// backup (or removed when there was none) and every temp file is deleted,
/// so the directory still holds the prior snapshot.
fn commit<R>(dir: &Path, index_tmp: &Path, vectors_tmp: &Path, rename_file: R) -> Result<()>
where
    R: Fn(&Path, &Path) -> std::io::Result<()>,
{
    let index = index_path(dir);
    let backup = backup_path(dir);
    let had_index = index.exists();

    if had_index {
        if let Err(e) = std::fs::copy(&index, &backup) {
            discard(&[index_tmp, vectors_tmp]);
            return Err(PrismError::Persistence(format!(
                "Failed to back up {}: {}",
                index.display(),
                e
            )));
        }
    }

    if let Err(e) = rename(&rename_file, index_tmp, &index) {
        discard(&[index_tmp, vectors_tmp, backup.as_path()]);
        return Err(e);
    }

    if let Err(e) = rename(&rename_file, vectors_tmp, &vectors_path(dir)) {
        let restored = if had_index {
            std::fs::rename(&backup, &index)
        } else {
            std::fs::remove_file(&index)
        };
        if let Err(restore_err) = restored {
            warn!(
                path = %index.display(),
                error = %restore_err,
                "Failed to restore the previous index"
            );
        }
        discard(&[vectors_tmp, backup.as_path()]);
        return Err(e);
    }

    discard(&[backup.as_path()]);
    Ok(())
}

/// Best-effort removal of leftover files.
fn discard(paths: &[&Path]) {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
        }
    }
}

/// The backup index, if it parses and belongs to `snapshot_id`.
fn read_backup_index(dir: &Path, snapshot_id: &str) -> Option<IndexFile> {
    let path = backup_path(dir);
    if !path.exists() {
        return None;
    }
    read_json::<IndexFile>(&path)
        .ok()
        .filter(|backup| backup.snapshot_id == snapshot_id)
}

fn write_temp(target: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let temp_path = target.with_extension("json.tmp");
    let result = File::create(&temp_path).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(PrismError::Persistence(format!(
            "Failed to write {}: {}",
            temp_path.display(),
            e
        )));
    }
    Ok(temp_path)
}

fn rename<R>(rename_file: &R, from: &Path, to: &Path) -> Result<()>
where
    R: Fn(&Path, &Path) -> std::io::Result<()>,
{
    rename_file(from, to).map_err(|e| {
        PrismError::Persistence(format!(
            "Failed to rename {} to {}: {}",
            from.display(),
            to.display(),
            e
        ))
    })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).map_err(|e| {
        PrismError::Persistence(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| PrismError::CorruptStore(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(entity: &str, dimension: &str) -> (String, Vec<f32>, RecordMetadata) {
        (
            prism_core::types::record_id(entity, dimension),
            vec![0.25, -0.5, 1.0],
            RecordMetadata::new(entity, dimension, "some content here", 1.0),
        )
    }

    fn write(dir: &Path, records: &[(String, Vec<f32>, RecordMetadata)]) -> Result<()> {
        write_snapshot(
            dir,
            3,
            records
                .iter()
                .map(|(id, v, m)| (id.as_str(), v.as_slice(), m)),
        )
    }

    #[test]
    fn test_write_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let records = vec![sample("e1", "scene_context"), sample("e2", "combined")];
        write(dir.path(), &records).unwrap();

        let loaded = read_snapshot(dir.path(), 3).unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        let first = loaded.iter().find(|r| r.record_id == "e1_scene_context").unwrap();
        assert_eq!(first.vector, vec![0.25, -0.5, 1.0]);
        assert_eq!(first.metadata.entity_id, "e1");

        // No temp files left behind.
        assert!(!dir.path().join("index.json.tmp").exists());
        assert!(!dir.path().join("vectors.json.tmp").exists());
    }

    #[test]
    fn test_failed_vectors_rename_keeps_previous_snapshot() {
        let dir = tempdir().unwrap();
        write(dir.path(), &[sample("e1", "scene_context")]).unwrap();

        let records = [sample("e1", "scene_context"), sample("e2", "semantic_tags")];
        let index_json = serde_json::to_vec(&IndexFile {
            snapshot_id: "next".to_string(),
            dimension: 3,
            saved_at: Utc::now(),
            records: records.iter().map(|(id, _, m)| (id.clone(), m.clone())).collect(),
        })
        .unwrap();
        let vectors_json = serde_json::to_vec(&VectorsFile {
            snapshot_id: "next".to_string(),
            dimension: 3,
            vectors: records.iter().map(|(id, v, _)| (id.clone(), v.clone())).collect(),
        })
        .unwrap();
        let index_tmp = write_temp(&index_path(dir.path()), &index_json).unwrap();
        let vectors_tmp = write_temp(&vectors_path(dir.path()), &vectors_json).unwrap();

        let err = commit(dir.path(), &index_tmp, &vectors_tmp, |from, to| {
            if to.ends_with(VECTORS_FILE) {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
            } else {
                std::fs::rename(from, to)
            }
        })
        .unwrap_err();
        assert!(matches!(err, PrismError::Persistence(_)));

        let loaded = read_snapshot(dir.path(), 3).unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].record_id, "e1_scene_context");
        assert!(!index_tmp.exists());
        assert!(!vectors_tmp.exists());
        assert!(!dir.path().join(INDEX_BACKUP_FILE).exists());
    }

    #[test]
    fn test_failed_first_save_leaves_no_snapshot() {
        let dir = tempdir().unwrap();
        let index_tmp = write_temp(&index_path(dir.path()), b"{}").unwrap();
        let vectors_tmp = write_temp(&vectors_path(dir.path()), b"{}").unwrap();

        commit(dir.path(), &index_tmp, &vectors_tmp, |from, to| {
            if to.ends_with(VECTORS_FILE) {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
            } else {
                std::fs::rename(from, to)
            }
        })
        .unwrap_err();

        assert!(read_snapshot(dir.path(), 3).unwrap().is_none());
        assert!(!index_tmp.exists());
        assert!(!vectors_tmp.exists());
    }

    #[test]
    fn test_interrupted_save_loads_previous_index() {
        let dir = tempdir().unwrap();
        let previous = tempdir().unwrap();
        write(dir.path(), &[sample("e1", "scene_context")]).unwrap();
        for name in [INDEX_FILE, VECTORS_FILE] {
            std::fs::copy(dir.path().join(name), previous.path().join(name)).unwrap();
        }

        // A second save that died between its two renames: new index, old
        // vectors, old index still in the backup slot.
        write(
            dir.path(),
            &[sample("e1", "scene_context"), sample("e2", "semantic_tags")],
        )
        .unwrap();
        std::fs::copy(
            previous.path().join(INDEX_FILE),
            dir.path().join(INDEX_BACKUP_FILE),
        )
        .unwrap();
        std::fs::copy(
            previous.path().join(VECTORS_FILE),
            dir.path().join(VECTORS_FILE),
        )
        .unwrap();

        let loaded = read_snapshot(dir.path(), 3).unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].record_id, "e1_scene_context");
    }

    #[test]
    fn test_read_missing_snapshot_is_none() {
        let dir = tempdir().unwrap();
        assert!(read_snapshot(dir.path(), 3).unwrap().is_none());
    }

    #[test]
    fn test_read_with_one_artifact_is_corrupt() {
        let dir = tempdir().unwrap();
        write(dir.path(), &[sample("e1", "scene_context")]).unwrap();
        std::fs::remove_file(dir.path().join(VECTORS_FILE)).unwrap();

        let err = read_snapshot(dir.path(), 3).unwrap_err();
        assert!(matches!(err, PrismError::CorruptStore(_)));
    }

    #[test]
    fn test_read_mismatched_snapshot_ids_is_corrupt() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        write(first.path(), &[sample("e1", "scene_context")]).unwrap();
        write(second.path(), &[sample("e1", "scene_context")]).unwrap();

        std::fs::copy(
            second.path().join(VECTORS_FILE),
            first.path().join(VECTORS_FILE),
        )
        .unwrap();

        let err = read_snapshot(first.path(), 3).unwrap_err();
        assert!(matches!(err, PrismError::CorruptStore(_)));
    }

    #[test]
    fn test_read_garbage_is_corrupt() {
        let dir = tempdir().unwrap();
        write(dir.path(), &[sample("e1", "scene_context")]).unwrap();
        std::fs::write(dir.path().join(INDEX_FILE), "not json").unwrap();

        let err = read_snapshot(dir.path(), 3).unwrap_err();
        assert!(matches!(err, PrismError::CorruptStore(_)));
    }

    #[test]
    fn test_read_dimension_mismatch() {
        let dir = tempdir().unwrap();
        write(dir.path(), &[sample("e1", "scene_context")]).unwrap();

        let err = read_snapshot(dir.path(), 8).unwrap_err();
        assert!(matches!(err, PrismError::Persistence(_)));
    }

    #[test]
    fn test_remove_snapshot_tolerates_missing_files() {
        let dir = tempdir().unwrap();
        remove_snapshot(dir.path()).unwrap();

        write(dir.path(), &[sample("e1", "scene_context")]).unwrap();
        remove_snapshot(dir.path()).unwrap();
        assert!(!dir.path().join(INDEX_FILE).exists());
        assert!(!dir.path().join(VECTORS_FILE).exists());
    }

    #[test]
    fn test_write_into_unwritable_location_fails() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        // A regular file where the directory should be.
        let err = write(&blocker.join("store"), &[sample("e1", "scene_context")]).unwrap_err();
        assert!(matches!(err, PrismError::Persistence(_)));
    }
}
