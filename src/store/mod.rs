//! Recording persistence.
//!
//! A directory of JSON documents, one per recording, named `<id>.json`.
//! Writes are atomic (temp file + rename), so a recording is either fully
//! saved or absent. Failures come back as typed errors; nothing here panics
//! past the storage boundary.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, warn};

use crate::midi::{Note, Recording, SustainEvent};

/// Errors surfaced by the recording store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("recording document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid recording document: {0}")]
    InvalidDocument(String),
}

/// File-backed store of recordings.
pub struct RecordingStore {
    dir: PathBuf,
}

impl RecordingStore {
    /// Opens (creating if needed) a store at the given directory.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory that holds the recording documents
    ///
    /// # Errors
    ///
    /// I/O failure creating the directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Path of a recording document.
    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Lists all recordings, newest first.
    ///
    /// Unreadable or corrupt documents are skipped with a warning rather
    /// than failing the whole listing.
    pub fn list(&self) -> Result<Vec<Recording>, StoreError> {
        let mut recordings = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|text| serde_json::from_str::<Recording>(&text).map_err(StoreError::from))
            {
                Ok(recording) => recordings.push(recording),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable recording");
                }
            }
        }
        recordings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(recordings)
    }

    /// Loads one recording by id.
    ///
    /// # Returns
    ///
    /// The recording, or None when no document with that id exists
    pub fn get(&self, id: &str) -> Result<Option<Recording>, StoreError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Saves a new recording assembled from a finished session.
    ///
    /// # Arguments
    ///
    /// * `name` - Display name for the take
    /// * `notes` - Notes in onset order
    /// * `sustain_events` - Pedal transitions
    ///
    /// # Returns
    ///
    /// The saved recording, with its generated id
    pub fn save(
        &self,
        name: impl Into<String>,
        notes: Vec<Note>,
        sustain_events: Vec<SustainEvent>,
    ) -> Result<Recording, StoreError> {
        let recording = Recording::new(name, notes, sustain_events);
        self.write_document(&recording)?;
        info!(id = %recording.id, notes = recording.note_count(), "recording saved");
        Ok(recording)
    }

    /// Renames a recording.
    ///
    /// # Returns
    ///
    /// false when no recording with that id exists
    pub fn rename(&self, id: &str, name: impl Into<String>) -> Result<bool, StoreError> {
        let Some(mut recording) = self.get(id)? else {
            return Ok(false);
        };
        recording.name = name.into();
        self.write_document(&recording)?;
        Ok(true)
    }

    /// Deletes a recording.
    ///
    /// # Returns
    ///
    /// false when no recording with that id exists
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        info!(id, "recording deleted");
        Ok(true)
    }

    /// Deletes every recording in the store.
    #[allow(dead_code)]
    pub fn delete_all(&self) -> Result<bool, StoreError> {
        for recording in self.list()? {
            self.delete(&recording.id)?;
        }
        Ok(true)
    }

    /// Serializes a recording to its JSON document form.
    ///
    /// # Returns
    ///
    /// The document, or None when no recording with that id exists
    pub fn export(&self, id: &str) -> Result<Option<String>, StoreError> {
        let Some(recording) = self.get(id)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::to_string_pretty(&recording)?))
    }

    /// Imports a recording from a serialized JSON document.
    ///
    /// Validates that `notes` is present and array-typed before accepting
    /// anything. The imported recording gets a fresh id and created-at, so
    /// an import never collides with an existing document.
    ///
    /// # Arguments
    ///
    /// * `serialized` - A JSON document in the export format
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidDocument`] for structurally wrong documents,
    /// [`StoreError::Json`] for documents that are not JSON at all.
    pub fn import(&self, serialized: &str) -> Result<Recording, StoreError> {
        let value: Value = serde_json::from_str(serialized)?;
        let Some(notes_value) = value.get("notes") else {
            return Err(StoreError::InvalidDocument(
                "missing required field: notes".into(),
            ));
        };
        if !notes_value.is_array() {
            return Err(StoreError::InvalidDocument("notes must be an array".into()));
        }

        let notes: Vec<Note> = serde_json::from_value(notes_value.clone())?;
        let sustain_events: Vec<SustainEvent> = match value.get("sustainEvents") {
            Some(v) => serde_json::from_value(v.clone())?,
            None => match value.get("sustain_events") {
                Some(v) => serde_json::from_value(v.clone())?,
                None => Vec::new(),
            },
        };
        let name = value
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("Imported recording")
            .to_string();

        let recording = Recording::new(name, notes, sustain_events);
        self.write_document(&recording)?;
        info!(id = %recording.id, "recording imported");
        Ok(recording)
    }

    /// Writes a recording document atomically: temp file, then rename.
    fn write_document(&self, recording: &Recording) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(recording)?;
        let path = self.path_for(&recording.id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::Note;
    use uuid::Uuid;

    fn temp_store() -> RecordingStore {
        let dir = std::env::temp_dir().join(format!("keyfall-store-{}", Uuid::new_v4()));
        RecordingStore::open(dir).unwrap()
    }

    fn sample_notes() -> Vec<Note> {
        vec![
            Note::from_absolute(60, 100, 400, 100, false),
            Note::from_absolute(64, 500, 900, 100, true),
        ]
    }

    fn sample_sustain() -> Vec<SustainEvent> {
        vec![SustainEvent {
            onset_offset_ms: 350,
            is_active: true,
        }]
    }

    #[test]
    fn test_save_get_round_trip() {
        let store = temp_store();
        let saved = store.save("Take 1", sample_notes(), sample_sustain()).unwrap();
        let loaded = store.get(&saved.id).unwrap().unwrap();
        assert_eq!(loaded, saved);
    }

    #[test]
    fn test_get_missing() {
        let store = temp_store();
        assert!(store.get("nope").unwrap().is_none());
        assert!(store.export("nope").unwrap().is_none());
    }

    #[test]
    fn test_list_newest_first() {
        let store = temp_store();
        let mut a = Recording::new("old", sample_notes(), Vec::new());
        a.created_at = 100;
        store.write_document(&a).unwrap();
        let mut b = Recording::new("new", sample_notes(), Vec::new());
        b.created_at = 200;
        store.write_document(&b).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "new");
    }

    #[test]
    fn test_rename() {
        let store = temp_store();
        let saved = store.save("Take 1", sample_notes(), Vec::new()).unwrap();
        assert!(store.rename(&saved.id, "Renamed").unwrap());
        assert_eq!(store.get(&saved.id).unwrap().unwrap().name, "Renamed");
        assert!(!store.rename("missing", "x").unwrap());
    }

    #[test]
    fn test_delete() {
        let store = temp_store();
        let saved = store.save("Take 1", sample_notes(), Vec::new()).unwrap();
        assert!(store.delete(&saved.id).unwrap());
        assert!(!store.delete(&saved.id).unwrap());
        assert!(store.get(&saved.id).unwrap().is_none());
    }

    #[test]
    fn test_delete_all() {
        let store = temp_store();
        store.save("a", sample_notes(), Vec::new()).unwrap();
        store.save("b", sample_notes(), Vec::new()).unwrap();
        assert!(store.delete_all().unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_export_import_round_trip() {
        let store = temp_store();
        let saved = store
            .save("Take 1", sample_notes(), sample_sustain())
            .unwrap();
        let exported = store.export(&saved.id).unwrap().unwrap();
        let imported = store.import(&exported).unwrap();

        // Content survives; id and created-at are freshly generated.
        assert_eq!(imported.notes, saved.notes);
        assert_eq!(imported.sustain_events, saved.sustain_events);
        assert_eq!(imported.name, saved.name);
        assert_ne!(imported.id, saved.id);
    }

    #[test]
    fn test_import_rejects_missing_notes() {
        let store = temp_store();
        let err = store.import(r#"{"name":"x"}"#).unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
    }

    #[test]
    fn test_import_rejects_non_array_notes() {
        let store = temp_store();
        let err = store.import(r#"{"name":"x","notes":"sixty"}"#).unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
    }

    #[test]
    fn test_import_rejects_garbage() {
        let store = temp_store();
        assert!(matches!(
            store.import("not json").unwrap_err(),
            StoreError::Json(_)
        ));
    }

    #[test]
    fn test_corrupt_document_skipped_in_list() {
        let store = temp_store();
        store.save("good", sample_notes(), Vec::new()).unwrap();
        fs::write(store.dir.join("bad.json"), "{broken").unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "good");
    }
}
