//! Version snapshots: full serialized copies of canvas + character state
//! saved on explicit user request, recallable later.
//!
//! Snapshots are immutable once created. The store enforces two rules the
//! surrounding UI used to promise but never guaranteed: the currently-active
//! version cannot be deleted, and saving past `max_versions` evicts the
//! oldest snapshot.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::canvas::CanvasState;
use crate::log_err;
use crate::project::{
    decode_project, encode_png, encode_project, CharacterMetadata, DecodedProject, ProjectError,
};
use crate::tools::BrushSettings;

/// Default snapshot cap.
pub const DEFAULT_MAX_VERSIONS: usize = 20;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum VersionError {
    Unknown(Uuid),
    /// The currently-active version cannot be deleted.
    ActiveVersion,
    /// The snapshot payload failed to serialize or deserialize. On revert
    /// this leaves the live state untouched.
    Corrupt(ProjectError),
}

impl std::fmt::Display for VersionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionError::Unknown(id) => write!(f, "No version with id {}", id),
            VersionError::ActiveVersion => {
                write!(f, "The active version cannot be deleted")
            }
            VersionError::Corrupt(e) => write!(f, "Snapshot data is unusable: {}", e),
        }
    }
}

impl std::error::Error for VersionError {}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Descriptive stats embedded in each snapshot for list UIs.
#[derive(Clone, Debug)]
pub struct SnapshotMetadata {
    pub width: u32,
    pub height: u32,
    pub layer_count: usize,
    pub has_drawing: bool,
}

/// One immutable saved version.
pub struct VersionSnapshot {
    pub id: Uuid,
    pub name: String,
    /// Downscaled composite, PNG-encoded. Empty if thumbnail encoding failed
    /// (never fatal).
    pub thumbnail: Vec<u8>,
    /// Unix milliseconds at save time.
    pub timestamp: u64,
    pub description: String,
    /// Full project JSON, including every layer buffer re-encoded as PNG.
    pub serialized: String,
    pub metadata: SnapshotMetadata,
}

// ============================================================================
// STORE
// ============================================================================

pub struct VersionStore {
    versions: Vec<VersionSnapshot>,
    /// Index of the version the live state was last saved to or reverted
    /// from; `None` before the first save.
    current: Option<usize>,
    max_versions: usize,
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_VERSIONS)
    }
}

impl VersionStore {
    pub fn new(max_versions: usize) -> Self {
        Self {
            versions: Vec::new(),
            current: None,
            max_versions: max_versions.max(1),
        }
    }

    pub fn versions(&self) -> &[VersionSnapshot] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&VersionSnapshot> {
        self.current.and_then(|i| self.versions.get(i))
    }

    /// Serialize the live state into a new snapshot. The snapshot becomes the
    /// current version; if the store grows past `max_versions` the oldest
    /// snapshot is evicted.
    pub fn save_version(
        &mut self,
        canvas: &CanvasState,
        character: &CharacterMetadata,
        selected_pose: Option<&str>,
        brush_settings: &BrushSettings,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<&VersionSnapshot, VersionError> {
        let serialized = encode_project(canvas, character, selected_pose, brush_settings)
            .map_err(VersionError::Corrupt)?;

        let thumbnail = match encode_png(&canvas.thumbnail()) {
            Ok(bytes) => bytes,
            Err(e) => {
                log_err!("Version thumbnail encoding failed: {}", e);
                Vec::new()
            }
        };

        let snapshot = VersionSnapshot {
            id: Uuid::new_v4(),
            name: name.into(),
            thumbnail,
            timestamp: unix_millis(),
            description: description.into(),
            serialized,
            metadata: SnapshotMetadata {
                width: canvas.width,
                height: canvas.height,
                layer_count: canvas.layers.len(),
                has_drawing: canvas.has_drawing,
            },
        };

        self.versions.push(snapshot);
        self.current = Some(self.versions.len() - 1);
        self.evict();
        Ok(&self.versions[self.current.expect("current set above")])
    }

    /// Oldest-first eviction down to `max_versions`, keeping `current`
    /// pointing at the same snapshot.
    fn evict(&mut self) {
        while self.versions.len() > self.max_versions {
            self.versions.remove(0);
            self.current = match self.current {
                Some(0) | None => None,
                Some(i) => Some(i - 1),
            };
        }
    }

    /// Deserialize a snapshot back into live state. A corrupt snapshot is
    /// logged and reported without touching the live state or `current`.
    pub fn revert_to_version(&mut self, id: Uuid) -> Result<DecodedProject, VersionError> {
        let index = self
            .versions
            .iter()
            .position(|v| v.id == id)
            .ok_or(VersionError::Unknown(id))?;

        match decode_project(&self.versions[index].serialized) {
            Ok(decoded) => {
                self.current = Some(index);
                Ok(decoded)
            }
            Err(e) => {
                log_err!("Revert to version {} failed: {}", id, e);
                Err(VersionError::Corrupt(e))
            }
        }
    }

    /// Delete a snapshot. The active version is protected here, not just in
    /// the UI.
    pub fn delete_version(&mut self, id: Uuid) -> Result<(), VersionError> {
        let index = self
            .versions
            .iter()
            .position(|v| v.id == id)
            .ok_or(VersionError::Unknown(id))?;
        if self.current == Some(index) {
            return Err(VersionError::ActiveVersion);
        }
        self.versions.remove(index);
        if let Some(cur) = self.current
            && cur > index
        {
            self.current = Some(cur - 1);
        }
        Ok(())
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod test {
    use super::*;
    use image::Rgba;

    fn save(
        store: &mut VersionStore,
        canvas: &CanvasState,
        name: &str,
        description: &str,
    ) -> Uuid {
        store
            .save_version(
                canvas,
                &CharacterMetadata::default(),
                None,
                &BrushSettings::default(),
                name,
                description,
            )
            .unwrap()
            .id
    }

    #[test]
    fn saving_two_versions_advances_current() {
        let canvas = CanvasState::new(32, 32);
        let mut store = VersionStore::new(10);
        save(&mut store, &canvas, "v1", "test");
        save(&mut store, &canvas, "v2", "test2");

        assert_eq!(store.len(), 2);
        assert_eq!(store.current_index(), Some(1));
        assert_eq!(store.current().unwrap().name, "v2");
        assert_eq!(store.versions()[0].name, "v1");
    }

    #[test]
    fn revert_restores_saved_state() {
        let mut canvas = CanvasState::new(32, 32);
        let mut store = VersionStore::new(10);

        let sketch = canvas.add_layer("Sketch");
        canvas
            .layer_mut(sketch)
            .unwrap()
            .pixels
            .put_pixel(5, 5, Rgba([255, 0, 0, 255]));
        let v1 = save(&mut store, &canvas, "v1", "two layers");

        canvas.delete_layer(sketch).unwrap();
        assert_eq!(canvas.layers.len(), 1);

        let decoded = store.revert_to_version(v1).unwrap();
        assert_eq!(decoded.canvas.layers.len(), 2);
        assert_eq!(
            *decoded.canvas.layers[1].pixels.get_pixel(5, 5),
            Rgba([255, 0, 0, 255])
        );
        assert_eq!(store.current_index(), Some(0));
    }

    #[test]
    fn corrupt_snapshot_reverts_to_nothing() {
        let canvas = CanvasState::new(16, 16);
        let mut store = VersionStore::new(10);
        let v1 = save(&mut store, &canvas, "v1", "ok");
        save(&mut store, &canvas, "v2", "ok");
        // Sabotage the first snapshot's payload.
        store.versions[0].serialized = "{broken".into();

        match store.revert_to_version(v1) {
            Err(VersionError::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {:?}", other.err()),
        }
        // current still points at v2; nothing moved.
        assert_eq!(store.current_index(), Some(1));
    }

    #[test]
    fn active_version_cannot_be_deleted() {
        let canvas = CanvasState::new(16, 16);
        let mut store = VersionStore::new(10);
        let v1 = save(&mut store, &canvas, "v1", "");
        let v2 = save(&mut store, &canvas, "v2", "");

        assert!(matches!(
            store.delete_version(v2),
            Err(VersionError::ActiveVersion)
        ));
        store.delete_version(v1).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.current().unwrap().id, v2);
    }

    #[test]
    fn eviction_drops_oldest_beyond_max() {
        let canvas = CanvasState::new(16, 16);
        let mut store = VersionStore::new(3);
        save(&mut store, &canvas, "v1", "");
        save(&mut store, &canvas, "v2", "");
        save(&mut store, &canvas, "v3", "");
        save(&mut store, &canvas, "v4", "");

        assert_eq!(store.len(), 3);
        assert_eq!(store.versions()[0].name, "v2");
        assert_eq!(store.current().unwrap().name, "v4");
    }

    #[test]
    fn snapshot_metadata_reflects_canvas() {
        let mut canvas = CanvasState::new(40, 30);
        canvas.add_layer("Ink");
        let mut store = VersionStore::default();
        save(&mut store, &canvas, "v1", "");
        let snapshot = store.current().unwrap();
        assert_eq!(snapshot.metadata.width, 40);
        assert_eq!(snapshot.metadata.layer_count, 2);
        assert!(!snapshot.thumbnail.is_empty());
        assert!(snapshot.timestamp > 0);
    }
}
