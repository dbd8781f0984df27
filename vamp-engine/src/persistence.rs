//! Saved vamps
//!
//! Regions are stored per song in one JSON document (`loop_data.json` in
//! the data directory), keyed by a content fingerprint so renamed or moved
//! files keep their vamps.

use crate::error::{Error, Result};
use crate::region::LoopRegion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the store inside the data directory
pub const LOOP_DATA_FILE: &str = "loop_data.json";

const CHUNK_SIZE: u64 = 4096;

/// Identity of an audio file
///
/// SHA-256 over the file size and up to three 4 KiB samples of its content
/// (head, middle, tail), so even long files hash in constant time.
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();

    let mut hasher = Sha256::new();
    hasher.update(size.to_string().as_bytes());

    hash_chunk(&mut file, 0, &mut hasher)?;
    if size > 2 * CHUNK_SIZE {
        hash_chunk(&mut file, size / 2, &mut hasher)?;
    }
    if size > 3 * CHUNK_SIZE {
        hash_chunk(&mut file, size - CHUNK_SIZE, &mut hasher)?;
    }

    let fingerprint = format!("{:x}", hasher.finalize());
    debug!("Fingerprint of {}: {}", path.display(), fingerprint);
    Ok(fingerprint)
}

fn hash_chunk(file: &mut File, offset: u64, hasher: &mut Sha256) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    let mut chunk = Vec::with_capacity(CHUNK_SIZE as usize);
    file.take(CHUNK_SIZE).read_to_end(&mut chunk)?;
    hasher.update(&chunk);
    Ok(())
}

/// Everything remembered about one song
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongRecord {
    pub last_known_name: String,
    pub last_known_path: PathBuf,
    #[serde(default)]
    pub regions: Vec<LoopRegion>,
    /// Index into `regions` of the armed vamp
    #[serde(default)]
    pub selected: Option<usize>,
    pub saved_at: DateTime<Utc>,
}

impl SongRecord {
    pub fn new(path: &Path, regions: Vec<LoopRegion>, selected: Option<usize>) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            last_known_name: name,
            last_known_path: path.to_path_buf(),
            selected: selected.filter(|i| *i < regions.len()),
            regions,
            saved_at: Utc::now(),
        }
    }

    /// The selected region, falling back to the first one
    pub fn selected_region(&self) -> Option<&LoopRegion> {
        self.selected
            .and_then(|i| self.regions.get(i))
            .or_else(|| self.regions.first())
    }
}

/// JSON store of [`SongRecord`]s keyed by fingerprint
#[derive(Debug)]
pub struct SongStore {
    path: PathBuf,
    records: BTreeMap<String, SongRecord>,
}

impl SongStore {
    /// Open (or start) the store in `data_dir`
    ///
    /// A missing file gives an empty store. An unreadable document is
    /// logged and replaced by an empty store; it is only overwritten on the
    /// next [`save`](Self::save).
    pub fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(LOOP_DATA_FILE);

        let records = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Could not parse {}: {}; starting empty", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!("Song store {} ({} songs)", path.display(), records.len());
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, song_id: &str) -> Option<&SongRecord> {
        self.records.get(song_id)
    }

    pub fn put(&mut self, song_id: impl Into<String>, record: SongRecord) {
        self.records.insert(song_id.into(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the store to disk
    ///
    /// Writes a sibling temp file and renames it over the store, so a crash
    /// mid-write leaves the previous document intact.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.records)
            .map_err(|e| Error::Persistence(format!("Failed to serialize song store: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Saved {} songs to {}", self.records.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vamp_common::config::EngineConfig;
    use vamp_common::timing::seconds_to_ticks;

    fn region(name: &str, loop_in: f64, loop_out: f64) -> LoopRegion {
        let mut r = LoopRegion::new(
            name,
            seconds_to_ticks(loop_in),
            seconds_to_ticks(loop_out),
            &EngineConfig::default(),
        );
        r.crossfade_ms = 35;
        r.exit_fade_ms = 1234;
        r.overrides.exit_patch_duration_ms = Some(100);
        r
    }

    #[test]
    fn test_round_trip_preserves_regions_exactly() {
        let dir = TempDir::new().unwrap();
        let regions = vec![region("Verse vamp", 60.0, 120.0), region("Tag", 200.5, 201.75)];

        let mut store = SongStore::open(dir.path()).unwrap();
        store.put("abc", SongRecord::new(Path::new("/music/song.flac"), regions.clone(), Some(1)));
        store.save().unwrap();

        let reopened = SongStore::open(dir.path()).unwrap();
        let record = reopened.get("abc").unwrap();
        assert_eq!(record.regions, regions);
        assert_eq!(record.last_known_name, "song.flac");
        assert_eq!(record.selected_region().unwrap().name, "Tag");
    }

    #[test]
    fn test_missing_store_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = SongStore::open(&dir.path().join("nested")).unwrap();
        assert!(store.is_empty());
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn test_corrupt_store_starts_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(LOOP_DATA_FILE), "{ not json").unwrap();

        let store = SongStore::open(dir.path()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_selected_out_of_range_falls_back_to_first() {
        let record = SongRecord::new(Path::new("a.wav"), vec![region("A", 1.0, 2.0)], Some(4));
        assert_eq!(record.selected, None);
        assert_eq!(record.selected_region().unwrap().name, "A");
    }

    #[test]
    fn test_fingerprint_depends_on_content_not_name() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("renamed.wav");
        fs::write(&a, &data).unwrap();
        fs::write(&b, &data).unwrap();

        let fa = fingerprint_file(&a).unwrap();
        assert_eq!(fa, fingerprint_file(&b).unwrap());
        assert_eq!(fa.len(), 64);

        // A change in the tail chunk changes the identity
        let mut changed = data.clone();
        *changed.last_mut().unwrap() ^= 0xff;
        fs::write(&b, &changed).unwrap();
        assert_ne!(fa, fingerprint_file(&b).unwrap());
    }

    #[test]
    fn test_fingerprint_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            fingerprint_file(&dir.path().join("nope.wav")),
            Err(Error::Io(_))
        ));
    }
}
