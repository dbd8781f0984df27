//! Song sessions
//!
//! A [`Session`] opens songs into a running player and keeps the song's
//! named vamps. Only the selected vamp is armed in the player; the others
//! are kept for the next save.

use crate::audio::{load_track, PcmSource, Track};
use crate::error::{Error, Result};
use crate::persistence::{SongRecord, SongStore};
use crate::playback::PlayerHandle;
use crate::region::LoopRegion;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

struct OpenSong {
    song_id: String,
    path: PathBuf,
    regions: Vec<LoopRegion>,
    selected: Option<usize>,
}

/// Song loading and vamp bookkeeping on top of a [`PlayerHandle`]
pub struct Session {
    player: PlayerHandle,
    source: Arc<dyn PcmSource>,
    store: SongStore,
    song: Option<OpenSong>,
}

impl Session {
    pub fn new(player: PlayerHandle, source: Arc<dyn PcmSource>, store: SongStore) -> Self {
        Self {
            player,
            source,
            store,
            song: None,
        }
    }

    pub fn player(&self) -> &PlayerHandle {
        &self.player
    }

    pub fn store(&self) -> &SongStore {
        &self.store
    }

    /// Identity of the open song
    pub fn song_id(&self) -> Option<&str> {
        self.song.as_ref().map(|song| song.song_id.as_str())
    }

    pub fn regions(&self) -> &[LoopRegion] {
        self.song.as_ref().map_or(&[], |song| song.regions.as_slice())
    }

    pub fn selected(&self) -> Option<usize> {
        self.song.as_ref().and_then(|song| song.selected)
    }

    /// Decode `path` and load it into the player with its saved vamps
    ///
    /// # Errors
    /// `Decode` / `UnsupportedFormat` / `Io`; the previous song stays
    /// loaded.
    pub async fn open(&mut self, path: &Path) -> Result<Arc<Track>> {
        let source = Arc::clone(&self.source);
        let decode_path = path.to_path_buf();
        let track = tokio::task::spawn_blocking(move || load_track(source.as_ref(), &decode_path))
            .await
            .map_err(|e| Error::Decode(format!("Decode task failed: {}", e)))??;
        let track = Arc::new(track);

        let (regions, mut selected, armed) = match self.store.get(track.song_id()) {
            Some(record) => {
                info!(
                    "Found {} saved vamps for {}",
                    record.regions.len(),
                    record.last_known_name
                );
                let selected = record
                    .selected
                    .filter(|i| *i < record.regions.len())
                    .or(if record.regions.is_empty() { None } else { Some(0) });
                let armed = record.selected_region().cloned();
                (record.regions.clone(), selected, armed)
            }
            None => (Vec::new(), None, None),
        };

        let requested = armed.is_some();
        self.player.load_song(Arc::clone(&track), armed).await?;

        // The player drops a saved vamp that no longer fits the track
        if requested && self.player.snapshot().await?.region.is_none() {
            warn!(
                "Saved vamp for {} was not armed; nothing selected",
                path.display()
            );
            selected = None;
        }

        self.song = Some(OpenSong {
            song_id: track.song_id().to_string(),
            path: path.to_path_buf(),
            regions,
            selected,
        });
        Ok(track)
    }

    /// Add a vamp and arm it
    ///
    /// The player validates the region first; a rejected vamp is not added.
    pub async fn add_region(&mut self, region: LoopRegion) -> Result<u64> {
        if self.song.is_none() {
            return Err(Error::NotLoaded);
        }
        let version = self.player.set_region(region).await?;
        let armed = self.armed_region().await?;

        if let Some(song) = self.song.as_mut() {
            song.regions.push(armed);
            song.selected = Some(song.regions.len() - 1);
        }
        Ok(version)
    }

    /// Arm the vamp at `index`
    pub async fn select_region(&mut self, index: usize) -> Result<u64> {
        let region = self
            .regions()
            .get(index)
            .cloned()
            .ok_or_else(|| Error::InvalidRegion(format!("no vamp at index {}", index)))?;
        let version = self.player.set_region(region).await?;
        if let Some(song) = self.song.as_mut() {
            song.selected = Some(index);
        }
        Ok(version)
    }

    /// Move the loop points of the selected vamp (creating one if none)
    pub async fn set_loop_points(&mut self, loop_in: i64, loop_out: i64) -> Result<u64> {
        if self.song.is_none() {
            return Err(Error::NotLoaded);
        }
        let version = self.player.set_loop_points(loop_in, loop_out).await?;
        let armed = self.armed_region().await?;

        if let Some(song) = self.song.as_mut() {
            match song.selected.and_then(|i| song.regions.get_mut(i)) {
                Some(slot) => *slot = armed,
                None => {
                    song.regions.push(armed);
                    song.selected = Some(song.regions.len() - 1);
                }
            }
        }
        Ok(version)
    }

    /// Drop the vamp at `index`; disarms it when it was selected
    pub async fn remove_region(&mut self, index: usize) -> Result<LoopRegion> {
        let song = self.song.as_mut().ok_or(Error::NotLoaded)?;
        if index >= song.regions.len() {
            return Err(Error::InvalidRegion(format!("no vamp at index {}", index)));
        }
        let removed = song.regions.remove(index);
        let was_selected = song.selected == Some(index);
        song.selected = match song.selected {
            Some(i) if i == index => None,
            Some(i) if i > index => Some(i - 1),
            other => other,
        };
        if was_selected {
            self.player.clear_region().await?;
        }
        Ok(removed)
    }

    /// Persist the open song's vamps
    pub fn save(&mut self) -> Result<()> {
        let song = self.song.as_ref().ok_or(Error::NotLoaded)?;
        let record = SongRecord::new(&song.path, song.regions.clone(), song.selected);
        self.store.put(song.song_id.clone(), record);
        self.store.save()?;
        info!("Saved {} vamps for {}", song.regions.len(), song.path.display());
        Ok(())
    }

    /// The region as the player armed it (loop points snapped to frames)
    async fn armed_region(&self) -> Result<LoopRegion> {
        self.player
            .snapshot()
            .await?
            .region
            .ok_or(Error::NotLoaded)
    }
}
