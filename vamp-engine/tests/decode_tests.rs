//! Decoding and song session tests over real WAV files

mod helpers;

use helpers::{generate_ramp_wav, generate_sine_wav};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use vamp_common::config::EngineConfig;
use vamp_common::events::EventBus;
use vamp_common::timing::seconds_to_ticks;
use vamp_engine::audio::{load_track, PcmSource, SymphoniaSource};
use vamp_engine::persistence::{SongRecord, SongStore, LOOP_DATA_FILE};
use vamp_engine::playback::{
    DeckSettings, PlaybackModeController, PlayerHandle, PositionMonitor, SoftwareDeck,
};
use vamp_engine::region::LoopRegion;
use vamp_engine::session::Session;
use vamp_engine::Error;

#[test]
fn test_decode_float_wav_frame_exact() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ramp.wav");
    generate_ramp_wav(&path, 4000, 8000).unwrap();

    let decoded = SymphoniaSource.decode(&path).unwrap();
    assert_eq!(decoded.sample_rate, 8000);
    assert_eq!(decoded.channels, 2);
    assert_eq!(decoded.samples.len(), 8000);

    for (i, frame) in decoded.samples.chunks(2).enumerate() {
        assert_eq!(frame[0], i as f32 / 4000.0, "frame {}", i);
        assert_eq!(frame[1], 0.0);
    }
}

#[test]
fn test_decode_16bit_wav() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sine.wav");
    generate_sine_wav(&path, 500, 440.0, 0.5, 44_100, 1).unwrap();

    let decoded = SymphoniaSource.decode(&path).unwrap();
    assert_eq!(decoded.sample_rate, 44_100);
    assert_eq!(decoded.channels, 1);
    assert_eq!(decoded.samples.len(), 22_050);

    let peak = decoded.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!((peak - 0.5).abs() < 0.01, "peak {}", peak);
}

#[test]
fn test_load_track_identity_follows_content() {
    let dir = TempDir::new().unwrap();
    let original = dir.path().join("song.wav");
    let renamed = dir.path().join("moved.wav");
    generate_sine_wav(&original, 1000, 220.0, 0.5, 8000, 2).unwrap();
    std::fs::copy(&original, &renamed).unwrap();

    let a = load_track(&SymphoniaSource, &original).unwrap();
    let b = load_track(&SymphoniaSource, &renamed).unwrap();

    assert_eq!(a.song_id(), b.song_id());
    assert_eq!(a.song_id().len(), 64);
    assert_eq!(a.frames(), 8000);
    assert_eq!(a.duration_ticks(), seconds_to_ticks(1.0));
    assert_eq!(a.path(), original.as_path());
}

#[test]
fn test_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let result = load_track(&SymphoniaSource, &dir.path().join("absent.flac"));
    assert!(matches!(result, Err(Error::Decode(_))));
}

#[test]
fn test_garbage_file_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("noise.wav");
    let bytes: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect();
    std::fs::write(&path, bytes).unwrap();

    let result = SymphoniaSource.decode(&path);
    assert!(matches!(
        result,
        Err(Error::UnsupportedFormat(_)) | Err(Error::Decode(_))
    ));
}

fn spawn_player() -> PlayerHandle {
    let config = EngineConfig::default();
    let deck = SoftwareDeck::new(DeckSettings::default(), 44_100, 2);
    let controller = PlaybackModeController::new(
        config.clone(),
        EventBus::new(config.event_capacity),
        Box::new(deck.transport()),
        Box::new(deck.looper()),
    );
    PositionMonitor::spawn(controller).0
}

fn open_session(data_dir: &Path) -> Session {
    let store = SongStore::open(data_dir).unwrap();
    Session::new(spawn_player(), Arc::new(SymphoniaSource), store)
}

#[tokio::test]
async fn test_session_vamps_survive_rename() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    let song = dir.path().join("song.wav");
    generate_sine_wav(&song, 3000, 220.0, 0.5, 8000, 1).unwrap();

    let mut session = open_session(&data_dir);
    let track = session.open(&song).await.unwrap();
    assert!(session.regions().is_empty());

    session
        .set_loop_points(seconds_to_ticks(1.0), seconds_to_ticks(2.0))
        .await
        .unwrap();
    session.save().unwrap();
    assert!(data_dir.join(LOOP_DATA_FILE).is_file());
    session.player().shutdown().await.unwrap();

    let moved = dir.path().join("renamed.wav");
    std::fs::rename(&song, &moved).unwrap();

    let mut reopened = open_session(&data_dir);
    let again = reopened.open(&moved).await.unwrap();
    assert_eq!(again.song_id(), track.song_id());
    assert_eq!(reopened.regions().len(), 1);
    assert_eq!(reopened.selected(), Some(0));

    let snapshot = reopened.player().snapshot().await.unwrap();
    let armed = snapshot.region.unwrap();
    assert_eq!(armed.loop_in, seconds_to_ticks(1.0));
    assert_eq!(armed.loop_out, seconds_to_ticks(2.0));
    assert_eq!(armed, reopened.regions()[0]);
}

#[tokio::test]
async fn test_session_region_bookkeeping() {
    let dir = TempDir::new().unwrap();
    let song = dir.path().join("song.wav");
    generate_sine_wav(&song, 5000, 220.0, 0.5, 8000, 1).unwrap();

    let mut session = open_session(&dir.path().join("data"));
    session.open(&song).await.unwrap();
    let config = EngineConfig::default();

    session
        .add_region(LoopRegion::new("Intro", 0, seconds_to_ticks(1.0), &config))
        .await
        .unwrap();
    session
        .add_region(LoopRegion::new(
            "Outro",
            seconds_to_ticks(3.0),
            seconds_to_ticks(4.0),
            &config,
        ))
        .await
        .unwrap();
    assert_eq!(session.selected(), Some(1));

    // A region past the end of the song is rejected and not added
    let too_long = LoopRegion::new("Bad", seconds_to_ticks(4.5), seconds_to_ticks(9.0), &config);
    assert!(matches!(
        session.add_region(too_long).await,
        Err(Error::InsufficientSamples { .. })
    ));
    assert_eq!(session.regions().len(), 2);

    session.select_region(0).await.unwrap();
    let armed = session.player().snapshot().await.unwrap().region.unwrap();
    assert_eq!(armed.name, "Intro");

    let removed = session.remove_region(0).await.unwrap();
    assert_eq!(removed.name, "Intro");
    assert_eq!(session.selected(), None);
    assert!(session.player().snapshot().await.unwrap().region.is_none());

    assert!(matches!(
        session.select_region(5).await,
        Err(Error::InvalidRegion(_))
    ));
}

#[tokio::test]
async fn test_saved_vamp_that_no_longer_fits_is_not_selected() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    let song = dir.path().join("song.wav");
    generate_sine_wav(&song, 3000, 220.0, 0.5, 8000, 1).unwrap();
    let song_id = load_track(&SymphoniaSource, &song).unwrap().song_id().to_string();

    let config = EngineConfig::default();
    let stale = LoopRegion::new("Stale", seconds_to_ticks(2.0), seconds_to_ticks(9.0), &config);
    let mut store = SongStore::open(&data_dir).unwrap();
    store.put(song_id, SongRecord::new(&song, vec![stale.clone()], Some(0)));
    store.save().unwrap();

    let mut session = open_session(&data_dir);
    session.open(&song).await.unwrap();
    assert_eq!(session.regions().len(), 1);
    assert_eq!(session.selected(), None);
    assert!(session.player().snapshot().await.unwrap().region.is_none());

    // New loop points start a new vamp instead of overwriting the saved one
    session
        .set_loop_points(seconds_to_ticks(1.0), seconds_to_ticks(2.0))
        .await
        .unwrap();
    assert_eq!(session.regions().len(), 2);
    assert_eq!(session.regions()[0], stale);
    assert_eq!(session.selected(), Some(1));
}
