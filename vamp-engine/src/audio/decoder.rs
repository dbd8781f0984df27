//! PCM source: whole-file decoding using symphonia
//!
//! The engine needs random access to every frame of the song (loop slices,
//! exit patches, seeking), so files are decoded in full before a song is
//! loaded. Decoding is blocking; async callers run it on the blocking pool.

use crate::audio::Track;
use crate::error::{Error, Result};
use crate::persistence::fingerprint_file;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

/// Decoded interleaved PCM at the file's native rate and channel count
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Anything that can turn a file into PCM
pub trait PcmSource: Send + Sync {
    /// Decode the whole file
    ///
    /// # Errors
    /// - `UnsupportedFormat`: no demuxer or codec for the file
    /// - `Decode`: unreadable file or corrupt stream
    fn decode(&self, path: &Path) -> Result<DecodedAudio>;
}

/// Default PCM source backed by symphonia
///
/// Supports MP3, FLAC, AAC/M4A, Vorbis and WAV.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaSource;

impl PcmSource for SymphoniaSource {
    fn decode(&self, path: &Path) -> Result<DecodedAudio> {
        debug!("Decoding entire file: {}", path.display());

        let file = std::fs::File::open(path)
            .map_err(|e| Error::Decode(format!("Failed to open file {}: {}", path.display(), e)))?;

        // Create a hint to help the format registry guess the format
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        decode_stream(Box::new(file), &hint).map_err(|e| match e {
            Error::UnsupportedFormat(msg) => {
                Error::UnsupportedFormat(format!("{}: {}", path.display(), msg))
            }
            Error::Decode(msg) => Error::Decode(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }
}

/// Decode every packet of the first audio track in `source`
///
/// A read failure mid-stream is an error, never a shortened track.
fn decode_stream(source: Box<dyn MediaSource>, hint: &Hint) -> Result<DecodedAudio> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::UnsupportedFormat(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::UnsupportedFormat("No audio track found".to_string()))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::UnsupportedFormat(format!("Failed to create decoder: {}", e)))?;

    let mut samples = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut buf_frames = 0u64;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                debug!("Reached end of file");
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                return Err(Error::Decode(
                    "Stream reset required mid-decode".to_string(),
                ));
            }
            Err(e) => {
                warn!("Error reading packet: {}", e);
                return Err(Error::Decode(format!("Error reading packet: {}", e)));
            }
        };

        // Skip packets for other tracks
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => return Err(Error::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        channels.get_or_insert(spec.channels.count() as u16);

        // Reallocate only when a packet outgrows the current buffer
        let needed_frames = decoded.capacity() as u64;
        if sample_buf.is_none() || needed_frames > buf_frames {
            sample_buf = Some(SampleBuffer::<f32>::new(needed_frames, spec));
            buf_frames = needed_frames;
        }
        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    let sample_rate =
        sample_rate.ok_or_else(|| Error::Decode("Sample rate not found".to_string()))?;
    let channels = channels.ok_or_else(|| Error::Decode("Channel count not found".to_string()))?;

    if samples.is_empty() {
        return Err(Error::Decode("No audio decoded".to_string()));
    }

    debug!(
        "Decoded {} frames, sample_rate={}, channels={}",
        samples.len() / channels as usize,
        sample_rate,
        channels
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Decode a file and fingerprint it into a [`Track`]
pub fn load_track(source: &dyn PcmSource, path: &Path) -> Result<Track> {
    let decoded = source.decode(path)?;
    let song_id = fingerprint_file(path)?;
    let track = Track::new(
        song_id,
        path,
        decoded.samples,
        decoded.sample_rate,
        decoded.channels,
    )?;

    info!(
        "Loaded {} ({:.3}s, {} Hz, {} ch)",
        path.display(),
        track.duration_seconds(),
        track.sample_rate(),
        track.channels()
    );
    Ok(track)
}
