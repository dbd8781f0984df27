//! Audio output using cpal
//!
//! Opens an output device and pulls audio from a [`DeckRenderer`] inside
//! the cpal callback. The deck renders at the loaded track's rate and
//! channel count; the callback maps that layout onto the device channels.

use crate::error::{Error, Result};
use crate::playback::software::DeckRenderer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Audio output manager using cpal
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
    volume: Arc<Mutex<f32>>,
    health: StreamHealth,
}

/// Stream errors reported by the device callback, not yet handled
#[derive(Debug, Clone, Default)]
pub struct StreamHealth {
    pending: Arc<AtomicU32>,
}

impl StreamHealth {
    /// Count one error; called from the device error callback
    pub fn record(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Errors recorded since the last call, if any
    pub fn take_errors(&self) -> Option<u32> {
        match self.pending.swap(0, Ordering::SeqCst) {
            0 => None,
            n => Some(n),
        }
    }
}

impl AudioOutput {
    /// List available audio output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device for audio at `sample_rate` / `channels`
    ///
    /// Falls back to the default device when `device_name` is not found,
    /// and to the device's default configuration when the requested rate
    /// is unsupported (playback is then pitched; a warning is logged).
    pub fn open(device_name: Option<&str>, sample_rate: u32, channels: u16) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => {
                let mut devices = host.output_devices().map_err(|e| {
                    Error::AudioOutput(format!("Failed to enumerate devices: {}", e))
                })?;
                match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                    Some(device) => {
                        info!("Using audio device: {}", name);
                        device
                    }
                    None => {
                        warn!("Audio device '{}' not found, falling back to default", name);
                        host.default_output_device().ok_or_else(|| {
                            Error::AudioOutput(format!(
                                "Device '{}' not found and no default device available",
                                name
                            ))
                        })?
                    }
                }
            }
            None => host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?,
        };

        let (config, sample_format) = Self::best_config(&device, sample_rate, channels)?;
        debug!(
            "Audio config: sample_rate={}, channels={}, format={:?}",
            config.sample_rate.0, config.channels, sample_format
        );

        Ok(Self {
            device,
            config,
            sample_format,
            stream: None,
            volume: Arc::new(Mutex::new(1.0)),
            health: StreamHealth::default(),
        })
    }

    /// Pick a configuration running at `sample_rate`, preferring the
    /// track's channel count and f32 samples
    fn best_config(
        device: &Device,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(StreamConfig, SampleFormat)> {
        let supported: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
            .filter(|c| c.min_sample_rate().0 <= sample_rate && c.max_sample_rate().0 >= sample_rate)
            .collect();

        let rank = |c: &cpal::SupportedStreamConfigRange| {
            (
                c.channels() == channels,
                c.channels() >= channels,
                c.sample_format() == SampleFormat::F32,
            )
        };
        if let Some(best) = supported.into_iter().max_by_key(rank) {
            let sample_format = best.sample_format();
            let config = best.with_sample_rate(cpal::SampleRate(sample_rate)).config();
            return Ok((config, sample_format));
        }

        let fallback = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
        warn!(
            "Device does not support {} Hz; using {} Hz",
            sample_rate,
            fallback.sample_rate().0
        );
        Ok((fallback.config(), fallback.sample_format()))
    }

    /// Start the stream, rendering from `renderer`
    ///
    /// The callback runs on the real-time audio thread. It holds the deck
    /// lock for one device buffer at a time.
    pub fn start(&mut self, renderer: DeckRenderer) -> Result<()> {
        info!("Starting audio stream");

        let stream = match self.sample_format {
            SampleFormat::F32 => self.build_stream::<f32>(renderer)?,
            SampleFormat::I16 => self.build_stream::<i16>(renderer)?,
            SampleFormat::U16 => self.build_stream::<u16>(renderer)?,
            sample_format => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    sample_format
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        self.stream = Some(stream);

        info!("Audio stream started");
        Ok(())
    }

    fn build_stream<T>(&self, renderer: DeckRenderer) -> Result<Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let device_channels = self.config.channels as usize;
        let volume = Arc::clone(&self.volume);
        let health = self.health.clone();
        let mut scratch: Vec<f32> = Vec::new();

        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / device_channels;
                    let deck_channels = renderer.channels() as usize;
                    scratch.resize(frames * deck_channels, 0.0);
                    renderer.render(&mut scratch);

                    let gain = *volume.lock().unwrap_or_else(PoisonError::into_inner);
                    for (out, src) in data
                        .chunks_exact_mut(device_channels)
                        .zip(scratch.chunks_exact(deck_channels))
                    {
                        for (c, sample) in out.iter_mut().enumerate() {
                            let value = map_channel(src, c) * gain;
                            *sample = T::from_sample(value.clamp(-1.0, 1.0));
                        }
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    health.record();
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }

    /// Stop the stream
    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            info!("Stopping audio stream");
            stream
                .pause()
                .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)))?;
        }
        Ok(())
    }

    /// Set output volume, clamped to `[0.0, 1.0]`
    pub fn set_volume(&self, volume: f32) {
        let clamped = volume.clamp(0.0, 1.0);
        *self.volume.lock().unwrap_or_else(PoisonError::into_inner) = clamped;
        debug!("Volume set to {:.2}", clamped);
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn device_name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string())
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Error counter shared with the stream's error callback
    pub fn health(&self) -> StreamHealth {
        self.health.clone()
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Sample for device channel `channel` from one deck frame
///
/// Mono feeds every device channel; otherwise channels map one to one and
/// device channels past the source are silent.
fn map_channel(frame: &[f32], channel: usize) -> f32 {
    match frame.len() {
        0 => 0.0,
        1 => frame[0],
        _ => frame.get(channel).copied().unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices() {
        // Needs audio hardware; only check it does not panic
        let result = AudioOutput::list_devices();
        assert!(result.is_ok() || result.is_err());
    }

    #[test]
    fn test_stream_errors_taken_once() {
        let health = StreamHealth::default();
        let callback = health.clone();
        assert_eq!(health.take_errors(), None);

        callback.record();
        callback.record();
        assert_eq!(health.take_errors(), Some(2));
        assert_eq!(health.take_errors(), None);
    }

    #[test]
    fn test_mono_feeds_every_channel() {
        let frame = [0.25];
        assert_eq!(map_channel(&frame, 0), 0.25);
        assert_eq!(map_channel(&frame, 1), 0.25);
        assert_eq!(map_channel(&frame, 5), 0.25);
    }

    #[test]
    fn test_stereo_maps_one_to_one() {
        let frame = [0.5, -0.5];
        assert_eq!(map_channel(&frame, 0), 0.5);
        assert_eq!(map_channel(&frame, 1), -0.5);
        assert_eq!(map_channel(&frame, 2), 0.0);
    }
}
