//! Audio capture via cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated
//! (TIME_CRITICAL on Windows) priority. It **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! This module satisfies that contract by converting/down-mixing into a
//! reused scratch buffer and writing into an SPSC ring buffer producer whose
//! `push_slice` is lock-free and allocation-free. Everything heavier —
//! frame metrics, quality gating, chromagram extraction, inference — runs
//! on the pipeline side of the ring.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `AudioCapture` therefore must be created and dropped on the same
//! thread. The engine accomplishes this by calling `open_default` inside
//! `spawn_blocking`.

pub mod device;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;
use crate::{
    buffering::AudioProducer,
    error::{ChordError, Result},
};
#[cfg(feature = "audio-cpal")]
use std::sync::atomic::Ordering;
use std::sync::{atomic::AtomicBool, Arc};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Handle to an active audio capture stream.
///
/// The callback checks the shared `running` flag on every invocation: while
/// it is `false` the stream stays open but pushes nothing, so a stopped
/// session keeps the device attached for a cheap restart.
///
/// **Not `Send`** — `cpal::Stream` is bound to its creation thread on
/// Windows/macOS. Create and drop this type on the same OS thread.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

/// Convert one interleaved callback buffer to mono f32 and push it into the
/// ring. `sample_at` maps an interleaved index to a normalized f32 sample.
#[cfg(feature = "audio-cpal")]
fn mix_and_push(
    producer: &mut AudioProducer,
    mix_buf: &mut Vec<f32>,
    data_len: usize,
    channels: usize,
    sample_at: impl Fn(usize) -> f32,
) {
    let frames = data_len / channels;
    mix_buf.resize(frames, 0.0);
    for (f, slot) in mix_buf.iter_mut().enumerate() {
        let base = f * channels;
        let mut sum = 0f32;
        for c in 0..channels {
            sum += sample_at(base + c);
        }
        *slot = sum / channels as f32;
    }
    let written = producer.push_slice(mix_buf);
    if written < mix_buf.len() {
        warn!(
            "ring buffer full: dropped {} captured frames",
            mix_buf.len() - written
        );
    }
}

impl AudioCapture {
    /// Open an input device by preferred name, otherwise fall back to the
    /// default input device and then the first available device.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });

                    if selected_device.is_none() {
                        warn!(
                            "preferred input device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_input_device() {
            default
        } else {
            let mut devices = host
                .input_devices()
                .map_err(|e| ChordError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(ChordError::NoDefaultInputDevice)?;
            warn!("no default input device, falling back to first available input");
            fallback
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| ChordError::AudioDevice(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        info!(sample_rate, channels, "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // One Arc per sample format branch so each closure owns its flag.
        let running_f32 = Arc::clone(&running);
        let running_i16 = Arc::clone(&running);
        let running_u8 = running;

        let ch = channels as usize;
        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !running_f32.load(Ordering::Relaxed) {
                            return;
                        }
                        if ch == 1 {
                            // Mono f32 needs no conversion — push directly.
                            let written = producer.push_slice(data);
                            if written < data.len() {
                                warn!(
                                    "ring buffer full: dropped {} captured frames",
                                    data.len() - written
                                );
                            }
                            return;
                        }
                        mix_and_push(&mut producer, &mut mix_buf, data.len(), ch, |i| data[i]);
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            SampleFormat::I16 => {
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running_i16.load(Ordering::Relaxed) {
                            return;
                        }
                        mix_and_push(&mut producer, &mut mix_buf, data.len(), ch, |i| {
                            data[i] as f32 / 32768.0
                        });
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            SampleFormat::U8 => {
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[u8], _info| {
                        if !running_u8.load(Ordering::Relaxed) {
                            return;
                        }
                        mix_and_push(&mut producer, &mut mix_buf, data.len(), ch, |i| {
                            (data[i] as f32 - 128.0) / 128.0
                        });
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            fmt => {
                return Err(ChordError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| ChordError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| ChordError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            sample_rate,
        })
    }

    /// Open the system default microphone and push f32 PCM frames into `producer`.
    ///
    /// Must be called from the thread that will also drop this value.
    /// In practice this means calling it inside `tokio::task::spawn_blocking`.
    ///
    /// # Errors
    /// Returns `ChordError::NoDefaultInputDevice` when no microphone is
    /// available, or `ChordError::AudioStream` if cpal fails to build the stream.
    #[cfg(feature = "audio-cpal")]
    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(producer, running, None)
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(ChordError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(producer, running, None)
    }
}

#[cfg(all(test, not(feature = "audio-cpal")))]
mod tests {
    use super::*;
    use crate::buffering::create_audio_ring;

    #[test]
    fn stub_open_reports_missing_backend() {
        let (producer, _consumer) = create_audio_ring();
        let running = Arc::new(AtomicBool::new(true));
        let err = AudioCapture::open_with_preference(producer, running, None)
            .err()
            .unwrap();
        assert!(matches!(err, ChordError::AudioStream(_)));
    }
}
