//! Offline training-set construction from labeled WAV recordings.
//!
//! Layout: one subdirectory per chord label, WAV files inside:
//!
//! ```text
//! dataset/
//! ├── Am/take-01.wav
//! ├── Am/take-02.wav
//! └── G/take-01.wav
//! ```
//!
//! Each recording is cut into accumulation-window-sized pieces and run
//! through the same `FeatureExtractor` as the live path, so training and
//! inference see identical representations.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::classify::ChordVocabulary;
use crate::dsp::chroma::FeatureExtractor;
use crate::error::{ChordError, Result};
use crate::model::network::TrainingExample;

/// Window length in chunks, matching the live accumulation window.
const WINDOW_CHUNKS: usize = 3;

/// Load every labeled example under `root`.
///
/// Subdirectories whose name is not in the vocabulary are skipped with a
/// warning; unreadable or too-short files are skipped the same way. An
/// empty result is an error — training needs at least one example.
pub fn load_dataset(
    root: &Path,
    vocabulary: &ChordVocabulary,
    chunk_size: usize,
) -> Result<Vec<TrainingExample>> {
    let mut extractor = FeatureExtractor::new();
    let mut examples = Vec::new();

    for entry in fs::read_dir(root)? {
        let dir = entry?.path();
        if !dir.is_dir() {
            continue;
        }
        let label = match dir.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        let Some(label_index) = vocabulary.index_of(&label) else {
            warn!(label, "skipping dataset directory with unknown label");
            continue;
        };

        for file in fs::read_dir(&dir)? {
            let path = file?.path();
            let is_wav = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.eq_ignore_ascii_case("wav"))
                .unwrap_or(false);
            if !is_wav {
                continue;
            }

            let (samples, sample_rate) = match read_wav_mono_f32(&path) {
                Ok(v) => v,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable wav");
                    continue;
                }
            };

            let window_len = WINDOW_CHUNKS * chunk_size;
            let mut start = 0;
            let mut windows = 0usize;
            while start + window_len <= samples.len() {
                if let Some(features) =
                    extractor.extract(&samples[start..start + window_len], sample_rate)
                {
                    examples.push(TrainingExample {
                        chromagram: features.chromagram,
                        label_index,
                    });
                    windows += 1;
                }
                start += window_len;
            }
            if windows == 0 {
                warn!(path = %path.display(), "recording shorter than one analysis window");
            }
        }
    }

    if examples.is_empty() {
        return Err(ChordError::Training(format!(
            "no usable examples under {}",
            root.display()
        )));
    }
    info!(examples = examples.len(), "dataset loaded");
    Ok(examples)
}

/// Read a WAV file as mono f32, downmixing multi-channel input.
pub fn read_wav_mono_f32(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| ChordError::Training(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let to_err = |e: hound::Error| ChordError::Training(e.to_string());
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(to_err))
            .collect::<Result<Vec<_>>>()?,
        hound::SampleFormat::Int => {
            if spec.bits_per_sample <= 16 {
                reader
                    .samples::<i16>()
                    .map(|s| s.map(|v| (v as f32) / (i16::MAX as f32)).map_err(to_err))
                    .collect::<Result<Vec<_>>>()?
            } else {
                let max = ((1_i64 << (spec.bits_per_sample - 1)) - 1) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| (v as f32) / max).map_err(to_err))
                    .collect::<Result<Vec<_>>>()?
            }
        }
    };

    if channels == 1 {
        return Ok((interleaved, spec.sample_rate));
    }

    let mut mono = Vec::with_capacity(interleaved.len() / channels);
    for frame in interleaved.chunks(channels) {
        let sum = frame.iter().copied().sum::<f32>();
        mono.push(sum / channels as f32);
    }
    Ok((mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dataset(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "chordsense-dataset-test-{tag}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_sine_wav(path: &Path, freq: f32, sample_rate: u32, len: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..len {
            let v = 0.5
                * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin();
            writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn loads_windows_from_labeled_directories() {
        let root = temp_dataset("load");
        let vocab = ChordVocabulary::default();

        let a_dir = root.join("A");
        fs::create_dir_all(&a_dir).unwrap();
        // Two windows' worth of 110 Hz sine
        write_sine_wav(&a_dir.join("take.wav"), 110.0, 44_100, 2 * 3 * 1024);

        let examples = load_dataset(&root, &vocab, 1024).unwrap();
        assert_eq!(examples.len(), 2);
        let a_index = vocab.index_of("A").unwrap();
        assert!(examples.iter().all(|e| e.label_index == a_index));
        // A2 → pitch class A in every frame
        assert!(examples[0].chromagram.frames.iter().all(|f| f[9] == 1.0));
    }

    #[test]
    fn unknown_label_directories_are_skipped() {
        let root = temp_dataset("unknown");
        let vocab = ChordVocabulary::default();

        let bogus = root.join("NotAChord");
        fs::create_dir_all(&bogus).unwrap();
        write_sine_wav(&bogus.join("take.wav"), 110.0, 44_100, 3 * 1024);

        assert!(load_dataset(&root, &vocab, 1024).is_err());
    }

    #[test]
    fn stereo_wav_is_downmixed() {
        let root = temp_dataset("stereo");
        let path = root.join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..64 {
            writer.write_sample(i16::MAX / 2).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let (mono, rate) = read_wav_mono_f32(&path).unwrap();
        assert_eq!(rate, 44_100);
        assert_eq!(mono.len(), 64);
        assert!((mono[0] - 0.25).abs() < 0.01);
    }
}
