//! Reference-audio front end: WAV loading, resampling, silence trimming and
//! the log-mel spectrogram consumed by the style encoders.

use std::path::Path;
use std::sync::Arc;

use audioadapter_buffers::direct::InterleavedSlice;
use ndarray::Array2;
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use rubato::{Fft, FixedSync, Resampler};

use super::config::MelConfig;
use super::model::StyleTtsError;

/// Chunk size for FFT-based resampling.
const RESAMPLE_CHUNK_SIZE: usize = 1024;

/// Number of sub-chunks for FFT resampling.
const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Frame and hop length of the RMS envelope used for silence trimming.
const TRIM_FRAME_LENGTH: usize = 2048;
const TRIM_HOP_LENGTH: usize = 512;

/// Floor applied to mel energies before taking the log.
const LOG_MEL_FLOOR: f32 = 1e-5;

/// Read a WAV file and down-mix it to mono.
///
/// Returns the samples in `[-1, 1]` and the file's sample rate.
pub fn load_wav(path: &Path) -> Result<(Vec<f32>, u32), StyleTtsError> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| StyleTtsError::AudioLoad(format!("{}: {e}", path.display())))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| StyleTtsError::AudioLoad(format!("{}: {e}", path.display())))?,
        hound::SampleFormat::Int => {
            let max = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<Result<_, _>>()
                .map_err(|e| StyleTtsError::AudioLoad(format!("{}: {e}", path.display())))?
        }
    };

    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok((mono, spec.sample_rate))
}

/// Resample mono audio from one sample rate to another.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, StyleTtsError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let resample_err = |e: &dyn std::fmt::Display| {
        StyleTtsError::AudioLoad(format!("resampling {from_rate} Hz -> {to_rate} Hz failed: {e}"))
    };

    let mut resampler = Fft::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLE_CHUNK_SIZE,
        RESAMPLE_SUB_CHUNKS,
        1, // mono
        FixedSync::Input,
    )
    .map_err(|e| resample_err(&e))?;

    let output_frames_max = resampler.output_frames_max();
    let mut output_buffer = vec![0.0f32; output_frames_max];

    let expected_len = (samples.len() as f64 * to_rate as f64 / from_rate as f64) as usize;
    let delay = resampler.output_delay();
    let needed = expected_len + delay;
    let mut output = Vec::with_capacity(needed + output_frames_max);

    let mut process = |chunk: &[f32], output: &mut Vec<f32>| -> Result<usize, StyleTtsError> {
        let mut input_chunk = chunk.to_vec();
        input_chunk.resize(RESAMPLE_CHUNK_SIZE, 0.0);

        let input_adapter = InterleavedSlice::new(&input_chunk, 1, RESAMPLE_CHUNK_SIZE)
            .map_err(|e| resample_err(&e))?;
        let mut output_adapter = InterleavedSlice::new_mut(&mut output_buffer, 1, output_frames_max)
            .map_err(|e| resample_err(&e))?;

        let (_, frames_written) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, None)
            .map_err(|e| resample_err(&e))?;
        output.extend_from_slice(&output_buffer[..frames_written]);
        Ok(frames_written)
    };

    for chunk in samples.chunks(RESAMPLE_CHUNK_SIZE) {
        process(chunk, &mut output)?;
    }
    // flush the filter tail with silence
    while output.len() < needed {
        if process(&[], &mut output)? == 0 {
            break;
        }
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected_len);
    Ok(output)
}

/// Trim leading and trailing frames quieter than `top_db` below the loudest
/// frame.
///
/// Loudness is the RMS of centred 2048-sample frames with a 512-sample hop.
/// Returns an empty slice when the clip is entirely silent.
pub fn trim_silence(samples: &[f32], top_db: f32) -> &[f32] {
    if samples.is_empty() {
        return samples;
    }

    let rms = frame_rms(samples, TRIM_FRAME_LENGTH, TRIM_HOP_LENGTH);
    let peak = rms.iter().copied().fold(0.0f32, f32::max);
    if peak <= f32::EPSILON {
        return &samples[..0];
    }

    let threshold_db = -top_db;
    let loud = |r: &f32| {
        let power_db = 10.0 * (r * r).max(1e-10).log10() - 10.0 * (peak * peak).max(1e-10).log10();
        power_db > threshold_db
    };

    let (Some(first), Some(last)) = (rms.iter().position(loud), rms.iter().rposition(loud)) else {
        return &samples[..0];
    };

    let start = first * TRIM_HOP_LENGTH;
    let end = ((last + 1) * TRIM_HOP_LENGTH).min(samples.len());
    if start >= end {
        return &samples[..0];
    }
    &samples[start..end]
}

/// RMS of centred, zero-padded frames.
fn frame_rms(samples: &[f32], frame_length: usize, hop_length: usize) -> Vec<f32> {
    let n_frames = 1 + samples.len() / hop_length;
    let half = frame_length / 2;
    (0..n_frames)
        .map(|frame| {
            let centre = frame * hop_length;
            let start = centre.saturating_sub(half);
            let end = (centre + half).min(samples.len());
            let energy: f32 = samples[start..end].iter().map(|s| s * s).sum();
            (energy / frame_length as f32).sqrt()
        })
        .collect()
}

/// Power mel spectrogram with centred, reflect-padded STFT frames and an HTK
/// mel filter bank without area normalisation.
pub struct MelSpectrogram {
    n_fft: usize,
    hop_length: usize,
    window: Vec<f32>,
    /// `[n_mels][n_fft / 2 + 1]`
    filters: Vec<Vec<f32>>,
    fft: Arc<dyn RealToComplex<f32>>,
}

impl MelSpectrogram {
    pub fn new(config: &MelConfig) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.n_fft);
        Self {
            n_fft: config.n_fft,
            hop_length: config.hop_length,
            window: padded_hann_window(config.win_length, config.n_fft),
            filters: mel_filter_bank(config.filter_sample_rate, config.n_fft, config.n_mels),
            fft,
        }
    }

    pub fn n_mels(&self) -> usize {
        self.filters.len()
    }

    /// Compute the power mel spectrogram, shaped `[n_mels, frames]`.
    pub fn compute(&self, samples: &[f32]) -> Array2<f32> {
        let n_frames = 1 + samples.len() / self.hop_length;
        let n_bins = self.n_fft / 2 + 1;
        let pad = self.n_fft / 2;

        let mut mel = Array2::<f32>::zeros((self.n_mels(), n_frames));
        let mut frame = self.fft.make_input_vec();
        let mut spectrum = vec![Complex::new(0.0f32, 0.0f32); n_bins];
        let mut power = vec![0.0f32; n_bins];

        for t in 0..n_frames {
            let origin = (t * self.hop_length) as isize - pad as isize;
            for (i, slot) in frame.iter_mut().enumerate() {
                let sample = reflect(samples, origin + i as isize);
                *slot = sample * self.window[i];
            }

            if self.fft.process(&mut frame, &mut spectrum).is_err() {
                continue;
            }
            for (p, c) in power.iter_mut().zip(spectrum.iter()) {
                *p = c.norm_sqr();
            }

            for (m, filter) in self.filters.iter().enumerate() {
                mel[[m, t]] = filter.iter().zip(power.iter()).map(|(w, p)| w * p).sum();
            }
        }

        mel
    }

    /// Log-compress and normalise with fixed statistics:
    /// `(ln(floor + mel) - mean) / std`.
    pub fn log_normalized(&self, samples: &[f32], mean: f32, std: f32) -> Array2<f32> {
        self.compute(samples)
            .mapv(|v| ((v + LOG_MEL_FLOOR).ln() - mean) / std)
    }
}

/// Sample at `idx` with reflect padding on both ends.
fn reflect(samples: &[f32], idx: isize) -> f32 {
    let len = samples.len() as isize;
    match len {
        0 => 0.0,
        1 => samples[0],
        _ => {
            let period = 2 * (len - 1);
            let mut i = idx.rem_euclid(period);
            if i >= len {
                i = period - i;
            }
            samples[i as usize]
        }
    }
}

/// Periodic Hann window of `win_length`, zero-padded and centred in `n_fft`.
fn padded_hann_window(win_length: usize, n_fft: usize) -> Vec<f32> {
    let mut window = vec![0.0f32; n_fft];
    let offset = (n_fft - win_length) / 2;
    for i in 0..win_length {
        let phase = 2.0 * std::f32::consts::PI * i as f32 / win_length as f32;
        window[offset + i] = 0.5 - 0.5 * phase.cos();
    }
    window
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular HTK mel filters spanning 0 Hz to Nyquist.
fn mel_filter_bank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<Vec<f32>> {
    let n_bins = n_fft / 2 + 1;
    let f_max = sample_rate as f32 / 2.0;

    let bin_freqs: Vec<f32> = (0..n_bins)
        .map(|k| f_max * k as f32 / (n_bins - 1).max(1) as f32)
        .collect();

    let mel_max = hz_to_mel(f_max);
    let f_pts: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lower, centre, upper) = (f_pts[m], f_pts[m + 1], f_pts[m + 2]);
            bin_freqs
                .iter()
                .map(|&f| {
                    let down = (f - lower) / (centre - lower);
                    let up = (upper - f) / (upper - centre);
                    down.min(up).max(0.0)
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, secs: f32, amp: f32) -> Vec<f32> {
        let n = (rate as f32 * secs) as usize;
        (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn loads_int_wav_and_downmixes_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(i16::MAX / 2).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let (samples, rate) = load_wav(&path).unwrap();
        assert_eq!(rate, 16000);
        assert_eq!(samples.len(), 100);
        assert!((samples[0] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn missing_file_is_an_audio_load_error() {
        let err = load_wav(Path::new("/definitely/not/here.wav")).unwrap_err();
        assert!(matches!(err, StyleTtsError::AudioLoad(_)));
    }

    #[test]
    fn resample_changes_length_by_rate_ratio() {
        let input = sine(440.0, 16000, 1.0, 0.5);
        let output = resample(&input, 16000, 24000).unwrap();
        assert!(output.len() <= 24000 && output.len() >= 23000, "got {}", output.len());

        let same = resample(&input, 24000, 24000).unwrap();
        assert_eq!(same.len(), input.len());
    }

    #[test]
    fn resample_keeps_timing_and_tail() {
        let peak_index = |samples: &[f32], range: std::ops::Range<usize>| {
            range
                .max_by(|&a, &b| samples[a].abs().total_cmp(&samples[b].abs()))
                .unwrap()
        };

        let mut input = vec![0.0f32; 48000];
        input[4800] = 1.0;
        input[47600] = 1.0;
        let output = resample(&input, 48000, 24000).unwrap();
        assert_eq!(output.len(), 24000);

        let early = peak_index(&output, 0..12000);
        assert!(early.abs_diff(2400) <= 2, "early click at {early}");
        let late = peak_index(&output, 12000..24000);
        assert!(late.abs_diff(23800) <= 2, "late click at {late}");
        assert!(output[late].abs() > 0.1);
    }

    #[test]
    fn trims_surrounding_silence() {
        let mut clip = vec![0.0f32; 24000];
        clip.extend(sine(220.0, 24000, 1.0, 0.5));
        clip.extend(vec![0.0f32; 24000]);

        let trimmed = trim_silence(&clip, 30.0);
        assert!(trimmed.len() < clip.len());
        assert!(trimmed.len() >= 24000);
        assert!(trimmed.len() <= 24000 + 2 * TRIM_FRAME_LENGTH);
    }

    #[test]
    fn silent_clip_trims_to_nothing() {
        assert!(trim_silence(&vec![0.0f32; 10000], 30.0).is_empty());
        assert!(trim_silence(&[], 30.0).is_empty());
    }

    #[test]
    fn mel_shape_follows_hop_length() {
        let mel = MelSpectrogram::new(&MelConfig::default());
        let samples = sine(440.0, 24000, 0.5, 0.3);
        let spec = mel.compute(&samples);
        assert_eq!(spec.shape(), &[80, 1 + samples.len() / 300]);
        assert!(spec.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn log_mel_of_silence_is_the_normalised_floor() {
        let mel = MelSpectrogram::new(&MelConfig::default());
        let spec = mel.log_normalized(&vec![0.0f32; 3000], -4.0, 4.0);
        let expected = ((1e-5f32).ln() + 4.0) / 4.0;
        assert!(spec.iter().all(|v| (v - expected).abs() < 1e-4));
    }

    #[test]
    fn filters_are_triangular_and_non_negative() {
        let filters = mel_filter_bank(16000, 2048, 80);
        assert_eq!(filters.len(), 80);
        assert!(filters.iter().all(|f| f.len() == 1025));
        for filter in &filters {
            let peak = filter.iter().copied().fold(0.0f32, f32::max);
            assert!(peak > 0.0 && peak <= 1.0 + 1e-6);
            assert!(filter.iter().all(|w| *w >= 0.0));
        }
    }

    #[test]
    fn reflect_mirrors_without_repeating_edges() {
        let s = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(reflect(&s, -1), 1.0);
        assert_eq!(reflect(&s, -2), 2.0);
        assert_eq!(reflect(&s, 4), 2.0);
        assert_eq!(reflect(&s, 5), 1.0);
        assert_eq!(reflect(&s, 2), 2.0);
    }
}
