//! Audio Trimmer (C1): pure, exception-free silence trimming for 16-bit
//! mono 16 kHz PCM, plus `hound`-backed RIFF/WAVE packaging.
//!
//! Every public entry point degrades to "return the input unchanged" on
//! any internal inconsistency (odd byte length, all-silence input, empty
//! buffer) rather than propagating an error — downstream callers always
//! get *some* playable audio back.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

const SAMPLE_RATE: usize = 16_000;
const RMS_FRAME_SIZE: usize = 512;
const SILENCE_SCAN_FRAME_SIZE: usize = 256;
const DEFAULT_SILENCE_THRESHOLD: f32 = 0.05;
const BOUNDARY_REFINE_FACTOR: f32 = 0.3;
const PADDING_MS: f32 = 2.0;
const MIN_SILENT_RUN_MS: f32 = 300.0;
const SHRUNK_SILENT_RUN_MS: f32 = 50.0;
const SHORT_CIRCUIT_BYTES: usize = 8_000;

/// Trims leading/trailing silence and shrinks long mid-silence runs, using
/// the default 0.05 relative-RMS threshold.
pub fn trim_silence(pcm: &[u8]) -> Vec<u8> {
    trim_silence_with_threshold(pcm, DEFAULT_SILENCE_THRESHOLD)
}

pub fn trim_silence_with_threshold(pcm: &[u8], silence_threshold: f32) -> Vec<u8> {
    try_trim_silence(pcm, silence_threshold).unwrap_or_else(|| pcm.to_vec())
}

fn try_trim_silence(pcm: &[u8], silence_threshold: f32) -> Option<Vec<u8>> {
    if pcm.len() < SHORT_CIRCUIT_BYTES || pcm.len() % 2 != 0 {
        return None;
    }
    let samples = bytes_to_i16(pcm);
    if samples.is_empty() {
        return None;
    }

    let frame_rms: Vec<f32> = samples.chunks(RMS_FRAME_SIZE).map(rms).collect();
    let peak = frame_rms.iter().cloned().fold(0.0_f32, f32::max);
    if peak <= 0.0 {
        return None;
    }
    let threshold = peak * silence_threshold;

    let start_frame = frame_rms.iter().position(|&r| r > threshold)?;
    let end_frame = frame_rms.iter().rposition(|&r| r > threshold)?;

    let refine_threshold = threshold * BOUNDARY_REFINE_FACTOR;
    let padding_samples = (PADDING_MS / 1000.0 * SAMPLE_RATE as f32) as usize;

    let coarse_start = start_frame * RMS_FRAME_SIZE;
    let coarse_end = ((end_frame + 1) * RMS_FRAME_SIZE).min(samples.len());
    let coarse = &samples[coarse_start..coarse_end];

    let refined_start = coarse
        .iter()
        .position(|&s| normalize(s).abs() > refine_threshold)
        .map(|i| coarse_start + i)
        .unwrap_or(coarse_start);
    let refined_end = coarse
        .iter()
        .rposition(|&s| normalize(s).abs() > refine_threshold)
        .map(|i| coarse_start + i)
        .unwrap_or_else(|| coarse_end.saturating_sub(1));

    let trimmed_start = refined_start.saturating_sub(padding_samples);
    let trimmed_end = (refined_end + padding_samples).min(samples.len().saturating_sub(1));
    if trimmed_start > trimmed_end {
        return None;
    }

    let trimmed = shrink_long_silences(&samples[trimmed_start..=trimmed_end], threshold);
    Some(i16_to_bytes(&trimmed))
}

/// Shrinks every run of consecutive 256-sample frames at or below
/// `threshold` that spans more than 300ms down to a fixed 50ms of zeros.
/// Runs at or below the 300ms cutoff are copied through unchanged.
fn shrink_long_silences(samples: &[i16], threshold: f32) -> Vec<i16> {
    let frame_rms: Vec<f32> = samples.chunks(SILENCE_SCAN_FRAME_SIZE).map(rms).collect();
    let min_run_frames = (MIN_SILENT_RUN_MS / 1000.0 * SAMPLE_RATE as f32
        / SILENCE_SCAN_FRAME_SIZE as f32)
        .ceil() as usize;
    let shrunk_run_samples = (SHRUNK_SILENT_RUN_MS / 1000.0 * SAMPLE_RATE as f32) as usize;

    let mut out = Vec::with_capacity(samples.len());
    let mut frame_idx = 0;
    while frame_idx < frame_rms.len() {
        let sample_start = frame_idx * SILENCE_SCAN_FRAME_SIZE;
        if frame_rms[frame_idx] <= threshold {
            let run_start = frame_idx;
            while frame_idx < frame_rms.len() && frame_rms[frame_idx] <= threshold {
                frame_idx += 1;
            }
            let run_frames = frame_idx - run_start;
            let sample_end = (frame_idx * SILENCE_SCAN_FRAME_SIZE).min(samples.len());
            if run_frames >= min_run_frames {
                out.resize(out.len() + shrunk_run_samples, 0);
            } else {
                out.extend_from_slice(&samples[sample_start..sample_end]);
            }
        } else {
            let sample_end = ((frame_idx + 1) * SILENCE_SCAN_FRAME_SIZE).min(samples.len());
            out.extend_from_slice(&samples[sample_start..sample_end]);
            frame_idx += 1;
        }
    }
    out
}

fn rms(frame: &[i16]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = frame
        .iter()
        .map(|&s| {
            let n = normalize(s) as f64;
            n * n
        })
        .sum();
    (sum_sq / frame.len() as f64).sqrt() as f32
}

fn normalize(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

fn i16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

fn wav_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE as u32,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Wraps raw 16-bit/16kHz/mono PCM in a RIFF/WAVE container.
pub fn pcm_to_wav(pcm: &[u8]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len()));
    {
        let mut writer =
            WavWriter::new(&mut cursor, wav_spec()).expect("in-memory WAV header is well-formed");
        for sample in bytes_to_i16(pcm) {
            writer
                .write_sample(sample)
                .expect("writing to an in-memory buffer cannot fail");
        }
        writer
            .finalize()
            .expect("finalizing an in-memory WAV cannot fail");
    }
    cursor.into_inner()
}

/// Extracts the raw 16-bit PCM payload from a WAV file, converting down
/// from float samples if necessary and mixing stereo to mono by averaging
/// channels. Returns `None` if the buffer isn't a well-formed RIFF/WAVE
/// container hound can parse.
pub fn wav_to_pcm(wav: &[u8]) -> Option<Vec<u8>> {
    let mut reader = WavReader::new(Cursor::new(wav)).ok()?;
    let spec = reader.spec();

    let samples: Vec<i16> = match spec.sample_format {
        SampleFormat::Int => reader
            .samples::<i32>()
            .collect::<Result<Vec<i32>, _>>()
            .ok()?
            .into_iter()
            .map(|s| s as i16)
            .collect(),
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<f32>, _>>()
            .ok()?
            .into_iter()
            .map(|s| (s * 32768.0) as i16)
            .collect(),
    };

    let samples = if spec.channels == 2 {
        samples
            .chunks(2)
            .map(|c| (((c[0] as i32) + (c.get(1).copied().unwrap_or(0) as i32)) / 2) as i16)
            .collect()
    } else {
        samples
    };

    Some(i16_to_bytes(&samples))
}
