/// Minimal PCM16 WAV handling for recorded queries.
///
/// `arecord` writes placeholder chunk sizes when it is interrupted, so captured files are
/// repaired before anything reads them.
use crate::error::AppError;

pub const SAMPLE_RATE: u32 = 16_000;
pub const CHANNELS: u16 = 1;
const HEADER_LEN: usize = 12;

/// Layout of a parsed WAV file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavLayout {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Byte offset of the first sample.
    pub data_offset: usize,
    /// Length in bytes of the sample data actually present.
    pub data_len: usize,
}

/// Encode interleaved 16-bit samples as a canonical 44-byte-header WAV file.
pub fn encode_pcm16(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let byte_rate = sample_rate * u32::from(channels) * 2;
    let mut out = Vec::with_capacity(44 + samples.len() * 2);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&(channels * 2).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// A mono sine tone, used by the simulated recorder.
pub fn sine_wave(seconds: f32, frequency: f32, amplitude: f32) -> Vec<u8> {
    let total = (seconds * SAMPLE_RATE as f32) as usize;
    let samples: Vec<i16> = (0..total)
        .map(|n| {
            let t = n as f32 / SAMPLE_RATE as f32;
            let v = amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin();
            (v * f32::from(i16::MAX)) as i16
        })
        .collect();
    encode_pcm16(&samples, SAMPLE_RATE, CHANNELS)
}

/// Walk the RIFF chunks to find the format and the sample data.
pub fn parse_layout(bytes: &[u8]) -> Result<WavLayout, AppError> {
    if bytes.len() < HEADER_LEN || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(AppError::Recording("not a RIFF/WAVE file".to_string()));
    }

    let mut format: Option<(u16, u32, u16)> = None;
    let mut pos = HEADER_LEN;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = read_u32(bytes, pos + 4) as usize;
        let body = pos + 8;

        if id == b"fmt " {
            if body + 16 > bytes.len() {
                break;
            }
            let audio_format = u16::from_le_bytes([bytes[body], bytes[body + 1]]);
            if audio_format != 1 {
                return Err(AppError::Recording(format!(
                    "unsupported WAV encoding {audio_format}, expected PCM"
                )));
            }
            let channels = u16::from_le_bytes([bytes[body + 2], bytes[body + 3]]);
            let sample_rate = read_u32(bytes, body + 4);
            let bits = u16::from_le_bytes([bytes[body + 14], bytes[body + 15]]);
            format = Some((channels, sample_rate, bits));
        } else if id == b"data" {
            let (channels, sample_rate, bits_per_sample) = format
                .ok_or_else(|| AppError::Recording("data chunk before fmt chunk".to_string()))?;
            return Ok(WavLayout {
                channels,
                sample_rate,
                bits_per_sample,
                data_offset: body,
                data_len: bytes.len() - body,
            });
        }

        // Chunks are word aligned.
        pos = body.saturating_add(size).saturating_add(size & 1);
    }

    Err(AppError::Recording("WAV file has no data chunk".to_string()))
}

/// Rewrite the RIFF and data sizes to match the bytes actually on disk.
pub fn repair_header(bytes: &mut [u8]) -> Result<WavLayout, AppError> {
    let mut layout = parse_layout(bytes)?;
    // A trailing odd byte cannot be a whole PCM16 sample.
    if layout.bits_per_sample == 16 {
        layout.data_len -= layout.data_len % 2;
    }
    let riff_size = (bytes.len() - 8) as u32;
    bytes[4..8].copy_from_slice(&riff_size.to_le_bytes());
    let size_at = layout.data_offset - 4;
    bytes[size_at..size_at + 4].copy_from_slice(&(layout.data_len as u32).to_le_bytes());
    Ok(layout)
}

/// Scale PCM16 samples so the loudest one reaches `target_peak` of full scale.
///
/// Returns `false` when there is nothing to scale (silence or no samples).
pub fn normalize_peak(
    bytes: &mut [u8],
    layout: &WavLayout,
    target_peak: f32,
) -> Result<bool, AppError> {
    if layout.bits_per_sample != 16 {
        return Err(AppError::Recording(format!(
            "cannot normalise {}-bit audio",
            layout.bits_per_sample
        )));
    }
    let data = &mut bytes[layout.data_offset..layout.data_offset + layout.data_len];

    let peak = data
        .chunks_exact(2)
        .map(|c| i32::from(i16::from_le_bytes([c[0], c[1]])).abs())
        .max()
        .unwrap_or(0);
    if peak == 0 {
        return Ok(false);
    }

    let gain = target_peak * f32::from(i16::MAX) / peak as f32;
    for c in data.chunks_exact_mut(2) {
        let sample = f32::from(i16::from_le_bytes([c[0], c[1]])) * gain;
        let scaled = sample.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
        c.copy_from_slice(&scaled.to_le_bytes());
    }
    Ok(true)
}

/// Peak absolute sample value as a fraction of full scale.
pub fn peak_level(bytes: &[u8], layout: &WavLayout) -> f32 {
    let data = &bytes[layout.data_offset..layout.data_offset + layout.data_len];
    let peak = data
        .chunks_exact(2)
        .map(|c| i32::from(i16::from_le_bytes([c[0], c[1]])).abs())
        .max()
        .unwrap_or(0);
    peak as f32 / f32::from(i16::MAX)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_file_parses() {
        let wav = encode_pcm16(&[0, 100, -100, 50], SAMPLE_RATE, CHANNELS);
        assert_eq!(wav.len(), 44 + 8);
        let layout = parse_layout(&wav).unwrap();
        assert_eq!(layout.channels, 1);
        assert_eq!(layout.sample_rate, 16_000);
        assert_eq!(layout.bits_per_sample, 16);
        assert_eq!(layout.data_offset, 44);
        assert_eq!(layout.data_len, 8);
    }

    #[test]
    fn repair_fixes_placeholder_sizes() {
        let mut wav = encode_pcm16(&[1, 2, 3], SAMPLE_RATE, CHANNELS);
        wav[4..8].copy_from_slice(&0x7fff_ffffu32.to_le_bytes());
        wav[40..44].copy_from_slice(&0x7fff_ffffu32.to_le_bytes());
        // Interrupted mid-sample.
        wav.push(9);

        let layout = repair_header(&mut wav).unwrap();
        assert_eq!(layout.data_len, 6);
        assert_eq!(u32::from_le_bytes(wav[4..8].try_into().unwrap()), (wav.len() - 8) as u32);
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 6);
    }

    #[test]
    fn normalize_scales_to_target_peak() {
        let mut wav = encode_pcm16(&[1000, -2000, 500], SAMPLE_RATE, CHANNELS);
        let layout = parse_layout(&wav).unwrap();
        assert!(normalize_peak(&mut wav, &layout, 0.7).unwrap());
        assert!((peak_level(&wav, &layout) - 0.7).abs() < 0.001);

        let mut silent = encode_pcm16(&[0, 0], SAMPLE_RATE, CHANNELS);
        let layout = parse_layout(&silent).unwrap();
        assert!(!normalize_peak(&mut silent, &layout, 0.7).unwrap());
    }

    #[test]
    fn sine_wave_has_requested_length_and_amplitude() {
        let wav = sine_wave(3.0, 440.0, 0.5);
        let layout = parse_layout(&wav).unwrap();
        assert_eq!(layout.data_len, 3 * 16_000 * 2);
        let peak = peak_level(&wav, &layout);
        assert!(peak > 0.49 && peak <= 0.5, "peak {peak}");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_layout(b"not audio at all").is_err());
    }
}
