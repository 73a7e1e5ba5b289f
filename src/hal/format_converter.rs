use super::types::SampleFormat;

const I16_SCALE: f64 = 32768.0; // 2^15
const I24_SCALE: f64 = 8388608.0; // 2^23
const I32_SCALE: f64 = 2147483648.0; // 2^31

/// Multiply every sample by the effective gain; volume is clamped to [0, 1]
pub fn apply_gain(samples: &mut [f32], volume: f32, muted: bool) {
    let gain = if muted { 0.0 } else { volume.clamp(0.0, 1.0) };
    if gain == 1.0 {
        return;
    }
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
}

pub fn f32_to_i16(sample: f32) -> i16 {
    (sample as f64 * I16_SCALE).round().clamp(-I16_SCALE, I16_SCALE - 1.0) as i16
}

pub fn f32_to_i24(sample: f32) -> i32 {
    (sample as f64 * I24_SCALE).round().clamp(-I24_SCALE, I24_SCALE - 1.0) as i32
}

pub fn f32_to_i32(sample: f32) -> i32 {
    (sample as f64 * I32_SCALE).round().clamp(-I32_SCALE, I32_SCALE - 1.0) as i32
}

/// Number of bytes `samples` samples occupy in `format`
pub fn encoded_len(samples: usize, format: SampleFormat) -> usize {
    samples * format.bytes_per_sample()
}

/// Encode float samples into little-endian `format` bytes.
///
/// `out` must hold at least `encoded_len(samples.len(), format)` bytes. Returns the number
/// of bytes written. Float output is copied, integer output is rounded and saturated.
pub fn encode_into(samples: &[f32], format: SampleFormat, out: &mut [u8]) -> usize {
    let width = format.bytes_per_sample();
    let len = samples.len() * width;
    assert!(out.len() >= len, "output buffer too small: {} < {}", out.len(), len);

    let chunks = out[..len].chunks_exact_mut(width);
    match format {
        SampleFormat::S16LE => {
            for (chunk, &s) in chunks.zip(samples) {
                chunk.copy_from_slice(&f32_to_i16(s).to_le_bytes());
            }
        }
        SampleFormat::S24LE => {
            for (chunk, &s) in chunks.zip(samples) {
                // Low three bytes of the little-endian i32
                chunk.copy_from_slice(&f32_to_i24(s).to_le_bytes()[..3]);
            }
        }
        SampleFormat::S32LE => {
            for (chunk, &s) in chunks.zip(samples) {
                chunk.copy_from_slice(&f32_to_i32(s).to_le_bytes());
            }
        }
        SampleFormat::F32LE => {
            for (chunk, &s) in chunks.zip(samples) {
                chunk.copy_from_slice(&s.to_le_bytes());
            }
        }
        SampleFormat::F64LE => {
            for (chunk, &s) in chunks.zip(samples) {
                chunk.copy_from_slice(&(s as f64).to_le_bytes());
            }
        }
    }
    len
}

/// Decode little-endian `format` bytes back to normalized floats
pub fn decode(bytes: &[u8], format: SampleFormat) -> Vec<f32> {
    let width = format.bytes_per_sample();
    bytes
        .chunks_exact(width)
        .map(|b| match format {
            SampleFormat::S16LE => (i16::from_le_bytes([b[0], b[1]]) as f64 / I16_SCALE) as f32,
            SampleFormat::S24LE => {
                // Sign-extend the high byte
                let value = (b[2] as i8 as i32) << 16 | (b[1] as i32) << 8 | b[0] as i32;
                (value as f64 / I24_SCALE) as f32
            }
            SampleFormat::S32LE => {
                (i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64 / I32_SCALE) as f32
            }
            SampleFormat::F32LE => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            SampleFormat::F64LE => {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
            }
        })
        .collect()
}
