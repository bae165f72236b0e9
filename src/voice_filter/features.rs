//! Feature extraction for the voice fingerprint.
//!
//! Deliberately lightweight — not MFCC. Produces a 128-element vector made
//! of four 32-element sub-bands computed over equal-length sub-frames of the
//! input: energy, zero-crossing rate, a spectral-centroid approximation, and
//! a block of statistical/derived scalars. This is an explicitly pluggable
//! seam; any extractor may be substituted as long as the registry's match
//! monotonicity in sensitivity still holds.

use super::FINGERPRINT_LEN;

const SUB_BANDS: usize = 4;
const SUB_BAND_LEN: usize = FINGERPRINT_LEN / SUB_BANDS;

/// Extracts the 128-element fingerprint for one raw PCM16 LE frame.
pub fn extract_fingerprint(pcm: &[u8]) -> [f32; FINGERPRINT_LEN] {
    let samples: Vec<f32> = pcm
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect();

    let mut out = [0f32; FINGERPRINT_LEN];
    if samples.is_empty() {
        return out;
    }

    let chunks = split_into(&samples, SUB_BAND_LEN);

    let energy = sub_band_energy(&chunks);
    let zcr = sub_band_zero_crossing_rate(&chunks);
    let centroid = sub_band_spectral_centroid(&chunks);
    let derived = sub_band_statistics(&energy, &zcr, &centroid);

    out[0..SUB_BAND_LEN].copy_from_slice(&energy);
    out[SUB_BAND_LEN..2 * SUB_BAND_LEN].copy_from_slice(&zcr);
    out[2 * SUB_BAND_LEN..3 * SUB_BAND_LEN].copy_from_slice(&centroid);
    out[3 * SUB_BAND_LEN..4 * SUB_BAND_LEN].copy_from_slice(&derived);

    out
}

/// Splits `samples` into exactly `n` equal-length (possibly empty) chunks.
fn split_into(samples: &[f32], n: usize) -> Vec<Vec<f32>> {
    let chunk_len = (samples.len() / n).max(1);
    (0..n)
        .map(|i| {
            let start = i * chunk_len;
            if start >= samples.len() {
                Vec::new()
            } else {
                let end = ((i + 1) * chunk_len).min(samples.len());
                samples[start..end].to_vec()
            }
        })
        .collect()
}

fn rms(chunk: &[f32]) -> f32 {
    if chunk.is_empty() {
        return 0.0;
    }
    (chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len() as f32).sqrt()
}

fn sub_band_energy(chunks: &[Vec<f32>]) -> [f32; SUB_BAND_LEN] {
    let mut out = [0f32; SUB_BAND_LEN];
    for (i, chunk) in chunks.iter().enumerate().take(SUB_BAND_LEN) {
        out[i] = rms(chunk);
    }
    out
}

fn zero_crossing_rate(chunk: &[f32]) -> f32 {
    if chunk.len() < 2 {
        return 0.0;
    }
    let crossings = chunk
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (chunk.len() - 1) as f32
}

fn sub_band_zero_crossing_rate(chunks: &[Vec<f32>]) -> [f32; SUB_BAND_LEN] {
    let mut out = [0f32; SUB_BAND_LEN];
    for (i, chunk) in chunks.iter().enumerate().take(SUB_BAND_LEN) {
        out[i] = zero_crossing_rate(chunk);
    }
    out
}

/// Magnitude-weighted index within the chunk, normalized to `[0,1]`. A cheap
/// stand-in for a real spectral centroid that avoids an FFT.
fn spectral_centroid_approx(chunk: &[f32]) -> f32 {
    if chunk.is_empty() {
        return 0.0;
    }
    let total_mag: f32 = chunk.iter().map(|s| s.abs()).sum();
    if total_mag < 1e-9 {
        return 0.0;
    }
    let weighted_index: f32 = chunk
        .iter()
        .enumerate()
        .map(|(i, s)| i as f32 * s.abs())
        .sum();
    let centroid = weighted_index / total_mag;
    if chunk.len() > 1 {
        centroid / (chunk.len() - 1) as f32
    } else {
        0.0
    }
}

fn sub_band_spectral_centroid(chunks: &[Vec<f32>]) -> [f32; SUB_BAND_LEN] {
    let mut out = [0f32; SUB_BAND_LEN];
    for (i, chunk) in chunks.iter().enumerate().take(SUB_BAND_LEN) {
        out[i] = spectral_centroid_approx(chunk);
    }
    out
}

/// 32 statistical/derived scalars: mean, stddev, min, max of the three
/// sub-bands above, followed by pairwise products to fill the remaining
/// slots.
fn sub_band_statistics(
    energy: &[f32; SUB_BAND_LEN],
    zcr: &[f32; SUB_BAND_LEN],
    centroid: &[f32; SUB_BAND_LEN],
) -> [f32; SUB_BAND_LEN] {
    let mut out = [0f32; SUB_BAND_LEN];
    let stats_of = |v: &[f32]| -> (f32, f32, f32, f32) {
        let mean = v.iter().sum::<f32>() / v.len() as f32;
        let variance = v.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / v.len() as f32;
        let min = v.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = v.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        (mean, variance.sqrt(), min, max)
    };

    let (e_mean, e_std, e_min, e_max) = stats_of(energy);
    let (z_mean, z_std, z_min, z_max) = stats_of(zcr);
    let (c_mean, c_std, c_min, c_max) = stats_of(centroid);

    let base = [
        e_mean, e_std, e_min, e_max, z_mean, z_std, z_min, z_max, c_mean, c_std, c_min, c_max,
    ];
    let n = base.len().min(SUB_BAND_LEN);
    out[0..n].copy_from_slice(&base[0..n]);

    // Fill remaining slots with pairwise products of the base scalars so the
    // sub-band still carries 32 derived values.
    let mut idx = n;
    'outer: for i in 0..base.len() {
        for j in i..base.len() {
            if idx >= SUB_BAND_LEN {
                break 'outer;
            }
            out[idx] = base[i] * base[j];
            idx += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn empty_input_yields_zero_vector() {
        let fp = extract_fingerprint(&[]);
        assert!(fp.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn silence_has_near_zero_energy() {
        let silence = vec![0u8; 4096];
        let fp = extract_fingerprint(&silence);
        let energy_sum: f32 = fp[0..SUB_BAND_LEN].iter().sum();
        assert_abs_diff_eq!(energy_sum, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn loud_tone_has_higher_energy_than_quiet_tone() {
        let make = |amp: f32| -> Vec<u8> {
            (0..4096)
                .map(|i| {
                    let t = i as f32 / 16000.0;
                    ((t * 440.0 * std::f32::consts::TAU).sin() * amp * 32767.0) as i16
                })
                .flat_map(|s| s.to_le_bytes())
                .collect()
        };
        let quiet = extract_fingerprint(&make(0.05));
        let loud = extract_fingerprint(&make(0.9));
        let quiet_energy: f32 = quiet[0..SUB_BAND_LEN].iter().sum();
        let loud_energy: f32 = loud[0..SUB_BAND_LEN].iter().sum();
        assert!(loud_energy > quiet_energy);
    }
}
