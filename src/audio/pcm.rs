//! Block arithmetic on interleaved 16-bit PCM: stereo → mono downmix,
//! per-block amplitude statistics and little-endian packing.

/// Bytes in one interleaved stereo frame (two i16 samples).
pub const STEREO_FRAME_BYTES: usize = 4;

/// Bytes in one mono sample.
pub const MONO_SAMPLE_BYTES: usize = 2;

/// Amplitude statistics of one captured block, for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockStats {
    /// Stereo frames that contributed
    pub frames: usize,
    pub min: i16,
    pub max: i16,
    /// Mean of |sample| over every sample of every frame
    pub avg_abs: u32,
}

impl BlockStats {
    /// Compute statistics over the first `frames` interleaved stereo frames.
    pub fn from_stereo(samples: &[i16], frames: usize) -> Self {
        let samples = &samples[..frames * 2];
        if samples.is_empty() {
            return Self {
                frames: 0,
                min: 0,
                max: 0,
                avg_abs: 0,
            };
        }

        let mut min = i16::MAX;
        let mut max = i16::MIN;
        let mut sum_abs: u64 = 0;
        for &s in samples {
            min = min.min(s);
            max = max.max(s);
            sum_abs += u64::from(s.unsigned_abs());
        }

        Self {
            frames,
            min,
            max,
            avg_abs: (sum_abs / samples.len() as u64) as u32,
        }
    }

    /// Peak-to-peak span; i32 because `i16::MAX - i16::MIN` does not fit in i16.
    pub fn range(&self) -> i32 {
        i32::from(self.max) - i32::from(self.min)
    }
}

/// Average left/right pairs into `mono`, returning the number of mono samples written.
///
/// The sum is taken in i32 and divided with truncation toward zero, so the
/// result always lies between the two inputs and fits in i16.
pub fn downmix_stereo(stereo: &[i16], frames: usize, mono: &mut [i16]) -> usize {
    for (out, pair) in mono[..frames]
        .iter_mut()
        .zip(stereo[..frames * 2].chunks_exact(2))
    {
        *out = mix_pair(pair[0], pair[1]);
    }
    frames
}

#[inline]
pub fn mix_pair(left: i16, right: i16) -> i16 {
    ((i32::from(left) + i32::from(right)) / 2) as i16
}

/// Pack samples into a little-endian byte buffer, reusing `out`'s allocation.
pub fn samples_to_le_bytes(samples: &[i16], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(samples.len() * MONO_SAMPLE_BYTES);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
}

/// Decode little-endian i16 samples. A trailing odd byte is ignored.
pub fn le_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(MONO_SAMPLE_BYTES)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}
