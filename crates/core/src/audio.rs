//! Raw PCM helpers.

use bytes::Bytes;

/// Duration of the silent placeholder substituted for synthesized audio
/// when synthesis fails outright or misses its first-byte budget.
pub const SILENCE_PLACEHOLDER_MS: u32 = 200;

/// A run of zeroed 16-bit mono samples at the negotiated rate.
pub fn silence_chunk(duration_ms: u32, sample_rate: u32) -> Bytes {
    let samples = (sample_rate as u64 * duration_ms as u64 / 1000) as usize;
    Bytes::from(vec![0u8; samples * 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_sized_for_rate_and_duration() {
        // 200 ms at 16 kHz mono linear16: 3200 samples, 2 bytes each.
        let chunk = silence_chunk(SILENCE_PLACEHOLDER_MS, 16_000);
        assert_eq!(chunk.len(), 6_400);
        assert!(chunk.iter().all(|&b| b == 0));

        // Other rates scale linearly.
        assert_eq!(silence_chunk(100, 8_000).len(), 1_600);
    }
}
