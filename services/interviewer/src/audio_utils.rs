use base64::Engine;

const BYTES_PER_SAMPLE: usize = 2;

/// Encodes raw little-endian PCM16 bytes as the base64 payload the realtime API expects.
pub fn encode_pcm16(pcm16_bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm16_bytes)
}

/// Whether `frame` holds a whole number of PCM16 samples.
pub fn is_pcm16_aligned(frame: &[u8]) -> bool {
    frame.len() % BYTES_PER_SAMPLE == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_pcm16() {
        let samples: [i16; 3] = [0, 1000, -1000];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let encoded = encode_pcm16(&bytes);
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .unwrap();
        assert_eq!(decoded, bytes);
        assert_eq!(encode_pcm16(&[]), "");
    }

    #[test]
    fn test_is_pcm16_aligned() {
        assert!(is_pcm16_aligned(&[]));
        assert!(is_pcm16_aligned(&[0, 0, 1, 1]));
        assert!(!is_pcm16_aligned(&[0, 0, 1]));
    }
}
