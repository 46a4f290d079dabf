use crate::types::HashPart;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a over explicitly encoded bytes.
///
/// Fingerprints are persisted next to cached artifacts, so the output must
/// not change between toolchains or platforms.
#[derive(Clone, Copy, Debug)]
pub struct StableHasher {
    state: u64,
}

impl Default for StableHasher {
    fn default() -> Self {
        Self {
            state: FNV_OFFSET_BASIS,
        }
    }
}

impl StableHasher {
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state ^= u64::from(*byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Length-prefixed, so `["ab", "c"]` and `["a", "bc"]` differ.
    pub fn write_str(&mut self, value: &str) {
        self.write_u64(value.len() as u64);
        self.write_bytes(value.as_bytes());
    }

    pub fn finish(&self) -> u64 {
        self.state
    }
}

pub fn stable_hash_with(f: impl FnOnce(&mut StableHasher)) -> u64 {
    let mut hasher = StableHasher::default();
    f(&mut hasher);
    hasher.finish()
}

/// Hash an ordered list of parts; order matters.
pub fn stable_hash_parts(seed: u64, parts: &[HashPart]) -> u64 {
    stable_hash_with(|hasher| {
        hasher.write_u64(seed);
        for part in parts {
            hasher.write_str(part);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_order_changes_hash() {
        let a = vec!["x".to_string(), "y".to_string()];
        let b = vec!["y".to_string(), "x".to_string()];
        assert_eq!(stable_hash_parts(1, &a), stable_hash_parts(1, &a));
        assert_ne!(stable_hash_parts(1, &a), stable_hash_parts(1, &b));
        assert_ne!(stable_hash_parts(1, &a), stable_hash_parts(2, &a));
        let split = vec!["ab".to_string(), "c".to_string()];
        let shifted = vec!["a".to_string(), "bc".to_string()];
        assert_ne!(stable_hash_parts(1, &split), stable_hash_parts(1, &shifted));
    }

    #[test]
    fn fingerprints_are_pinned() {
        assert_eq!(stable_hash_with(|_| {}), 0xcbf2_9ce4_8422_2325);
        assert_eq!(stable_hash_with(|h| h.write_bytes(b"a")), 0xaf63_dc4c_8601_ec8c);
        let parts = vec!["x".to_string(), "y".to_string()];
        assert_eq!(stable_hash_parts(1, &parts), 0x6e7c_f669_d174_82ad);
    }
}
