//! Preimage serialization and the dual difficulty predicate. Both are pure
//! functions; nothing here touches the network or the hash engine.

use crate::model::Challenge;

/// Builds the exact byte sequence the network hashes: nonce (16 hex,
/// big-endian u64) followed by the raw address bytes, then every challenge
/// field in a fixed order, with no separators. The server recomputes this
/// from scratch, so a single stray byte here is an unrecoverable rejection.
pub fn serialize(nonce: u64, address: &str, challenge: &Challenge) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + address.len() + 64);
    buf.extend_from_slice(format!("{:016x}", nonce).as_bytes());
    buf.extend_from_slice(address.as_bytes());
    buf.extend_from_slice(challenge.challenge_id.as_bytes());
    buf.extend_from_slice(challenge.difficulty.as_bytes());
    buf.extend_from_slice(challenge.no_pre_mine.as_bytes());
    buf.extend_from_slice(challenge.latest_submission.as_bytes());
    buf.extend_from_slice(challenge.no_pre_mine_hour.to_string().as_bytes());
    buf
}

/// Formats a nonce the way workers advertise it: 16 lowercase hex chars.
pub fn format_nonce(nonce: u64) -> String {
    format!("{:016x}", nonce)
}

/// Number of leading zero bits in an 8-hex-char (32 bit) difficulty string.
fn leading_zero_bits(difficulty_hex: &str) -> Result<u32, hex::FromHexError> {
    let bytes = hex::decode(difficulty_hex)?;
    let mut zeros = 0u32;
    for byte in &bytes {
        if *byte == 0 {
            zeros += 8;
            continue;
        }
        zeros += byte.leading_zeros();
        break;
    }
    Ok(zeros)
}

fn mask_u32(difficulty_hex: &str) -> Result<u32, hex::FromHexError> {
    let bytes = hex::decode(difficulty_hex)?;
    let mut arr = [0u8; 4];
    let n = bytes.len().min(4);
    arr[..n].copy_from_slice(&bytes[..n]);
    Ok(u32::from_be_bytes(arr))
}

fn first_32_bits(hash_hex: &str) -> Result<u32, hex::FromHexError> {
    mask_u32(&hash_hex[..hash_hex.len().min(8)])
}

/// Evaluates the dual difficulty predicate: the hash must have at least as
/// many leading zero bits as the difficulty demands (check 1), and every
/// bit set in the hash's first 32 bits must also be set in the difficulty's
/// 32-bit value (check 2). Both must hold; the server applies both.
pub fn matches_difficulty(hash_hex: &str, difficulty_hex: &str) -> bool {
    let Ok(z) = leading_zero_bits(difficulty_hex) else {
        return false;
    };
    let Ok(h32) = first_32_bits(hash_hex) else {
        return false;
    };
    let Ok(m32) = mask_u32(difficulty_hex) else {
        return false;
    };

    let hash_leading_zeros = match hex::decode(hash_hex) {
        Ok(bytes) => {
            let mut zeros = 0u32;
            for byte in &bytes {
                if *byte == 0 {
                    zeros += 8;
                    continue;
                }
                zeros += byte.leading_zeros();
                break;
            }
            zeros
        }
        Err(_) => return false,
    };

    hash_leading_zeros >= z && (h32 | m32) == m32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge(difficulty: &str) -> Challenge {
        Challenge {
            challenge_id: "chal-1".into(),
            difficulty: difficulty.into(),
            no_pre_mine: "feedface".into(),
            no_pre_mine_hour: 42,
            latest_submission: "cafebabe".into(),
        }
    }

    #[test]
    fn serialize_is_deterministic_and_ordered() {
        let c = challenge("0fffffff");
        let a = serialize(7, "addr-1", &c);
        let b = serialize(7, "addr-1", &c);
        assert_eq!(a, b);
        assert!(a.starts_with(b"0000000000000007"));
        assert!(a.ends_with(b"42"));
    }

    #[test]
    fn difficulty_all_zero_requires_zero_prefix_hash() {
        // Z = 32, mask check requires H32 == 0.
        assert!(matches_difficulty(
            "00000000aabbccddeeff00112233445566778899aabbccddeeff001122334455",
            "00000000"
        ));
        assert!(!matches_difficulty(
            "00000001aabbccddeeff00112233445566778899aabbccddeeff001122334455",
            "00000000"
        ));
    }

    #[test]
    fn difficulty_all_ones_accepts_any_hash() {
        assert!(matches_difficulty(
            "ffffffffaabbccddeeff00112233445566778899aabbccddeeff001122334455",
            "ffffffff"
        ));
        assert!(matches_difficulty(
            "00000000000000000000000000000000000000000000000000000000000000",
            "ffffffff"
        ));
    }

    #[test]
    fn scenario_s1_clean_solve_passes_both_checks() {
        // difficulty 0x0fffffff -> Z = 4; hash prefix 0x0effffff.
        let hash = "0effffff0000000000000000000000000000000000000000000000000000";
        assert!(matches_difficulty(hash, "0fffffff"));
    }

    #[test]
    fn scenario_s2_mask_mismatch_is_rejected_locally() {
        // prefix 0x10000000 has enough leading zeros (Z=4 for 0x0fffffff)
        // but fails the mask: 0x1fffffff != 0x0fffffff.
        let hash = "100000000000000000000000000000000000000000000000000000000000";
        assert!(!matches_difficulty(hash, "0fffffff"));
    }

    #[test]
    fn format_nonce_is_sixteen_lowercase_hex_chars() {
        let s = format_nonce(0xabc);
        assert_eq!(s.len(), 16);
        assert_eq!(s, "0000000000000abc");
    }
}
