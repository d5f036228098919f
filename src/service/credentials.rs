//! Password hashing for account columns.
//!
//! Stored form: `sha256$<iterations>$<salt hex>$<digest hex>`.

use rand::RngCore;
use sha2::{Digest, Sha256};

const ALGORITHM: &str = "sha256";
const ITERATIONS: u32 = 100_000;

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn stretch(raw: &str, salt: &str, iterations: u32) -> String {
    let mut digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(raw.as_bytes())
        .finalize();
    for _ in 1..iterations {
        digest = Sha256::new()
            .chain_update(digest)
            .chain_update(salt.as_bytes())
            .finalize();
    }
    to_hex(&digest)
}

pub fn hash_password(raw: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = to_hex(&salt);
    let digest = stretch(raw, &salt, ITERATIONS);
    format!("{}${}${}${}", ALGORITHM, ITERATIONS, salt, digest)
}

/// Check a raw password against a stored hash. The API has no login, so only tests call this.
#[cfg(test)]
pub(crate) fn verify_password(raw: &str, encoded: &str) -> bool {
    let mut parts = encoded.splitn(4, '$');
    let (Some(algorithm), Some(iterations), Some(salt), Some(expected)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    algorithm == ALGORITHM && iterations > 0 && stretch(raw, salt, iterations) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let encoded = hash_password("s3nha-forte");
        assert!(encoded.starts_with("sha256$100000$"));
        assert!(verify_password("s3nha-forte", &encoded));
        assert!(!verify_password("outra", &encoded));
    }

    #[test]
    fn salts_differ() {
        assert_ne!(hash_password("x"), hash_password("x"));
    }

    #[test]
    fn malformed_hashes_never_verify() {
        assert!(!verify_password("x", "x"));
        assert!(!verify_password("x", "md5$1$aa$bb"));
        assert!(!verify_password("x", "sha256$zero$aa$bb"));
    }
}
