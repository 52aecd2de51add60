//! One-way password hashing for stored credentials.
//!
//! `Sha256` is the legacy format: unsalted lowercase hex, so the same password always
//! hashes to the same string. `Argon2` stores a salted PHC string (`$argon2id$...`).
//! Verification picks the algorithm from the stored string, not from the configured
//! scheme, so both formats can live in one store.

use argon2::Argon2;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use sha2::Digest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasswordScheme {
    #[default]
    Sha256,
    Argon2,
}

impl std::str::FromStr for PasswordScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" => Ok(PasswordScheme::Sha256),
            "argon2" | "argon2id" => Ok(PasswordScheme::Argon2),
            other => Err(format!("unknown password scheme: {other:?}")),
        }
    }
}

impl PasswordScheme {
    pub fn hash(self, pw: &[u8]) -> Result<String, password_hash::Error> {
        match self {
            PasswordScheme::Sha256 => Ok(sha256_hex(pw)),
            PasswordScheme::Argon2 => {
                let salt = SaltString::generate(&mut password_hash::rand_core::OsRng);
                Ok(Argon2::default().hash_password(pw, &salt)?.to_string())
            }
        }
    }
}

/// Check `pw` against a stored hash in either supported format.
pub fn verify(pw: &[u8], stored: &str) -> bool {
    if stored.starts_with('$') {
        match PasswordHash::new(stored) {
            Ok(ph) => Argon2::default().verify_password(pw, &ph).is_ok(),
            Err(_) => false,
        }
    } else {
        sha256_hex(pw).as_bytes() == stored.as_bytes()
    }
}

fn sha256_hex(b: &[u8]) -> String {
    let out = sha2::Sha256::digest(b);
    hex_lower(&out)
}

fn hex_lower(b: &[u8]) -> String {
    const LUT: &[u8; 16] = b"0123456789abcdef";
    let mut s = String::with_capacity(b.len() * 2);
    for &x in b {
        s.push(LUT[(x >> 4) as usize] as char);
        s.push(LUT[(x & 0x0f) as usize] as char);
    }
    s
}
