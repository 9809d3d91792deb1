// Store-assigned document keys: 4-byte unix seconds, 5 random bytes, 3-byte counter.
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use getrandom::fill as fill_random;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::core::error::{Error, ErrorKind};

const KEY_BYTES: usize = 12;
const COUNTER_MASK: u32 = 0x00ff_ffff;

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentKey(String);

impl DocumentKey {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        if raw.len() != KEY_BYTES * 2 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!("invalid document key {raw:?}")));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unix seconds embedded in the key at generation time.
    pub fn timestamp(&self) -> u32 {
        u32::from_str_radix(&self.0[0..8], 16).unwrap_or_default()
    }

    fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        let mut out = String::with_capacity(KEY_BYTES * 2);
        for byte in bytes {
            out.push_str(&format!("{byte:02x}"));
        }
        Self(out)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
pub struct KeyGenerator {
    process: [u8; 5],
    counter: AtomicU32,
}

impl KeyGenerator {
    pub fn new() -> Result<Self, Error> {
        let mut seed = [0u8; 8];
        fill_random(&mut seed).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message(format!("failed to seed key generator: {err}"))
        })?;
        let mut process = [0u8; 5];
        process.copy_from_slice(&seed[0..5]);
        let counter = u32::from_be_bytes([0, seed[5], seed[6], seed[7]]);
        Ok(Self {
            process,
            counter: AtomicU32::new(counter),
        })
    }

    pub fn next_key(&self) -> DocumentKey {
        let seconds = OffsetDateTime::now_utc().unix_timestamp().clamp(0, u32::MAX as i64) as u32;
        let count = self.counter.fetch_add(1, Ordering::Relaxed) & COUNTER_MASK;

        let mut bytes = [0u8; KEY_BYTES];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&self.process);
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        DocumentKey::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::{DocumentKey, KeyGenerator};
    use crate::core::error::ErrorKind;
    use std::collections::HashSet;

    #[test]
    fn generated_keys_are_hex_and_distinct() {
        let keys = KeyGenerator::new().expect("generator");
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let key = keys.next_key();
            assert_eq!(key.as_str().len(), 24);
            assert!(key.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
            assert!(seen.insert(key));
        }
    }

    #[test]
    fn key_embeds_generation_time() {
        let keys = KeyGenerator::new().expect("generator");
        let now = time::OffsetDateTime::now_utc().unix_timestamp() as u32;
        let stamp = keys.next_key().timestamp();
        assert!(stamp.abs_diff(now) <= 2);
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        let err = DocumentKey::parse("not-a-key").expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        let key = DocumentKey::parse("65A1B2C3D4E5F60718293A4B").expect("key");
        assert_eq!(key.as_str(), "65a1b2c3d4e5f60718293a4b");
    }
}
