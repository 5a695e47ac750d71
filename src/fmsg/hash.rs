// SHA-256 digests used to correlate and verify messages

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Size in bytes of every digest on the wire
pub const HASH_LEN: usize = 32;

const HASH_CHUNK: usize = 64 * 1024;

macro_rules! digest_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name([u8; HASH_LEN]);

        impl $name {
            pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
                Self(bytes)
            }

            /// Build from a slice, `None` unless it is exactly 32 bytes
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                <[u8; HASH_LEN]>::try_from(bytes).ok().map(Self)
            }

            pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
                &self.0
            }

            /// First few hex digits, for log lines
            pub fn short(&self) -> String {
                hex::encode(&self.0[..4])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }
    };
}

digest_type!(
    /// SHA-256 of an encoded header; correlation key for challenges
    HeaderHash
);

digest_type!(
    /// SHA-256 of a message body; proves possession of the body
    MessageHash
);

impl HeaderHash {
    pub fn of(header: &[u8]) -> Self {
        Self(Sha256::digest(header).into())
    }
}

impl MessageHash {
    pub fn of(body: &[u8]) -> Self {
        Self(Sha256::digest(body).into())
    }

    /// Hash a file by streaming it through a fixed-size buffer
    pub async fn of_file(path: &Path) -> std::io::Result<Self> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_CHUNK];

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(Self(hasher.finalize().into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_hash_matches_in_memory_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("body.bin");
        let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &body).unwrap();

        let streamed = MessageHash::of_file(&path).await.unwrap();
        assert_eq!(streamed, MessageHash::of(&body));
    }

    #[test]
    fn test_known_digest() {
        // sha256("hi")
        let hash = MessageHash::of(b"hi");
        assert_eq!(
            hash.to_string(),
            "8f434346648f6b96df89dda901c5176b10a6d83961dd3c1ac88b59b2dc327aa4"
        );
        assert_eq!(hash.short(), "8f434346");
    }

    #[test]
    fn test_from_slice_requires_exact_length() {
        assert!(HeaderHash::from_slice(&[0u8; 31]).is_none());
        assert!(HeaderHash::from_slice(&[0u8; 33]).is_none());
        assert_eq!(
            HeaderHash::from_slice(&[9u8; 32]),
            Some(HeaderHash::from_bytes([9u8; 32]))
        );
    }
}
