//! Object storage for generated audio and presigned download URLs.

use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

/// Blob store addressed by `/`-separated keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// A URL granting read access to `key` for `ttl`.
    fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;

    /// Whether a presigned URL's `expires`/`signature` pair is valid for `key`.
    fn verify_presigned(&self, key: &str, expires: u64, signature: &str) -> bool;
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

type HmacSha256 = Hmac<Sha256>;

/// Issues and checks expiring download URLs signed with HMAC-SHA256.
#[derive(Clone)]
pub struct UrlSigner {
    secret: String,
    base_url: String,
}

impl UrlSigner {
    pub fn new(secret: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn mac(&self, key: &str, expires: u64) -> HmacSha256 {
        // HMAC accepts keys of any length
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .unwrap_or_else(|_| unreachable!());
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    fn signature(&self, key: &str, expires: u64) -> String {
        self.mac(key, expires)
            .finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    pub fn presign(&self, key: &str, ttl: Duration) -> String {
        self.presign_at(key, ttl, now_unix())
    }

    fn presign_at(&self, key: &str, ttl: Duration, now: u64) -> String {
        let expires = now + ttl.as_secs();
        format!(
            "{}/audio/{key}?expires={expires}&signature={}",
            self.base_url,
            self.signature(key, expires)
        )
    }

    pub fn verify(&self, key: &str, expires: u64, signature: &str) -> bool {
        self.verify_at(key, expires, signature, now_unix())
    }

    fn verify_at(&self, key: &str, expires: u64, signature: &str, now: u64) -> bool {
        if expires < now {
            return false;
        }
        let Some(tag) = decode_hex(signature) else {
            return false;
        };
        self.mac(key, expires).verify_slice(&tag).is_ok()
    }
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 || !text.is_ascii() {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}

/// Stores objects as files under a root directory.
pub struct LocalObjectStore {
    root: PathBuf,
    signer: UrlSigner,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            root: root.into(),
            signer,
        }
    }

    /// Map a key to a file under the root, rejecting anything that could
    /// escape it.
    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        log::info!("Stored {key} at {}", path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        self.object_path(key)?;
        Ok(self.signer.presign(key, ttl))
    }

    fn verify_presigned(&self, key: &str, expires: u64, signature: &str) -> bool {
        self.signer.verify(key, expires, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_param<'a>(url: &'a str, name: &str) -> &'a str {
        let query = url.split_once('?').map(|(_, q)| q).unwrap_or("");
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix(&format!("{name}=")))
            .unwrap_or("")
    }

    #[test]
    fn presigned_urls_verify_until_they_expire() {
        let signer = UrlSigner::new("secret", "http://localhost:8000/");
        let url = signer.presign_at("out/a.wav", Duration::from_secs(3600), 1_000);
        assert!(url.starts_with("http://localhost:8000/audio/out/a.wav?expires=4600&"));

        let signature = query_param(&url, "signature");
        assert!(signer.verify_at("out/a.wav", 4600, signature, 1_000));
        assert!(signer.verify_at("out/a.wav", 4600, signature, 4_600));
        assert!(!signer.verify_at("out/a.wav", 4600, signature, 4_601));
        assert!(!signer.verify_at("out/b.wav", 4600, signature, 1_000));
        assert!(!signer.verify_at("out/a.wav", 9999, signature, 1_000));

        let other = UrlSigner::new("other", "http://localhost:8000");
        assert!(!other.verify_at("out/a.wav", 4600, signature, 1_000));

        assert_eq!(signature.len(), 64);
        assert!(!signer.verify_at("out/a.wav", 4600, &signature[..62], 1_000));
        assert!(!signer.verify_at("out/a.wav", 4600, "zz", 1_000));
        assert!(!signer.verify_at("out/a.wav", 4600, "", 1_000));
    }

    #[test]
    fn signatures_are_hmac_sha256() {
        // RFC 4231 test case 2
        let mut mac = HmacSha256::new_from_slice(b"Jefe").unwrap();
        mac.update(b"what do ya want for nothing?");
        let expected = decode_hex(
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843",
        )
        .unwrap();
        assert!(mac.verify_slice(&expected).is_ok());

        let signer = UrlSigner::new("Jefe", "http://x");
        let tag = decode_hex(&signer.signature("k", 7)).unwrap();
        let mut mac = HmacSha256::new_from_slice(b"Jefe").unwrap();
        mac.update(b"k\n7");
        assert!(mac.verify_slice(&tag).is_ok());
    }

    #[tokio::test]
    async fn local_store_round_trips_and_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path(), UrlSigner::new("s", "http://x"));

        store.put("prefix/clip.wav", vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get("prefix/clip.wav").await.unwrap(), vec![1, 2, 3]);
        assert!(dir.path().join("prefix/clip.wav").is_file());

        assert!(matches!(
            store.get("prefix/missing.wav").await,
            Err(StorageError::NotFound(_))
        ));
        for key in ["../escape.wav", "/abs.wav", "a/../../b.wav", "", "a\\b.wav"] {
            assert!(matches!(
                store.put(key, vec![0]).await,
                Err(StorageError::InvalidKey(_))
            ));
        }
    }
}
