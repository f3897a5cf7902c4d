use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const KEY_LEN: usize = 32; // AES-256
// AES-GCM standard nonce size (12 bytes / 96-bit)
pub const NONCE_LEN: usize = 12;

/// Encrypt with AES-256-GCM under a fresh random nonce.
/// Returns base64(nonce || ciphertext || tag).
pub fn encrypt(data: &[u8], key_bytes: &[u8; KEY_LEN]) -> Result<String> {
    let key = Key::<Aes256Gcm>::from_slice(key_bytes);
    let cipher = Aes256Gcm::new(key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng); // 96-bits; unique per message

    let ciphertext = cipher
        .encrypt(&nonce, data)
        .map_err(|e| anyhow!("Encryption failure: {}", e))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(blob))
}

/// Inverse of [`encrypt`]. Fails on malformed base64, short input or a bad tag.
pub fn decrypt(blob_b64: &str, key_bytes: &[u8; KEY_LEN]) -> Result<Vec<u8>> {
    let blob = BASE64
        .decode(blob_b64)
        .map_err(|e| anyhow!("Invalid base64 ciphertext: {}", e))?;

    if blob.len() <= NONCE_LEN {
        return Err(anyhow!(
            "Ciphertext too short: expected more than {} bytes, got {}",
            NONCE_LEN,
            blob.len()
        ));
    }

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let key = Key::<Aes256Gcm>::from_slice(key_bytes);
    let cipher = Aes256Gcm::new(key);

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| anyhow!("Decryption failure: {}", e))
}

/// HMAC-SHA256 of `data` under `key`, raw bytes
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).map_err(|e| anyhow!("Invalid HMAC key: {}", e))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// HMAC-SHA256 of `data` under `key`, lowercase hex
pub fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> Result<String> {
    Ok(hex::encode(hmac_sha256(key, data)?))
}

/// Constant-time check of a hex HMAC-SHA256 digest
pub fn verify_hmac_sha256_hex(key: &[u8], data: &[u8], expected_hex: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key) else {
        return false;
    };
    mac.update(data);
    mac.verify_slice(&expected).is_ok()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Random bytes from the OS generator, hex encoded
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Constant-time string comparison for shared secrets
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
