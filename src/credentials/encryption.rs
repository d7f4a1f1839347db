//! AES-256-CBC encryption for stored credentials.
//!
//! Every call to [`encrypt`] draws a fresh random 16-byte IV. The storable blob
//! is `hex(iv) ":" hex(ciphertext)`; hex never emits `:`, so decoding splits on
//! the first separator.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use anyhow::{anyhow, Context, Result};
use rand::{rngs::OsRng, RngCore};
use std::fmt;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the IV in bytes (one AES block)
pub const IV_SIZE: usize = 16;

/// Separator between the IV and the ciphertext in a stored blob
const BLOB_SEPARATOR: char = ':';

/// Derives the cipher key from the configured master secret.
///
/// The secret's UTF-8 bytes are truncated or zero-padded to [`KEY_SIZE`].
pub fn derive_key(master_secret: &str) -> Result<[u8; KEY_SIZE]> {
    if master_secret.is_empty() {
        return Err(anyhow!("Master secret must not be empty"));
    }

    let mut key = [0u8; KEY_SIZE];
    let bytes = master_secret.as_bytes();
    let len = bytes.len().min(KEY_SIZE);
    key[..len].copy_from_slice(&bytes[..len]);
    Ok(key)
}

/// Encrypts plaintext using AES-256-CBC with a random IV.
///
/// # Returns
/// * `Ok((iv, ciphertext))` - Both hex-encoded
/// * `Err` - If the key has the wrong length
pub fn encrypt(plaintext: &str, key: &[u8]) -> Result<(String, String)> {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let encryptor = Aes256CbcEnc::new_from_slices(key, &iv)
        .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;
    let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    Ok((hex::encode(iv), hex::encode(ciphertext)))
}

/// Decrypts hex-encoded ciphertext using AES-256-CBC.
///
/// Fails on bad hex, a wrong IV length, a wrong key (bad padding) or output
/// that is not UTF-8. A wrong key can occasionally unpad cleanly; the result is
/// then garbage, never the original plaintext.
pub fn decrypt(iv: &str, ciphertext: &str, key: &[u8]) -> Result<String> {
    let iv_bytes = hex::decode(iv).context("Failed to decode IV")?;
    if iv_bytes.len() != IV_SIZE {
        return Err(anyhow!(
            "Invalid IV size: expected {}, got {}",
            IV_SIZE,
            iv_bytes.len()
        ));
    }
    let ciphertext_bytes = hex::decode(ciphertext).context("Failed to decode ciphertext")?;

    let decryptor = Aes256CbcDec::new_from_slices(key, &iv_bytes)
        .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;
    let plaintext_bytes = decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext_bytes)
        .map_err(|_| anyhow!("Decryption failed (wrong key or corrupted data)"))?;

    String::from_utf8(plaintext_bytes).context("Decrypted data is not valid UTF-8")
}

/// Cipher bound to the process-wide master key.
///
/// The key is read-only after construction and never printed.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; KEY_SIZE],
}

impl Cipher {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    pub fn from_master_secret(master_secret: &str) -> Result<Self> {
        Ok(Self::new(derive_key(master_secret)?))
    }

    /// Encrypts `plaintext` into a storable `iv:ciphertext` blob.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let (iv, ciphertext) = encrypt(plaintext, &self.key)?;
        Ok(format!("{}{}{}", iv, BLOB_SEPARATOR, ciphertext))
    }

    /// Decrypts a blob produced by [`Cipher::seal`].
    pub fn open(&self, blob: &str) -> Result<String> {
        let (iv, ciphertext) = blob
            .split_once(BLOB_SEPARATOR)
            .ok_or_else(|| anyhow!("Malformed credential blob: missing separator"))?;
        decrypt(iv, ciphertext, &self.key)
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher").field("key", &"[REDACTED]").finish()
    }
}
