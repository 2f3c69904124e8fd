//! Per-frame encryption envelope.
//!
//! When a connection carries a `key` option, each encoded frame is wrapped
//! in AES-128-CBC with PKCS#7 padding. The key is derived from the password
//! with PBKDF2-HMAC-SHA256 over a fixed salt, and every frame gets a fresh
//! random IV prepended unencrypted, so a receiver can decrypt any frame in
//! isolation.

use aes::cipher::{
    block_padding::Pkcs7, generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut,
    BlockSizeUser, KeyIvInit,
};
use rand::RngCore;
use sha2::Sha256;

use crate::error::FramingError;
use crate::packet::FRAME_HEADER_SIZE;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const KEY_LEN: usize = 16;
const IV_LEN: usize = 16;
const KDF_SALT: &[u8] = b"sidewire";
const KDF_ROUNDS: u32 = 4096;

/// Symmetric cipher for one connection, derived from its password.
#[derive(Clone)]
pub struct FrameCipher {
    key: [u8; KEY_LEN],
}

impl FrameCipher {
    pub fn new(password: &str) -> Self {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), KDF_SALT, KDF_ROUNDS, &mut key);
        Self { key }
    }

    /// Wrap one plaintext frame: 16-byte random IV followed by the padded
    /// ciphertext.
    pub fn encrypt(&self, frame: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        let ciphertext = Aes128CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(frame);
        let mut envelope = Vec::with_capacity(IV_LEN + ciphertext.len());
        envelope.extend_from_slice(&iv);
        envelope.extend_from_slice(&ciphertext);
        envelope
    }

    /// Unwrap an envelope produced by [`encrypt`](Self::encrypt). Fails on
    /// short input, a ciphertext that is not a whole number of blocks, or
    /// padding that does not verify (the usual symptom of a wrong key).
    pub fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>, FramingError> {
        if envelope.len() < IV_LEN + aes::Aes128::block_size() {
            return Err(FramingError::BadCiphertext);
        }
        let (iv, ciphertext) = envelope.split_at(IV_LEN);
        if ciphertext.len() % aes::Aes128::block_size() != 0 {
            return Err(FramingError::BadCiphertext);
        }
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| FramingError::BadCiphertext)?;
        Aes128CbcDec::new(&self.key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| FramingError::BadCiphertext)
    }

    /// Split and decrypt a contiguous run of envelopes, the layout an
    /// encrypted file connection persists. Each envelope's extent is
    /// recovered by decrypting only its first block, which holds the frame
    /// header with the payload length.
    pub fn decrypt_stream(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
        let block = aes::Aes128::block_size();
        let mut frames = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let remaining = &bytes[offset..];
            if remaining.len() < IV_LEN + block {
                return Err(FramingError::BadCiphertext);
            }
            let iv: [u8; IV_LEN] = remaining[..IV_LEN]
                .try_into()
                .map_err(|_| FramingError::BadCiphertext)?;
            let mut first = GenericArray::clone_from_slice(&remaining[IV_LEN..IV_LEN + block]);
            Aes128CbcDec::new(&self.key.into(), &iv.into()).decrypt_block_mut(&mut first);
            let payload_len =
                u32::from_le_bytes([first[1], first[2], first[3], first[4]]) as usize;
            let frame_len = FRAME_HEADER_SIZE + payload_len;
            let padded = frame_len + block - (frame_len % block);
            let envelope_len = IV_LEN + padded;
            if envelope_len > remaining.len() {
                return Err(FramingError::BadCiphertext);
            }
            let frame = self.decrypt(&remaining[..envelope_len])?;
            if frame.len() != frame_len {
                return Err(FramingError::BadCiphertext);
            }
            frames.push(frame);
            offset += envelope_len;
        }
        Ok(frames)
    }
}

impl std::fmt::Debug for FrameCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("FrameCipher").finish_non_exhaustive()
    }
}
