use super::DecryptionError;
use super::rc4::Rc4;
use crate::ObjectId;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use md5::{Digest as _, Md5};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// A cipher named by a crypt filter's `/CFM`.
pub trait CryptFilter: std::fmt::Debug + Send + Sync {
    fn method(&self) -> &[u8];
    /// The key for one object, derived from the file encryption key.
    fn compute_key(&self, key: &[u8], obj_id: ObjectId) -> Result<Vec<u8>, DecryptionError>;
    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, DecryptionError>;
}

/// Extends the file key with the low bytes of the object id (and the AES salt), then hashes.
fn object_key(key: &[u8], obj_id: ObjectId, salt: &[u8]) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(key);
    hasher.update(&obj_id.0.to_le_bytes()[..3]);
    hasher.update(obj_id.1.to_le_bytes());
    hasher.update(salt);

    let key_len = std::cmp::min(key.len() + 5, 16);
    hasher.finalize()[..key_len].to_vec()
}

/// Splits off the IV and strips the PKCS#7 padding.
fn cbc_decrypt<D>(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, DecryptionError>
where
    D: KeyIvInit + BlockDecryptMut,
{
    if ciphertext.len() % 16 != 0 {
        return Err(DecryptionError::InvalidCipherTextLength);
    }

    // Nothing but the IV.
    if ciphertext.len() <= 16 {
        return Ok(vec![]);
    }

    let (iv, data) = ciphertext.split_at(16);
    let mut data = data.to_vec();
    let plaintext = D::new_from_slices(key, iv)
        .map_err(|_| DecryptionError::InvalidKeyLength)?
        .decrypt_padded_mut::<Pkcs7>(&mut data)
        .map_err(|_| DecryptionError::Padding)?;
    Ok(plaintext.to_vec())
}

#[derive(Clone, Copy, Debug)]
pub struct IdentityCryptFilter;

impl CryptFilter for IdentityCryptFilter {
    fn method(&self) -> &[u8] {
        b"Identity"
    }

    fn compute_key(&self, key: &[u8], _obj_id: ObjectId) -> Result<Vec<u8>, DecryptionError> {
        Ok(key.to_vec())
    }

    fn decrypt(&self, _key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        Ok(ciphertext.to_vec())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Rc4CryptFilter;

impl CryptFilter for Rc4CryptFilter {
    fn method(&self) -> &[u8] {
        b"V2"
    }

    fn compute_key(&self, key: &[u8], obj_id: ObjectId) -> Result<Vec<u8>, DecryptionError> {
        Ok(object_key(key, obj_id, b""))
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        Ok(Rc4::new(key).apply(ciphertext))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Aes128CryptFilter;

impl CryptFilter for Aes128CryptFilter {
    fn method(&self) -> &[u8] {
        b"AESV2"
    }

    fn compute_key(&self, key: &[u8], obj_id: ObjectId) -> Result<Vec<u8>, DecryptionError> {
        Ok(object_key(key, obj_id, b"sAlT"))
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        if key.len() != 16 {
            return Err(DecryptionError::InvalidKeyLength);
        }
        cbc_decrypt::<Aes128CbcDec>(key, ciphertext)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Aes256CryptFilter;

impl CryptFilter for Aes256CryptFilter {
    fn method(&self) -> &[u8] {
        b"AESV3"
    }

    fn compute_key(&self, key: &[u8], _obj_id: ObjectId) -> Result<Vec<u8>, DecryptionError> {
        // AESV3 uses the 32-byte file key directly.
        Ok(key.to_vec())
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        if key.len() != 32 {
            return Err(DecryptionError::InvalidKeyLength);
        }
        cbc_decrypt::<Aes256CbcDec>(key, ciphertext)
    }
}
