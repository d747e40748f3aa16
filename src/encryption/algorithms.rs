use super::DecryptionError;
use super::Permissions;
use super::rc4::Rc4;
use crate::{Dictionary, Object};
use aes::cipher::{BlockDecryptMut as _, BlockEncryptMut as _, KeyInit as _, KeyIvInit as _};
use md5::{Digest as _, Md5};
use sha2::{Sha256, Sha384, Sha512};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256EcbDec = ecb::Decryptor<aes::Aes256>;

// Passwords shorter than 32 bytes are padded with the leading bytes of this string.
pub(crate) const PAD_BYTES: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08, 0x2E, 0x2E, 0x00,
    0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// The standard security handler's password algorithms, parameterised by an `/Encrypt`
/// dictionary and the first element of the trailer `/ID`.
#[derive(Clone, Debug, Default)]
pub struct PasswordAlgorithm {
    pub(crate) encrypt_metadata: bool,
    pub(crate) length: Option<usize>,
    pub(crate) version: i64,
    pub(crate) revision: i64,
    pub(crate) owner_value: Vec<u8>,
    pub(crate) owner_encrypted: Vec<u8>,
    pub(crate) user_value: Vec<u8>,
    pub(crate) user_encrypted: Vec<u8>,
    pub(crate) permissions: Permissions,
    pub(crate) permission_encrypted: Vec<u8>,
    pub(crate) file_id: Option<Vec<u8>>,
}

fn string_entry(dict: &Dictionary, key: &[u8], missing: DecryptionError) -> Result<Vec<u8>, DecryptionError> {
    dict.get(key)
        .map_err(|_| missing)?
        .as_str()
        .map(<[u8]>::to_vec)
        .map_err(|_| DecryptionError::InvalidType)
}

fn optional_string_entry(dict: &Dictionary, key: &[u8]) -> Vec<u8> {
    dict.get(key).and_then(Object::as_str).map(<[u8]>::to_vec).unwrap_or_default()
}

/// Pads or truncates `password` to exactly 32 bytes.
fn pad_password(password: &[u8]) -> [u8; 32] {
    let len = password.len().min(32);
    let mut padded = [0u8; 32];
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PAD_BYTES[..32 - len]);
    padded
}

impl PasswordAlgorithm {
    /// Reads and validates the entries of an `/Encrypt` dictionary.
    pub fn from_dictionary(encrypted: &Dictionary, file_id: Option<&[u8]>) -> Result<Self, DecryptionError> {
        let encrypt_metadata = match encrypted.get(b"EncryptMetadata") {
            Ok(value) => value.as_bool().map_err(|_| DecryptionError::InvalidType)?,
            Err(_) => true,
        };

        let length = match encrypted.get(b"Length") {
            Ok(value) => Some(
                value
                    .as_i64()
                    .ok()
                    .and_then(|length| usize::try_from(length).ok())
                    .ok_or(DecryptionError::InvalidType)?,
            ),
            Err(_) => None,
        };

        let version = encrypted
            .get(b"V")
            .map_err(|_| DecryptionError::MissingVersion)?
            .as_i64()
            .map_err(|_| DecryptionError::InvalidType)?;

        // V0 and V3 are undocumented algorithms.
        match version {
            1 | 2 | 4 | 5 => (),
            0 | 3 => return Err(DecryptionError::InvalidVersion),
            _ => return Err(DecryptionError::UnsupportedVersion),
        }

        if let Some(length) = length {
            let valid = match version {
                // Optional for V1, but when present it must be the fixed 40 bits.
                1 => length == 40,
                2 => length % 8 == 0 && (40..=128).contains(&length),
                4 => length == 128,
                _ => length == 256,
            };
            if !valid {
                return Err(DecryptionError::InvalidKeyLength);
            }
        }

        let revision = encrypted
            .get(b"R")
            .map_err(|_| DecryptionError::MissingRevision)?
            .as_i64()
            .map_err(|_| DecryptionError::InvalidType)?;
        if !(2..=6).contains(&revision) {
            return Err(DecryptionError::UnsupportedRevision);
        }

        let hash_length = if revision <= 4 { 32 } else { 48 };

        let owner_value = string_entry(encrypted, b"O", DecryptionError::MissingOwnerPassword)?;
        if owner_value.len() != hash_length {
            return Err(DecryptionError::InvalidHashLength);
        }

        let user_value = string_entry(encrypted, b"U", DecryptionError::MissingUserPassword)?;
        // Some writers pad U beyond 32 bytes for R4 and earlier; only the prefix is compared.
        if user_value.len() < hash_length || (revision >= 5 && user_value.len() != hash_length) {
            return Err(DecryptionError::InvalidHashLength);
        }

        let owner_encrypted = optional_string_entry(encrypted, b"OE");
        let user_encrypted = optional_string_entry(encrypted, b"UE");
        let permission_encrypted = optional_string_entry(encrypted, b"Perms");
        if revision >= 5
            && (owner_encrypted.len() != 32 || user_encrypted.len() != 32 || permission_encrypted.len() != 16)
        {
            return Err(DecryptionError::InvalidCipherTextLength);
        }

        let permission_value = encrypted
            .get(b"P")
            .map_err(|_| DecryptionError::MissingPermissions)?
            .as_i64()
            .map_err(|_| DecryptionError::InvalidType)? as u64;

        Ok(Self {
            encrypt_metadata,
            length,
            version,
            revision,
            owner_value,
            owner_encrypted,
            user_value,
            user_encrypted,
            permissions: Permissions::from_bits_retain(permission_value),
            permission_encrypted,
            file_id: file_id.map(<[u8]>::to_vec),
        })
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn revision(&self) -> i64 {
        self.revision
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn encrypt_metadata(&self) -> bool {
        self.encrypt_metadata
    }

    /// Length in bytes of the file encryption key for R4 and earlier.
    fn key_length(&self) -> usize {
        if self.revision == 2 {
            return 5;
        }
        let default_bits = if self.version >= 4 { 128 } else { 40 };
        self.length.unwrap_or(default_bits) / 8
    }

    fn file_id(&self) -> Result<&[u8], DecryptionError> {
        self.file_id.as_deref().ok_or(DecryptionError::MissingFileID)
    }

    /// Converts a password to bytes the way the revision expects: Windows-1252 up to R4,
    /// SASLprep'd UTF-8 from R5.
    pub fn sanitize_password(&self, password: &str) -> Result<Vec<u8>, DecryptionError> {
        match self.revision {
            2..=4 => {
                let (bytes, _, _) = encoding_rs::WINDOWS_1252.encode(password);
                Ok(bytes.into_owned())
            }
            5..=6 => Ok(stringprep::saslprep(password)?.as_bytes().to_vec()),
            _ => Err(DecryptionError::UnsupportedRevision),
        }
    }

    /// Algorithm 2: the file encryption key for a password, without authenticating it.
    pub fn compute_file_encryption_key_r4<P>(&self, password: P) -> Result<Vec<u8>, DecryptionError>
    where
        P: AsRef<[u8]>,
    {
        let mut hasher = Md5::new();
        hasher.update(pad_password(password.as_ref()));
        hasher.update(&self.owner_value);
        // P is hashed as a 32-bit value, low-order byte first.
        hasher.update((self.permissions.bits() as u32).to_le_bytes());
        hasher.update(self.file_id()?);
        if self.revision >= 4 && !self.encrypt_metadata {
            hasher.update(b"\xff\xff\xff\xff");
        }
        let mut hash = hasher.finalize();

        let n = self.key_length();
        // MD5 caps the key at 128 bits.
        if !(5..=16).contains(&n) {
            return Err(DecryptionError::InvalidKeyLength);
        }

        if self.revision >= 3 {
            for _ in 0..50 {
                hash = Md5::digest(&hash[..n]);
            }
        }

        Ok(hash[..n].to_vec())
    }

    /// The RC4 key derived from the owner password (or the user password when there is none).
    fn owner_key_r4(&self, owner_password: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        let mut hash = Md5::digest(pad_password(owner_password));
        if self.revision >= 3 {
            for _ in 0..50 {
                hash = Md5::digest(hash);
            }
        }

        let n = self.key_length();
        if !(5..=16).contains(&n) {
            return Err(DecryptionError::InvalidKeyLength);
        }
        Ok(hash[..n].to_vec())
    }

    /// Algorithm 3: the `/O` value for an owner and user password.
    pub fn compute_hashed_owner_password_r4<O, U>(
        &self, owner_password: Option<O>, user_password: U,
    ) -> Result<Vec<u8>, DecryptionError>
    where
        O: AsRef<[u8]>,
        U: AsRef<[u8]>,
    {
        let user_password = user_password.as_ref();
        let owner_password = owner_password.as_ref().map(AsRef::as_ref).unwrap_or(user_password);
        let key = self.owner_key_r4(owner_password)?;

        let mut result = Rc4::new(&key).apply(pad_password(user_password));
        if self.revision >= 3 {
            for i in 1..=19 {
                let round_key: Vec<u8> = key.iter().map(|byte| byte ^ i).collect();
                result = Rc4::new(&round_key).apply(&result);
            }
        }
        Ok(result)
    }

    /// Algorithm 4: the `/U` value for revision 2.
    pub fn compute_hashed_user_password_r2<U>(&self, user_password: U) -> Result<Vec<u8>, DecryptionError>
    where
        U: AsRef<[u8]>,
    {
        let file_encryption_key = self.compute_file_encryption_key_r4(user_password)?;
        Ok(Rc4::new(&file_encryption_key).apply(PAD_BYTES))
    }

    /// Algorithm 5: the `/U` value for revisions 3 and 4. The trailing 16 bytes are zero.
    pub fn compute_hashed_user_password_r3_r4<U>(&self, user_password: U) -> Result<Vec<u8>, DecryptionError>
    where
        U: AsRef<[u8]>,
    {
        let file_encryption_key = self.compute_file_encryption_key_r4(user_password)?;

        let mut hasher = Md5::new();
        hasher.update(PAD_BYTES);
        hasher.update(self.file_id()?);
        let hash = hasher.finalize();

        let mut result = Rc4::new(&file_encryption_key).apply(hash);
        for i in 1..=19 {
            let round_key: Vec<u8> = file_encryption_key.iter().map(|byte| byte ^ i).collect();
            result = Rc4::new(&round_key).apply(&result);
        }

        result.resize(32, 0);
        Ok(result)
    }

    /// Algorithm 6.
    fn authenticate_user_password_r4(&self, user_password: &[u8]) -> Result<(), DecryptionError> {
        let hashed_user_password = match self.revision {
            2 => self.compute_hashed_user_password_r2(user_password)?,
            3 | 4 => self.compute_hashed_user_password_r3_r4(user_password)?,
            _ => return Err(DecryptionError::InvalidRevision),
        };

        // Revisions 3 and 4 compare only the first 16 bytes.
        let len = if self.revision == 2 { 32 } else { 16 };
        if self.user_value.len() < len {
            return Err(DecryptionError::InvalidHashLength);
        }
        if hashed_user_password[..len] != self.user_value[..len] {
            return Err(DecryptionError::IncorrectPassword);
        }
        Ok(())
    }

    /// The first half of Algorithm 7: decrypts `/O` into the purported user password.
    fn recover_user_password_r4(&self, owner_password: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        let key = self.owner_key_r4(owner_password)?;

        let mut result = self.owner_value.clone();
        if self.revision >= 3 {
            for i in (1..=19).rev() {
                let round_key: Vec<u8> = key.iter().map(|byte| byte ^ i).collect();
                result = Rc4::new(&round_key).apply(&result);
            }
        }
        Ok(Rc4::new(&key).apply(&result))
    }

    /// Algorithm 7.
    fn authenticate_owner_password_r4(&self, owner_password: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        let user_password = self.recover_user_password_r4(owner_password)?;
        self.authenticate_user_password_r4(&user_password)?;
        Ok(user_password)
    }

    /// Algorithm 2.B, or a single SHA-256 for revision 5.
    pub(crate) fn compute_hash(
        &self, password: &[u8], salt: &[u8], user_key: Option<&[u8]>,
    ) -> Result<Vec<u8>, DecryptionError> {
        let mut hasher = Sha256::new();
        hasher.update(password);
        hasher.update(salt);
        if let Some(user_key) = user_key {
            hasher.update(user_key);
        }
        let mut k = hasher.finalize().to_vec();

        if self.revision == 5 {
            return Ok(k);
        }

        let user_key = user_key.unwrap_or_default();
        let mut k1 = Vec::with_capacity(64 * (password.len() + 64 + user_key.len()));

        for round in 1u32.. {
            k1.clear();
            for _ in 0..64 {
                k1.extend_from_slice(password);
                k1.extend_from_slice(&k);
                k1.extend_from_slice(user_key);
            }

            // K1 is 64 repetitions, so it is always a whole number of blocks.
            let mut encryptor =
                Aes128CbcEnc::new_from_slices(&k[..16], &k[16..32]).map_err(|_| DecryptionError::InvalidKeyLength)?;
            for block in k1.chunks_exact_mut(16) {
                encryptor.encrypt_block_mut(block.into());
            }
            let e = &k1;

            // The sum of the first 16 bytes has the same remainder mod 3 as the big-endian integer.
            k = match e[..16].iter().map(|v| u32::from(*v)).sum::<u32>() % 3 {
                0 => Sha256::digest(e).to_vec(),
                1 => Sha384::digest(e).to_vec(),
                _ => Sha512::digest(e).to_vec(),
            };

            if round >= 64 && u32::from(e.last().copied().unwrap_or(0)) <= round - 32 {
                break;
            }
        }

        k.truncate(32);
        Ok(k)
    }

    /// Decrypts a 32-byte `/OE` or `/UE` value with AES-256-CBC, zero IV, no padding.
    fn decrypt_intermediate_key(key: &[u8], encrypted: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        let iv = [0u8; 16];
        let mut decryptor = Aes256CbcDec::new_from_slices(key, &iv).map_err(|_| DecryptionError::InvalidKeyLength)?;
        let mut output = encrypted.to_vec();
        for block in output.chunks_exact_mut(16) {
            decryptor.decrypt_block_mut(block.into());
        }
        Ok(output)
    }

    /// Truncates a UTF-8 password to 127 bytes.
    fn truncate_r6(password: &[u8]) -> &[u8] {
        &password[..password.len().min(127)]
    }

    /// Algorithm 11.
    fn authenticate_user_password_r6(&self, user_password: &[u8]) -> Result<(), DecryptionError> {
        let user_password = Self::truncate_r6(user_password);
        let hashed_user_password = &self.user_value[..32];
        let user_validation_salt = &self.user_value[32..40];

        if self.compute_hash(user_password, user_validation_salt, None)? != hashed_user_password {
            return Err(DecryptionError::IncorrectPassword);
        }
        Ok(())
    }

    /// Algorithm 12.
    fn authenticate_owner_password_r6(&self, owner_password: &[u8]) -> Result<(), DecryptionError> {
        let owner_password = Self::truncate_r6(owner_password);
        let hashed_owner_password = &self.owner_value[..32];
        let owner_validation_salt = &self.owner_value[32..40];

        if self.compute_hash(owner_password, owner_validation_salt, Some(&self.user_value))? != hashed_owner_password
        {
            return Err(DecryptionError::IncorrectPassword);
        }
        Ok(())
    }

    /// Algorithm 2.A: authenticates the password and unwraps the file encryption key.
    fn compute_file_encryption_key_r6(&self, password: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        let password = Self::truncate_r6(password);

        let key = if self.authenticate_user_password_r6(password).is_ok() {
            let user_key_salt = &self.user_value[40..48];
            let hash = self.compute_hash(password, user_key_salt, None)?;
            Self::decrypt_intermediate_key(&hash, &self.user_encrypted)?
        } else {
            self.authenticate_owner_password_r6(password)?;
            let owner_key_salt = &self.owner_value[40..48];
            let hash = self.compute_hash(password, owner_key_salt, Some(&self.user_value))?;
            Self::decrypt_intermediate_key(&hash, &self.owner_encrypted)?
        };

        self.validate_permissions(&key)?;
        Ok(key)
    }

    /// Algorithm 13: checks `/Perms` against `/P` and `/EncryptMetadata`.
    fn validate_permissions(&self, file_encryption_key: &[u8]) -> Result<(), DecryptionError> {
        let mut decryptor =
            Aes256EcbDec::new_from_slice(file_encryption_key).map_err(|_| DecryptionError::InvalidKeyLength)?;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&self.permission_encrypted);
        decryptor.decrypt_block_mut((&mut bytes[..]).into());

        if &bytes[9..12] != b"adb" {
            return Err(DecryptionError::IncorrectPassword);
        }
        if bytes[..4] != (self.permissions.bits() as u32).to_le_bytes() {
            return Err(DecryptionError::IncorrectPassword);
        }
        if bytes[8] != if self.encrypt_metadata { b'T' } else { b'F' } {
            return Err(DecryptionError::IncorrectPassword);
        }
        Ok(())
    }

    /// Authenticates `password` as the user password, then as the owner password, and returns
    /// the file encryption key.
    pub fn compute_file_encryption_key<P>(&self, password: P) -> Result<Vec<u8>, DecryptionError>
    where
        P: AsRef<[u8]>,
    {
        let password = password.as_ref();
        match self.revision {
            2..=4 => {
                match self.authenticate_user_password_r4(password) {
                    Ok(()) => return self.compute_file_encryption_key_r4(password),
                    Err(DecryptionError::IncorrectPassword) => {}
                    Err(err) => return Err(err),
                }
                let user_password = self.authenticate_owner_password_r4(password)?;
                self.compute_file_encryption_key_r4(user_password)
            }
            5..=6 => self.compute_file_encryption_key_r6(password),
            _ => Err(DecryptionError::UnsupportedRevision),
        }
    }

    pub fn authenticate_user_password<U>(&self, user_password: U) -> Result<(), DecryptionError>
    where
        U: AsRef<[u8]>,
    {
        match self.revision {
            2..=4 => self.authenticate_user_password_r4(user_password.as_ref()),
            5..=6 => self.authenticate_user_password_r6(user_password.as_ref()),
            _ => Err(DecryptionError::UnsupportedRevision),
        }
    }

    pub fn authenticate_owner_password<O>(&self, owner_password: O) -> Result<(), DecryptionError>
    where
        O: AsRef<[u8]>,
    {
        match self.revision {
            2..=4 => self.authenticate_owner_password_r4(owner_password.as_ref()).map(|_| ()),
            5..=6 => self.authenticate_owner_password_r6(owner_password.as_ref()),
            _ => Err(DecryptionError::UnsupportedRevision),
        }
    }
}
