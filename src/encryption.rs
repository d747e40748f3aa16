mod algorithms;
pub mod crypt_filters;
mod rc4;

use crate::{Dictionary, Error, Object, ObjectId};
use bitflags::bitflags;
use crypt_filters::*;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub use algorithms::PasswordAlgorithm;

#[derive(Error, Debug)]
pub enum DecryptionError {
    #[error("the /Encrypt dictionary is missing")]
    MissingEncryptDictionary,
    #[error("missing encryption version (/V)")]
    MissingVersion,
    #[error("missing encryption revision (/R)")]
    MissingRevision,
    #[error("missing the owner password (/O)")]
    MissingOwnerPassword,
    #[error("missing the user password (/U)")]
    MissingUserPassword,
    #[error("missing the permissions field (/P)")]
    MissingPermissions,
    #[error("missing the file /ID elements")]
    MissingFileID,

    #[error("invalid key length")]
    InvalidKeyLength,
    #[error("invalid ciphertext length")]
    InvalidCipherTextLength,
    #[error("invalid password hash length")]
    InvalidHashLength,
    #[error("invalid revision")]
    InvalidRevision,
    #[error("invalid encryption version")]
    InvalidVersion,
    // An entry of the encryption dictionary has the wrong object type.
    #[error("unexpected type in the encryption dictionary")]
    InvalidType,

    #[error("the supplied password is incorrect")]
    IncorrectPassword,
    #[error("invalid padding in decrypted data")]
    Padding,

    #[error("the encryption version is not supported")]
    UnsupportedVersion,
    #[error("the encryption revision is not supported")]
    UnsupportedRevision,
    #[error("unsupported crypt filter /{0}")]
    UnsupportedCryptFilter(String),

    #[error(transparent)]
    StringPrep(#[from] stringprep::Error),
}

bitflags! {
    /// User access permissions from the `/P` entry.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct Permissions: u64 {
        /// Print the document (possibly at degraded quality from revision 3 on).
        const PRINTABLE = 1 << 3;
        /// Modify the contents by operations other than annotating, filling and assembling.
        const MODIFIABLE = 1 << 4;
        /// Copy or otherwise extract text and graphics.
        const COPYABLE = 1 << 5;
        /// Add or modify annotations and fill in form fields.
        const ANNOTABLE = 1 << 6;
        /// Fill in existing form fields even if `ANNOTABLE` is clear.
        const FILLABLE = 1 << 9;
        /// Extract text and graphics for accessibility purposes.
        const COPYABLE_FOR_ACCESSIBILITY = 1 << 10;
        /// Insert, rotate or delete pages and build outlines or thumbnails.
        const ASSEMBLABLE = 1 << 11;
        /// Print at full fidelity.
        const PRINTABLE_IN_HIGH_QUALITY = 1 << 12;
    }
}

/// Everything needed to decrypt the objects of one document.
#[derive(Clone, Debug)]
pub struct EncryptionState {
    pub crypt_filters: BTreeMap<Vec<u8>, Arc<dyn CryptFilter>>,
    pub file_encryption_key: Vec<u8>,
    pub stream_filter: Arc<dyn CryptFilter>,
    pub string_filter: Arc<dyn CryptFilter>,
    pub permissions: Permissions,
    pub version: i64,
    pub revision: i64,
    pub encrypt_metadata: bool,
}

fn crypt_filter_for_method(method: &[u8]) -> Result<Arc<dyn CryptFilter>, DecryptionError> {
    match method {
        b"None" | b"Identity" => Ok(Arc::new(IdentityCryptFilter)),
        b"V2" => Ok(Arc::new(Rc4CryptFilter)),
        b"AESV2" => Ok(Arc::new(Aes128CryptFilter)),
        b"AESV3" => Ok(Arc::new(Aes256CryptFilter)),
        other => Err(DecryptionError::UnsupportedCryptFilter(String::from_utf8_lossy(other).into_owned())),
    }
}

/// Reads the `/CF` map of a V4/V5 encryption dictionary.
fn read_crypt_filters(encrypted: &Dictionary) -> Result<BTreeMap<Vec<u8>, Arc<dyn CryptFilter>>, DecryptionError> {
    let mut crypt_filters = BTreeMap::new();
    let Ok(filters) = encrypted.get(b"CF").and_then(Object::as_dict) else {
        return Ok(crypt_filters);
    };

    for (name, filter) in filters {
        let Ok(filter) = filter.as_dict() else {
            warn!("crypt filter /{} is not a dictionary", String::from_utf8_lossy(name));
            continue;
        };
        let method = filter.get(b"CFM").and_then(Object::as_name).unwrap_or(&b"None"[..]);
        crypt_filters.insert(name.clone(), crypt_filter_for_method(method)?);
    }
    Ok(crypt_filters)
}

impl EncryptionState {
    /// Authenticates `password` against the `/Encrypt` dictionary and sets up the crypt filters.
    pub fn decode(encrypted: &Dictionary, file_id: Option<&[u8]>, password: &str) -> Result<Self, Error> {
        let filter = encrypted
            .get(b"Filter")
            .and_then(Object::as_name)
            .map_err(|_| Error::DictKey("Filter".to_string()))?;
        if filter != b"Standard" {
            return Err(Error::UnsupportedSecurityHandler(filter.to_vec()));
        }

        let algorithm = PasswordAlgorithm::from_dictionary(encrypted, file_id)?;
        let password = algorithm.sanitize_password(password)?;
        let file_encryption_key = algorithm.compute_file_encryption_key(&password)?;
        debug!(
            "authenticated standard security handler V{} R{} ({}-byte key)",
            algorithm.version(),
            algorithm.revision(),
            file_encryption_key.len()
        );

        let crypt_filters = read_crypt_filters(encrypted)?;
        let (stream_filter, string_filter) = if algorithm.version() >= 4 {
            let select = |key: &[u8]| -> Result<Arc<dyn CryptFilter>, DecryptionError> {
                match encrypted.get(key).and_then(Object::as_name) {
                    Ok(b"Identity") | Err(_) => Ok(Arc::new(IdentityCryptFilter)),
                    Ok(name) => crypt_filters
                        .get(name)
                        .cloned()
                        .ok_or_else(|| DecryptionError::UnsupportedCryptFilter(String::from_utf8_lossy(name).into_owned())),
                }
            };
            (select(b"StmF")?, select(b"StrF")?)
        } else {
            let rc4: Arc<dyn CryptFilter> = Arc::new(Rc4CryptFilter);
            (rc4.clone(), rc4)
        };

        Ok(Self {
            crypt_filters,
            file_encryption_key,
            stream_filter,
            string_filter,
            permissions: algorithm.permissions(),
            version: algorithm.version(),
            revision: algorithm.revision(),
            encrypt_metadata: algorithm.encrypt_metadata(),
        })
    }

    /// The filter named by a stream's `/Crypt` decode parameters, if the stream has one.
    fn stream_override(&self, stream: &crate::Stream) -> Option<Arc<dyn CryptFilter>> {
        let filters = stream.filters().ok()?;
        let position = filters.iter().position(|name| *name == b"Crypt")?;
        let name = stream
            .decode_parms()
            .get(position)
            .copied()
            .flatten()
            .and_then(|params| params.get(b"Name").and_then(Object::as_name).ok());
        Some(match name {
            Some(name) if name != b"Identity" => self
                .crypt_filters
                .get(name)
                .cloned()
                .unwrap_or_else(|| Arc::new(IdentityCryptFilter)),
            _ => Arc::new(IdentityCryptFilter),
        })
    }
}

/// Decrypts every string and stream payload inside `obj` in place.
pub fn decrypt_object(state: &EncryptionState, obj_id: ObjectId, obj: &mut Object) -> Result<(), DecryptionError> {
    let (crypt_filter, ciphertext) = match obj {
        Object::Array(objects) => {
            for obj in objects {
                decrypt_object(state, obj_id, obj)?;
            }
            return Ok(());
        }
        Object::Dictionary(dict) => {
            for (_, obj) in dict.iter_mut() {
                decrypt_object(state, obj_id, obj)?;
            }
            return Ok(());
        }
        Object::String(content, _) => (state.string_filter.clone(), &content[..]),
        Object::Stream(stream) => {
            // Cross-reference streams are never encrypted.
            if stream.dict.has_type(b"XRef") {
                return Ok(());
            }
            for (_, obj) in stream.dict.iter_mut() {
                decrypt_object(state, obj_id, obj)?;
            }
            // Metadata content stays in the clear when /EncryptMetadata is false.
            if !state.encrypt_metadata && stream.dict.has_type(b"Metadata") {
                return Ok(());
            }
            let filter = state.stream_override(stream).unwrap_or_else(|| state.stream_filter.clone());
            (filter, &stream.content[..])
        }
        _ => return Ok(()),
    };

    let key = crypt_filter.compute_key(&state.file_encryption_key, obj_id)?;
    let plaintext = crypt_filter.decrypt(&key, ciphertext)?;

    match obj {
        Object::Stream(stream) => stream.set_decrypted_content(plaintext),
        Object::String(content, _) => *content = plaintext,
        _ => (),
    }

    Ok(())
}
