//! Builds small PDF files byte by byte, with correct offsets, for the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Write;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockEncryptMut, KeyInit, KeyIvInit};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use md5::{Digest, Md5};
use sha2::{Sha256, Sha384, Sha512};

pub const PAGE_ONE: &str = "this is a test.";
pub const PAGE_TWO: &str = "I'm on the second page";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02X}")).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Normal(usize),
    Compressed { container: u32, index: u16 },
}

/// Appends objects and cross-reference sections to an in-memory file.
pub struct PdfBuilder {
    buffer: Vec<u8>,
    entries: BTreeMap<u32, Entry>,
    pending: Vec<u32>,
    last_xref: Option<usize>,
}

impl PdfBuilder {
    pub fn new(version: &str) -> PdfBuilder {
        let mut buffer = format!("%PDF-{version}\n").into_bytes();
        buffer.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");
        PdfBuilder {
            buffer,
            entries: BTreeMap::new(),
            pending: Vec::new(),
            last_xref: None,
        }
    }

    pub fn entry(&self, id: u32) -> Option<Entry> {
        self.entries.get(&id).copied()
    }

    pub fn last_xref(&self) -> Option<usize> {
        self.last_xref
    }

    pub fn object(&mut self, id: u32, body: &str) -> &mut Self {
        self.object_bytes(id, body.as_bytes())
    }

    pub fn object_bytes(&mut self, id: u32, body: &[u8]) -> &mut Self {
        let offset = self.buffer.len();
        write!(self.buffer, "{id} 0 obj\n").unwrap();
        self.buffer.extend_from_slice(body);
        self.buffer.extend_from_slice(b"\nendobj\n");
        self.entries.insert(id, Entry::Normal(offset));
        self.pending.push(id);
        self
    }

    /// `dict` holds the dictionary entries other than `/Length`.
    pub fn stream(&mut self, id: u32, dict: &str, data: &[u8]) -> &mut Self {
        let mut body = format!("<<{dict} /Length {}>>\nstream\n", data.len()).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.object_bytes(id, &body)
    }

    pub fn flate_stream(&mut self, id: u32, dict: &str, data: &[u8]) -> &mut Self {
        self.stream(id, &format!("{dict} /Filter /FlateDecode"), &deflate(data))
    }

    /// Overrides the cross-reference entry the next section writes for `id`.
    pub fn set_entry(&mut self, id: u32, entry: Entry) -> &mut Self {
        self.entries.insert(id, entry);
        self.pending.push(id);
        self
    }

    /// Packs `objects` into a flate compressed object stream.
    pub fn object_stream(&mut self, id: u32, objects: &[(u32, String)]) -> &mut Self {
        self.packed_objects(id, "", objects)
    }

    /// An object stream whose `/Extends` names `parent`.
    pub fn extending_object_stream(&mut self, id: u32, parent: u32, objects: &[(u32, String)]) -> &mut Self {
        self.packed_objects(id, &format!(" /Extends {parent} 0 R"), objects)
    }

    fn packed_objects(&mut self, id: u32, extra: &str, objects: &[(u32, String)]) -> &mut Self {
        let mut header = String::new();
        let mut body = String::new();
        for (number, text) in objects {
            header.push_str(&format!("{number} {} ", body.len()));
            body.push_str(text);
            body.push('\n');
        }
        let first = header.len();
        let data = header + &body;
        self.flate_stream(id, &format!(" /Type /ObjStm /N {} /First {first}{extra}", objects.len()), data.as_bytes());
        for (index, (number, _)) in objects.iter().enumerate() {
            let entry = Entry::Compressed {
                container: id,
                index: index as u16,
            };
            self.entries.insert(*number, entry);
            self.pending.push(*number);
        }
        self
    }

    fn size(&self) -> u32 {
        self.entries.keys().max().map_or(1, |max| max + 1)
    }

    fn prev(&self) -> String {
        self.last_xref.map(|prev| format!(" /Prev {prev}")).unwrap_or_default()
    }

    /// A classic section for the objects written since the previous section.
    pub fn xref_table(&mut self, trailer: &str) -> &mut Self {
        let start = self.buffer.len();
        let mut ids = std::mem::take(&mut self.pending);
        ids.retain(|id| matches!(self.entries.get(id), Some(Entry::Normal(_))));
        ids.sort_unstable();
        ids.dedup();

        self.buffer.extend_from_slice(b"xref\n");
        if self.last_xref.is_none() {
            self.buffer.extend_from_slice(b"0 1\n0000000000 65535 f \n");
        }
        let mut runs: Vec<Vec<u32>> = Vec::new();
        for id in ids {
            match runs.last_mut() {
                Some(run) if run.last() == Some(&(id - 1)) => run.push(id),
                _ => runs.push(vec![id]),
            }
        }
        for run in runs {
            write!(self.buffer, "{} {}\n", run[0], run.len()).unwrap();
            for id in run {
                if let Some(Entry::Normal(offset)) = self.entries.get(&id) {
                    write!(self.buffer, "{offset:010} 00000 n \n").unwrap();
                }
            }
        }
        let (size, prev) = (self.size(), self.prev());
        write!(
            self.buffer,
            "trailer\n<</Size {size}{prev} {trailer}>>\nstartxref\n{start}\n%%EOF\n"
        )
        .unwrap();
        self.last_xref = Some(start);
        self
    }

    /// One `/W [1 4 2]` row per object number.
    fn xref_rows(&self, numbers: impl IntoIterator<Item = u32>) -> Vec<u8> {
        let mut rows = Vec::new();
        for number in numbers {
            match self.entries.get(&number) {
                Some(Entry::Normal(offset)) => {
                    rows.push(1);
                    rows.extend_from_slice(&(*offset as u32).to_be_bytes());
                    rows.extend_from_slice(&[0, 0]);
                }
                Some(Entry::Compressed { container, index }) => {
                    rows.push(2);
                    rows.extend_from_slice(&container.to_be_bytes());
                    rows.extend_from_slice(&index.to_be_bytes());
                }
                None => rows.extend_from_slice(&[0, 0, 0, 0, 0, 0xFF, 0xFF]),
            }
        }
        rows
    }

    /// A flate compressed cross-reference stream covering every object written so far.
    pub fn xref_stream(&mut self, id: u32, trailer: &str) -> &mut Self {
        let start = self.buffer.len();
        self.entries.insert(id, Entry::Normal(start));
        let size = self.size();
        let rows = self.xref_rows(0..size);

        let prev = self.prev();
        self.flate_stream(id, &format!(" /Type /XRef /Size {size} /W [1 4 2]{prev} {trailer}"), &rows);
        write!(self.buffer, "startxref\n{start}\n%%EOF\n").unwrap();
        self.pending.clear();
        self.last_xref = Some(start);
        self
    }

    /// A cross-reference stream for an incremental update: only the objects written since the
    /// previous section are listed, through `/Index`.
    pub fn xref_stream_update(&mut self, id: u32, trailer: &str) -> &mut Self {
        let start = self.buffer.len();
        self.entries.insert(id, Entry::Normal(start));
        let mut ids = std::mem::take(&mut self.pending);
        ids.push(id);
        ids.sort_unstable();
        ids.dedup();

        let index: Vec<String> = ids.iter().map(|number| format!("{number} 1")).collect();
        let rows = self.xref_rows(ids.iter().copied());
        let (size, prev) = (self.size(), self.prev());
        self.flate_stream(
            id,
            &format!(" /Type /XRef /Size {size} /W [1 4 2] /Index [{}]{prev} {trailer}", index.join(" ")),
            &rows,
        );
        write!(self.buffer, "startxref\n{start}\n%%EOF\n").unwrap();
        self.pending.clear();
        self.last_xref = Some(start);
        self
    }

    /// A hybrid-reference section: a classic table that lists compressed objects as free, and a
    /// cross-reference stream for all objects named by the trailer's `/XRefStm`.
    pub fn hybrid_xref(&mut self, stream_id: u32, trailer: &str) -> &mut Self {
        let stream_start = self.buffer.len();
        self.entries.insert(stream_id, Entry::Normal(stream_start));
        let size = self.size();
        let rows = self.xref_rows(0..size);
        self.flate_stream(stream_id, &format!(" /Type /XRef /Size {size} /W [1 4 2]"), &rows);

        let start = self.buffer.len();
        write!(self.buffer, "xref\n0 {size}\n").unwrap();
        for number in 0..size {
            match self.entries.get(&number) {
                Some(Entry::Normal(offset)) => write!(self.buffer, "{offset:010} 00000 n \n").unwrap(),
                _ => self.buffer.extend_from_slice(b"0000000000 65535 f \n"),
            }
        }
        let prev = self.prev();
        write!(
            self.buffer,
            "trailer\n<</Size {size} /XRefStm {stream_start}{prev} {trailer}>>\nstartxref\n{start}\n%%EOF\n"
        )
        .unwrap();
        self.pending.clear();
        self.last_xref = Some(start);
        self
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.buffer.clone()
    }
}

const PAD: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08, 0x2E, 0x2E, 0x00,
    0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

const PERMISSIONS: i32 = -4;

fn pad(password: &[u8]) -> Vec<u8> {
    password.iter().chain(PAD.iter()).take(32).copied().collect()
}

pub fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut state: Vec<u8> = (0..=255).collect();
    let mut j = 0u8;
    for i in 0..256 {
        j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
        state.swap(i, j as usize);
    }
    let (mut i, mut j) = (0u8, 0u8);
    data.iter()
        .map(|byte| {
            i = i.wrapping_add(1);
            j = j.wrapping_add(state[i as usize]);
            state.swap(i as usize, j as usize);
            byte ^ state[state[i as usize].wrapping_add(state[j as usize]) as usize]
        })
        .collect()
}

fn rc4_rounds(key: &[u8], data: Vec<u8>) -> Vec<u8> {
    (1..=19u8).fold(data, |data, round| {
        let round_key: Vec<u8> = key.iter().map(|byte| byte ^ round).collect();
        rc4(&round_key, &data)
    })
}

/// Algorithm 2.B for revision 6, a single SHA-256 for revision 5.
fn hash_r6(revision: i64, password: &[u8], salt: &[u8], user_key: &[u8]) -> Vec<u8> {
    let mut k = Sha256::new().chain_update(password).chain_update(salt).chain_update(user_key).finalize().to_vec();
    if revision == 5 {
        return k;
    }
    for round in 1u32.. {
        let mut e = [password, &k[..], user_key].concat().repeat(64);
        let mut encryptor = cbc::Encryptor::<aes::Aes128>::new_from_slices(&k[..16], &k[16..32]).unwrap();
        for block in e.chunks_exact_mut(16) {
            encryptor.encrypt_block_mut(block.into());
        }
        k = match e[..16].iter().map(|&byte| u32::from(byte)).sum::<u32>() % 3 {
            0 => Sha256::digest(&e).to_vec(),
            1 => Sha384::digest(&e).to_vec(),
            _ => Sha512::digest(&e).to_vec(),
        };
        if round >= 64 && u32::from(*e.last().unwrap()) <= round - 32 {
            break;
        }
    }
    k.truncate(32);
    k
}

/// AES-256-CBC with a zero IV and no padding, as used for `/UE` and `/OE`.
fn wrap_key(key: &[u8], file_key: &[u8]) -> Vec<u8> {
    let mut encryptor = cbc::Encryptor::<aes::Aes256>::new_from_slices(key, &[0u8; 16]).unwrap();
    let mut output = file_key.to_vec();
    for block in output.chunks_exact_mut(16) {
        encryptor.encrypt_block_mut(block.into());
    }
    output
}

/// A standard security handler setup with an empty user password and `owner` as the owner
/// password.
pub struct Encryption {
    pub version: i64,
    pub revision: i64,
    pub aes: bool,
    pub key: Vec<u8>,
    pub file_id: Vec<u8>,
    owner_value: Vec<u8>,
    user_value: Vec<u8>,
    owner_encrypted: Vec<u8>,
    user_encrypted: Vec<u8>,
    perms: Vec<u8>,
}

impl Encryption {
    pub fn rc4_40() -> Encryption {
        Encryption::new(1, 2, 5, false)
    }

    pub fn rc4_128() -> Encryption {
        Encryption::new(2, 3, 16, false)
    }

    pub fn aes_128() -> Encryption {
        Encryption::new(4, 4, 16, true)
    }

    /// AESV3 with revision 5 or 6.
    pub fn aes_256(revision: i64) -> Encryption {
        let (user, owner) = (&b""[..], &b"owner"[..]);
        let key: Vec<u8> = (0..32u8).map(|i| i.wrapping_mul(37).wrapping_add(11)).collect();
        let (user_validation_salt, user_key_salt) = ([0x11; 8], [0x22; 8]);
        let (owner_validation_salt, owner_key_salt) = ([0x33; 8], [0x44; 8]);

        let user_value =
            [hash_r6(revision, user, &user_validation_salt, &[]), user_validation_salt.to_vec(), user_key_salt.to_vec()]
                .concat();
        let user_encrypted = wrap_key(&hash_r6(revision, user, &user_key_salt, &[]), &key);
        let owner_value = [
            hash_r6(revision, owner, &owner_validation_salt, &user_value),
            owner_validation_salt.to_vec(),
            owner_key_salt.to_vec(),
        ]
        .concat();
        let owner_encrypted = wrap_key(&hash_r6(revision, owner, &owner_key_salt, &user_value), &key);

        let mut perms = [0u8; 16];
        perms[..4].copy_from_slice(&(PERMISSIONS as u32).to_le_bytes());
        perms[4..8].copy_from_slice(&[0xFF; 4]);
        perms[8..12].copy_from_slice(b"Tadb");
        let mut encryptor = ecb::Encryptor::<aes::Aes256>::new_from_slice(&key).unwrap();
        encryptor.encrypt_block_mut((&mut perms[..]).into());

        Encryption {
            version: 5,
            revision,
            aes: true,
            key,
            file_id: b"0123456789abcdef".to_vec(),
            owner_value,
            user_value,
            owner_encrypted,
            user_encrypted,
            perms: perms.to_vec(),
        }
    }

    fn new(version: i64, revision: i64, key_len: usize, aes: bool) -> Encryption {
        let file_id = b"0123456789abcdef".to_vec();
        let (user, owner) = (&b""[..], &b"owner"[..]);

        let mut hash = Md5::digest(pad(owner)).to_vec();
        if revision >= 3 {
            for _ in 0..50 {
                hash = Md5::digest(&hash).to_vec();
            }
        }
        let owner_key = &hash[..key_len];
        let mut owner_value = rc4(owner_key, &pad(user));
        if revision >= 3 {
            owner_value = rc4_rounds(owner_key, owner_value);
        }

        let mut hasher = Md5::new();
        hasher.update(pad(user));
        hasher.update(&owner_value);
        hasher.update((PERMISSIONS as u32).to_le_bytes());
        hasher.update(&file_id);
        let mut hash = hasher.finalize().to_vec();
        if revision >= 3 {
            for _ in 0..50 {
                hash = Md5::digest(&hash[..key_len]).to_vec();
            }
        }
        let key = hash[..key_len].to_vec();

        let user_value = if revision == 2 {
            rc4(&key, &PAD)
        } else {
            let mut hasher = Md5::new();
            hasher.update(PAD);
            hasher.update(&file_id);
            let mut value = rc4_rounds(&key, rc4(&key, &hasher.finalize()));
            value.resize(32, 0);
            value
        };

        Encryption {
            version,
            revision,
            aes,
            key,
            file_id,
            owner_value,
            user_value,
            owner_encrypted: Vec::new(),
            user_encrypted: Vec::new(),
            perms: Vec::new(),
        }
    }

    pub fn dictionary(&self) -> String {
        let crypt_filters = match (self.aes, self.version) {
            (true, 5) => format!(
                " /CF <</StdCF <</CFM /AESV3 /AuthEvent /DocOpen /Length 32>>>> /StmF /StdCF /StrF /StdCF \
                 /OE <{}> /UE <{}> /Perms <{}>",
                hex(&self.owner_encrypted),
                hex(&self.user_encrypted),
                hex(&self.perms)
            ),
            (true, _) => " /CF <</StdCF <</CFM /AESV2 /AuthEvent /DocOpen /Length 16>>>> /StmF /StdCF /StrF /StdCF".to_string(),
            (false, _) => String::new(),
        };
        format!(
            "<</Filter /Standard /V {} /R {} /Length {} /O <{}> /U <{}> /P {PERMISSIONS}{crypt_filters}>>",
            self.version,
            self.revision,
            self.key.len() * 8,
            hex(&self.owner_value),
            hex(&self.user_value),
        )
    }

    pub fn trailer_id(&self) -> String {
        format!("[<{0}> <{0}>]", hex(&self.file_id))
    }

    fn object_key(&self, id: u32) -> Vec<u8> {
        if self.version == 5 {
            return self.key.clone();
        }
        let mut hasher = Md5::new();
        hasher.update(&self.key);
        hasher.update(&id.to_le_bytes()[..3]);
        hasher.update([0, 0]);
        if self.aes {
            hasher.update(b"sAlT");
        }
        let len = (self.key.len() + 5).min(16);
        hasher.finalize()[..len].to_vec()
    }

    pub fn encrypt(&self, id: u32, data: &[u8]) -> Vec<u8> {
        let key = self.object_key(id);
        if !self.aes {
            return rc4(&key, data);
        }
        let iv = [id as u8; 16];
        let mut buffer = vec![0u8; data.len() + 16];
        buffer[..data.len()].copy_from_slice(data);
        let ciphertext = if key.len() == 32 {
            cbc::Encryptor::<aes::Aes256>::new_from_slices(&key, &iv)
                .unwrap()
                .encrypt_padded_mut::<Pkcs7>(&mut buffer, data.len())
                .unwrap()
                .to_vec()
        } else {
            cbc::Encryptor::<aes::Aes128>::new_from_slices(&key, &iv)
                .unwrap()
                .encrypt_padded_mut::<Pkcs7>(&mut buffer, data.len())
                .unwrap()
                .to_vec()
        };
        [&iv[..], &ciphertext].concat()
    }
}

pub fn page_content(text: &str) -> String {
    format!("BT /F1 24 Tf 1 0 0 1 72 712 Tm ({text}) Tj ET")
}

const CATALOG: &str = "<</Type /Catalog /Pages 2 0 R>>";
const FONT: &str = "<</Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding>>";

fn pages_node(page_count: u32) -> String {
    let kids: Vec<String> = (0..page_count).map(|i| format!("{} 0 R", 4 + 2 * i)).collect();
    format!("<</Type /Pages /Kids [{}] /Count {page_count} /MediaBox [0 0 612 792]>>", kids.join(" "))
}

fn page_node(index: u32) -> String {
    format!(
        "<</Type /Page /Parent 2 0 R /Resources <</Font <</F1 3 0 R>>>> /Contents {} 0 R>>",
        5 + 2 * index
    )
}

/// Catalog 1, page tree 2, font 3, then a page and its content stream per text.
pub fn text_document(texts: &[&str]) -> Vec<u8> {
    text_document_builder(texts).bytes()
}

pub fn text_document_builder(texts: &[&str]) -> PdfBuilder {
    let mut builder = PdfBuilder::new("1.4");
    builder
        .object(1, CATALOG)
        .object(2, &pages_node(texts.len() as u32))
        .object(3, FONT);
    for (index, text) in texts.iter().enumerate() {
        let index = index as u32;
        builder
            .object(4 + 2 * index, &page_node(index))
            .stream(5 + 2 * index, "", page_content(text).as_bytes());
    }
    builder.xref_table("/Root 1 0 R");
    builder
}

/// The same layout as [`text_document`], with every page dictionary packed into an object
/// stream and a cross-reference stream in place of the table.
pub fn compressed_document(texts: &[&str]) -> PdfBuilder {
    let mut builder = PdfBuilder::new("1.5");
    let page_count = texts.len() as u32;
    let mut packed = vec![(1, CATALOG.to_string()), (2, pages_node(page_count)), (3, FONT.to_string())];
    packed.extend((0..page_count).map(|index| (4 + 2 * index, page_node(index))));
    builder.object_stream(100, &packed);
    for (index, text) in texts.iter().enumerate() {
        builder.flate_stream(5 + 2 * index as u32, "", page_content(text).as_bytes());
    }
    builder.xref_stream(101, "/Root 1 0 R");
    builder
}

/// An encrypted [`text_document`] with flate compressed content and an encrypted `/Title`.
pub fn encrypted_document(texts: &[&str], encryption: &Encryption, title: &str) -> Vec<u8> {
    let mut builder = PdfBuilder::new("1.6");
    let page_count = texts.len() as u32;
    builder
        .object(1, CATALOG)
        .object(2, &pages_node(page_count))
        .object(3, FONT);
    for (index, text) in texts.iter().enumerate() {
        let index = index as u32;
        let content_id = 5 + 2 * index;
        let content = encryption.encrypt(content_id, &deflate(page_content(text).as_bytes()));
        builder
            .object(4 + 2 * index, &page_node(index))
            .stream(content_id, " /Filter /FlateDecode", &content);
    }
    let info_id = 4 + 2 * page_count;
    let encrypt_id = info_id + 1;
    let title = encryption.encrypt(info_id, title.as_bytes());
    builder
        .object(info_id, &format!("<</Title <{}>>>", hex(&title)))
        .object(encrypt_id, &encryption.dictionary())
        .xref_table(&format!(
            "/Root 1 0 R /Info {info_id} 0 R /Encrypt {encrypt_id} 0 R /ID {}",
            encryption.trailer_id()
        ));
    builder.bytes()
}
