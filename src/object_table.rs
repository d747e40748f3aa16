use std::cell::{Cell, OnceCell, RefCell};
use std::collections::{BTreeMap, HashSet};

use bytes::Bytes;
use log::{debug, trace, warn};

use crate::cursor::ByteCursor;
use crate::encryption::{self, EncryptionState};
use crate::matcher::MatcherKind;
use crate::object_stream::ObjectStream;
use crate::parser;
use crate::xref::{Xref, XrefEntry};
use crate::{Error, Object, ObjectId, Result, Span, Stream};

#[derive(Debug)]
struct Entry {
    object: Object,
    span: Option<Span>,
}

/// The indirect objects of a document, materialized on first access.
///
/// Every object listed in the cross-reference table gets a slot up front. A slot is filled at most
/// once by the resolver; only [`ObjectTable::get_mut`] and [`ObjectTable::insert`] change it later.
#[derive(Debug)]
pub struct ObjectTable {
    buffer: Bytes,
    matcher: MatcherKind,
    xref: Xref,
    slots: BTreeMap<ObjectId, OnceCell<Entry>>,
    encryption: Option<EncryptionState>,
    encrypt_id: Option<ObjectId>,
    resolving: RefCell<HashSet<ObjectId>>,
    materialized: Cell<usize>,
    max_objects: Option<usize>,
    max_id: u32,
}

/// Marks an object as being resolved until dropped.
struct ResolveGuard<'a> {
    resolving: &'a RefCell<HashSet<ObjectId>>,
    id: ObjectId,
}

impl Drop for ResolveGuard<'_> {
    fn drop(&mut self) {
        self.resolving.borrow_mut().remove(&self.id);
    }
}

impl ObjectTable {
    pub(crate) fn new(buffer: Bytes, xref: Xref, matcher: MatcherKind) -> ObjectTable {
        let slots: BTreeMap<_, _> = xref
            .iter()
            .filter_map(|(number, entry)| match *entry {
                XrefEntry::Normal { generation, .. } => Some(((number, generation), OnceCell::new())),
                XrefEntry::Compressed { .. } => Some(((number, 0), OnceCell::new())),
                XrefEntry::Free { .. } => None,
            })
            .collect();
        let max_id = xref.max_id().max(xref.size.saturating_sub(1));

        ObjectTable {
            buffer,
            matcher,
            xref,
            slots,
            encryption: None,
            encrypt_id: None,
            resolving: RefCell::new(HashSet::new()),
            materialized: Cell::new(0),
            max_objects: None,
            max_id,
        }
    }

    pub(crate) fn set_max_objects(&mut self, max_objects: Option<usize>) {
        self.max_objects = max_objects;
    }

    /// Installs the security handler. Objects already materialized, except the encryption
    /// dictionary itself, are dropped so they get decrypted on their next access.
    pub(crate) fn set_encryption(&mut self, state: EncryptionState, encrypt_id: Option<ObjectId>) {
        let mut kept = 0;
        for (id, slot) in self.slots.iter_mut() {
            if Some(*id) == encrypt_id {
                kept += usize::from(slot.get().is_some());
            } else {
                slot.take();
            }
        }
        self.materialized.set(kept);
        self.encryption = Some(state);
        self.encrypt_id = encrypt_id;
    }

    pub fn encryption_state(&self) -> Option<&EncryptionState> {
        self.encryption.as_ref()
    }

    /// The merged cross-reference entries the table resolves through.
    pub fn xref(&self) -> &Xref {
        &self.xref
    }

    /// Number of objects the table can resolve.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Ids of all resolvable objects in ascending order, without materializing them.
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.slots.keys().copied()
    }

    /// Get object by object id, parsing it on first access.
    pub fn get(&self, id: ObjectId) -> Result<&Object> {
        let slot = self.slots.get(&id).ok_or(Error::MissingXrefEntry(id))?;
        if let Some(entry) = slot.get() {
            return Ok(&entry.object);
        }

        let _guard = self.enter(id)?;
        match self.xref.get(id.0) {
            Some(&XrefEntry::Normal { offset, .. }) => self.load_normal(id, offset as usize, slot),
            Some(&XrefEntry::Compressed { container, .. }) => self.load_compressed(id, container, slot),
            _ => Err(Error::MissingXrefEntry(id)),
        }
    }

    /// Where the indirect object was found in the source buffer. Objects unpacked from object
    /// streams and objects not yet materialized have no span.
    pub fn span(&self, id: ObjectId) -> Option<Span> {
        self.slots.get(&id)?.get()?.span
    }

    /// Follows references until a direct object is reached.
    pub fn dereference<'a>(&'a self, mut object: &'a Object) -> Result<&'a Object> {
        let mut seen = HashSet::new();
        while let Object::Reference(id) = *object {
            if !seen.insert(id) {
                return Err(Error::ReferenceCycle(id));
            }
            object = self.get(id)?;
        }
        Ok(object)
    }

    /// Materializes every listed object and yields them in id order. An object that fails to
    /// resolve yields its error; iteration can go on past it.
    pub fn iter(&self) -> impl Iterator<Item = Result<(ObjectId, &Object)>> + '_ {
        self.slots.keys().map(move |&id| self.get(id).map(|object| (id, object)))
    }

    /// Mutable access for editing. The object is materialized first.
    pub fn get_mut(&mut self, id: ObjectId) -> Result<&mut Object> {
        self.get(id)?;
        self.slots
            .get_mut(&id)
            .and_then(OnceCell::get_mut)
            .map(|entry| &mut entry.object)
            .ok_or(Error::MissingXrefEntry(id))
    }

    /// Inserts or replaces an object. Returns the object previously materialized under `id`.
    pub fn insert(&mut self, id: ObjectId, object: Object) -> Option<Object> {
        self.max_id = self.max_id.max(id.0);
        let entry = Entry { object, span: None };
        let previous = self.slots.insert(id, OnceCell::from(entry))?;
        previous.into_inner().map(|entry| entry.object)
    }

    /// The highest object number in use.
    pub fn max_id(&self) -> u32 {
        self.max_id
    }

    /// Reserves the next free object number.
    pub fn new_object_id(&mut self) -> ObjectId {
        self.max_id += 1;
        (self.max_id, 0)
    }

    fn enter(&self, id: ObjectId) -> Result<ResolveGuard<'_>> {
        if !self.resolving.borrow_mut().insert(id) {
            return Err(Error::ReferenceCycle(id));
        }
        Ok(ResolveGuard {
            resolving: &self.resolving,
            id,
        })
    }

    fn count_materialized(&self) -> Result<()> {
        let count = self.materialized.get() + 1;
        if let Some(max_objects) = self.max_objects {
            if count > max_objects {
                return Err(Error::ObjectLimit(max_objects));
            }
        }
        self.materialized.set(count);
        Ok(())
    }

    fn decrypt(&self, id: ObjectId, object: &mut Object) -> Result<()> {
        match &self.encryption {
            Some(state) if Some(id) != self.encrypt_id => Ok(encryption::decrypt_object(state, id, object)?),
            _ => Ok(()),
        }
    }

    fn load_normal<'a>(&'a self, id: ObjectId, offset: usize, slot: &'a OnceCell<Entry>) -> Result<&'a Object> {
        trace!("parsing object {} {} R at byte {offset}", id.0, id.1);
        let mut cursor = ByteCursor::new(self.buffer.clone()).with_matcher(self.matcher);
        cursor.seek(offset)?;

        let resolve_length: parser::LengthResolver = &|length_id| self.get(length_id).and_then(Object::as_i64);
        let (_, mut object) = parser::parse_indirect_object(&mut cursor, Some(id), Some(resolve_length))?;
        let span = Span::new(offset, cursor.position() - offset);

        self.decrypt(id, &mut object)?;
        // The container only lands in its slot once its packed objects are in theirs.
        if let Object::Stream(stream) = &object {
            if stream.dict.has_type(b"ObjStm") {
                self.unpack(id.0, stream)?;
            }
        }
        self.count_materialized()?;
        let entry = slot.get_or_init(|| Entry {
            object,
            span: Some(span),
        });
        Ok(&entry.object)
    }

    fn load_compressed<'a>(&'a self, id: ObjectId, container: u32, slot: &'a OnceCell<Entry>) -> Result<&'a Object> {
        let stream = self.container_stream(container)?;
        if slot.get().is_none() {
            self.unpack(container, stream)?;
        }
        if let Some(entry) = slot.get() {
            return Ok(&entry.object);
        }

        // Not in its own container: look through the streams it extends.
        let mut seen = HashSet::from([container]);
        let mut parent = ObjectStream::new(stream)?.extends;
        while let Some(parent_id) = parent {
            if !seen.insert(parent_id.0) {
                warn!("object stream /Extends chain loops at {} {} R", parent_id.0, parent_id.1);
                break;
            }
            let mut unpacked = ObjectStream::new(self.get(parent_id)?.as_stream()?)?;
            if let Some(object) = unpacked.objects.remove(&id) {
                debug!("object {} {} R found in extended object stream {}", id.0, id.1, parent_id.0);
                self.count_materialized()?;
                let entry = slot.get_or_init(|| Entry { object, span: None });
                return Ok(&entry.object);
            }
            parent = unpacked.extends;
        }
        Err(Error::MissingXrefEntry(id))
    }

    fn container_stream(&self, container: u32) -> Result<&Stream> {
        let generation = self.xref.get(container).map_or(0, XrefEntry::generation);
        self.get((container, generation))?.as_stream()
    }

    /// Fills the empty slots of objects the cross-reference table places in `container`.
    /// Objects a newer revision moved elsewhere are left alone.
    fn unpack(&self, container: u32, stream: &Stream) -> Result<()> {
        let object_stream = ObjectStream::new(stream)?;
        for (id, object) in object_stream.objects {
            let listed_here = matches!(
                self.xref.get(id.0),
                Some(&XrefEntry::Compressed { container: listed, .. }) if listed == container
            );
            if !listed_here {
                trace!("object stream {container}: skipping shadowed object {}", id.0);
                continue;
            }
            if let Some(slot) = self.slots.get(&id) {
                if slot.get().is_none() {
                    self.count_materialized()?;
                    let _ = slot.set(Entry { object, span: None });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lays out `N 0 obj ... endobj` bodies and returns the buffer with their xref.
    fn build(objects: &[(u32, &str)]) -> (Bytes, Xref) {
        let mut buffer = b"%PDF-1.7\n".to_vec();
        let mut xref = Xref::new(0);
        for (number, body) in objects {
            xref.insert(*number, XrefEntry::Normal { offset: buffer.len() as u32, generation: 0 });
            buffer.extend_from_slice(format!("{number} 0 obj\n{body}\nendobj\n").as_bytes());
        }
        xref.size = xref.max_id() + 1;
        (Bytes::from(buffer), xref)
    }

    #[test]
    fn resolves_lazily_and_memoizes() {
        let (buffer, xref) = build(&[(1, "<</Type /Catalog /Pages 2 0 R>>"), (2, "<</Type /Pages /Count 0>>")]);
        let table = ObjectTable::new(buffer, xref, MatcherKind::default());
        assert_eq!(table.len(), 2);
        assert_eq!(table.span((1, 0)), None);

        let catalog = table.get((1, 0)).unwrap();
        let pages = table.dereference(catalog.as_dict().unwrap().get(b"Pages").unwrap()).unwrap();
        assert!(pages.as_dict().unwrap().has_type(b"Pages"));
        assert!(std::ptr::eq(catalog, table.get((1, 0)).unwrap()));
        assert_eq!(table.span((1, 0)).unwrap().offset, 9);
        assert!(matches!(table.get((3, 0)), Err(Error::MissingXrefEntry((3, 0)))));
        assert!(matches!(table.get((1, 1)), Err(Error::MissingXrefEntry((1, 1)))));
    }

    #[test]
    fn indirect_length_is_resolved() {
        let (buffer, xref) = build(&[(1, "<</Length 2 0 R>>\nstream\nabcdef\nendstream"), (2, "6")]);
        let table = ObjectTable::new(buffer, xref, MatcherKind::default());
        let stream = table.get((1, 0)).unwrap().as_stream().unwrap();
        assert_eq!(stream.content.as_ref(), b"abcdef");
    }

    #[test]
    fn self_referencing_length_is_a_cycle() {
        let (buffer, xref) = build(&[(1, "<</Length 1 0 R>>\nstream\nabcdef\nendstream")]);
        let table = ObjectTable::new(buffer, xref, MatcherKind::default());
        assert!(matches!(table.get((1, 0)), Err(Error::ReferenceCycle((1, 0)))));
    }

    #[test]
    fn reference_chains_loop_detection() {
        let (buffer, mut xref) = build(&[(1, "2 0 R"), (2, "1 0 R")]);
        xref.insert(7, XrefEntry::Free { next: 0, generation: 1 });
        let table = ObjectTable::new(buffer, xref, MatcherKind::default());
        assert!(matches!(table.dereference(&Object::Reference((1, 0))), Err(Error::ReferenceCycle(_))));
        assert!(!table.contains((7, 1)));
        assert!(matches!(table.get((7, 1)), Err(Error::MissingXrefEntry(_))));
    }

    #[test]
    fn unpacks_object_streams_once() {
        let header = "3 0 4 5 ";
        let body = "true (four)";
        let objstm = format!(
            "<</Type /ObjStm /N 2 /First {} /Length {}>>\nstream\n{header}{body}\nendstream",
            header.len(),
            header.len() + body.len()
        );
        let (buffer, mut xref) = build(&[(1, "<<>>"), (2, &objstm), (4, "(stale)")]);
        xref.insert(3, XrefEntry::Compressed { container: 2, index: 0 });
        let table = ObjectTable::new(buffer, xref, MatcherKind::default());

        assert_eq!(table.get((3, 0)).unwrap(), &Object::Boolean(true));
        // Object 4 lives at its own offset in the newest revision.
        assert_eq!(table.get((4, 0)).unwrap().as_str().unwrap(), b"stale");
        assert_eq!(table.iter().collect::<Result<Vec<_>>>().unwrap().len(), 4);
    }

    #[test]
    fn iter_reports_unresolvable_objects() {
        let (buffer, xref) = build(&[(1, "<</Kind /Good>>"), (2, "<</Kind ]"), (3, "(fine)")]);
        let table = ObjectTable::new(buffer, xref, MatcherKind::default());

        let results: Vec<_> = table.iter().collect();
        assert_eq!(results.len(), 3);
        assert!(matches!(results[0], Ok(((1, 0), _))));
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().1.as_str().unwrap(), b"fine");
        assert!(table.iter().collect::<Result<Vec<_>>>().is_err());
    }

    #[test]
    fn broken_object_stream_fails_its_container() {
        let objstm = "<</Type /ObjStm /N 1 /First 50 /Length 8>>\nstream\n3 0 true\nendstream";
        let (buffer, mut xref) = build(&[(2, objstm)]);
        xref.insert(3, XrefEntry::Compressed { container: 2, index: 0 });
        let table = ObjectTable::new(buffer, xref, MatcherKind::default());

        assert!(table.get((2, 0)).is_err());
        assert!(table.get((3, 0)).is_err());
        // Nothing was memoized, so the failure repeats.
        assert!(table.get((2, 0)).is_err());
    }

    #[test]
    fn editing_path() {
        let (buffer, xref) = build(&[(1, "<</Title (old)>>")]);
        let mut table = ObjectTable::new(buffer, xref, MatcherKind::default());
        table
            .get_mut((1, 0))
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Title", Object::string_literal("new"));
        assert_eq!(table.get((1, 0)).unwrap().as_dict().unwrap().get(b"Title").unwrap().as_str().unwrap(), b"new");

        let id = table.new_object_id();
        assert_eq!(id, (2, 0));
        assert!(table.insert(id, Object::Integer(42)).is_none());
        assert_eq!(table.get(id).unwrap(), &Object::Integer(42));
        assert_eq!(table.insert(id, Object::Null), Some(Object::Integer(42)));
        assert_eq!(table.max_id(), 2);
    }

    #[test]
    fn object_limit_is_enforced() {
        let (buffer, xref) = build(&[(1, "1"), (2, "2"), (3, "3")]);
        let mut table = ObjectTable::new(buffer, xref, MatcherKind::default());
        table.set_max_objects(Some(2));
        assert!(table.get((1, 0)).is_ok());
        assert!(table.get((2, 0)).is_ok());
        assert!(matches!(table.get((3, 0)), Err(Error::ObjectLimit(2))));
    }
}
