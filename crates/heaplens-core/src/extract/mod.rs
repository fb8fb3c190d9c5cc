mod array;
mod fielded;
mod registry;

pub use array::ArrayExtractor;
pub use fielded::{HashedCollectionExtractor, HashedMapExtractor, LengthCollectionExtractor};
pub use registry::{CollectionDescriptor, ExtractorRegistry, RegisteredExtractor};

use std::fmt;
use std::sync::Arc;

use crate::snapshot::{HeapObject, SnapshotError};

/// What an extractor can answer about a collection. Accessors whose flag
/// is false fail with [`ExtractError::Unsupported`]; a true flag can
/// still yield `None` when the property is structurally inapplicable to
/// the concrete object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub size: bool,
    pub capacity: bool,
    pub fill_ratio: bool,
    pub extractable_contents: bool,
    pub extractable_array: bool,
    pub collision_ratio: bool,
}

#[derive(Debug)]
pub enum ExtractError {
    /// The accessor's capability flag is false. A caller error, distinct
    /// from a collection that merely happens to lack the property.
    Unsupported(&'static str),
    Snapshot(SnapshotError),
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::Unsupported(what) => {
                write!(f, "extractor does not support {}", what)
            }
            ExtractError::Snapshot(e) => write!(f, "extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExtractError::Snapshot(e) => Some(e),
            ExtractError::Unsupported(_) => None,
        }
    }
}

impl From<SnapshotError> for ExtractError {
    fn from(e: SnapshotError) -> Self {
        ExtractError::Snapshot(e)
    }
}

pub type ExtractResult<T> = Result<T, ExtractError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    /// Resolves through the owning class's declared fields to a
    /// reference slot.
    Reference,
    /// Read from the object's raw record (`length`, `memsize`).
    Scalar,
}

/// A field an extractor reads, declared up front so the mapping to the
/// object layout is checked once per extraction, not per accessor call.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub shape: FieldShape,
}

/// Declared-field → reference-slot mapping for one (extractor, class)
/// pairing.
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    slots: Vec<(&'static str, Option<usize>)>,
}

impl FieldMap {
    pub fn build(specs: &[FieldSpec], class: &heaplens_dump::class::ClassRecord) -> Self {
        let slots = specs
            .iter()
            .filter(|spec| spec.shape == FieldShape::Reference)
            .map(|spec| (spec.name, class.field_slot(spec.name)))
            .collect();
        Self { slots }
    }

    pub fn slot(&self, name: &str) -> Option<usize> {
        self.slots.iter().find(|(n, _)| *n == name).and_then(|(_, slot)| *slot)
    }
}

/// One object under extraction: the handle plus its resolved field map.
pub struct ExtractionCx<'s> {
    pub object: HeapObject<'s>,
    fields: FieldMap,
}

impl<'s> ExtractionCx<'s> {
    pub fn field_object(&self, name: &str) -> ExtractResult<Option<HeapObject<'s>>> {
        let slot = match self.fields.slot(name) {
            Some(slot) => slot,
            None => return Ok(None),
        };
        Ok(self.object.data_refs().get(slot).and_then(|id| self.object.snapshot().object(*id)))
    }

    pub fn scalar(&self, name: &str) -> ExtractResult<Option<u64>> {
        let record = self.object.record()?;
        Ok(match name {
            "length" => record.length,
            "memsize" => record.memsize,
            _ => None,
        })
    }
}

/// A contiguous backing array pulled out of a collection.
#[derive(Debug, Clone)]
pub struct ArrayView {
    pub object_id: u32,
    pub length: u64,
    pub entry_ids: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry {
    pub key: Option<u32>,
    pub value: Option<u32>,
}

/// Interprets one class of collection objects. Implementations are
/// stateless and read-only; the same instance serves every matching
/// object in a snapshot.
pub trait CollectionExtractor: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Fields this extractor reads; resolved against the owning class
    /// once, when the extraction context is built.
    fn fields(&self) -> &[FieldSpec] {
        &[]
    }

    fn size(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<u64>> {
        let _ = cx;
        Err(ExtractError::Unsupported("size"))
    }

    fn capacity(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<u64>> {
        let _ = cx;
        Err(ExtractError::Unsupported("capacity"))
    }

    fn fill_ratio(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<f64>> {
        let _ = cx;
        Err(ExtractError::Unsupported("fill_ratio"))
    }

    fn extract_entry_ids(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Vec<u32>> {
        let _ = cx;
        Err(ExtractError::Unsupported("entry ids"))
    }

    fn extract_array(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<ArrayView>> {
        let _ = cx;
        Err(ExtractError::Unsupported("backing array"))
    }
}

/// Map-shaped collections: entry pairs plus identity-keyed lookup.
/// Content-based lookup is deliberately absent; key equality cannot be
/// answered generically across value representations.
pub trait MapExtractor: CollectionExtractor {
    fn collision_ratio(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<f64>> {
        let _ = cx;
        Err(ExtractError::Unsupported("collision_ratio"))
    }

    fn entries(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Vec<MapEntry>>;

    fn entry_by_identity(&self, cx: &ExtractionCx<'_>, key_id: u32) -> ExtractResult<Option<u32>> {
        for entry in self.entries(cx)? {
            if entry.key == Some(key_id) {
                return Ok(entry.value);
            }
        }
        Ok(None)
    }
}

// `dyn MapExtractor` implements its supertrait `CollectionExtractor`
// automatically via trait upcasting, so no manual forwarding impl is
// needed; `Extracted<dyn MapExtractor>` exposes both surfaces.

/// A collection view: one object paired with the extractor selected for
/// its class. Never outlives the snapshot it reads from.
pub struct Extracted<'s, E: ?Sized> {
    cx: ExtractionCx<'s>,
    extractor: Arc<E>,
}

pub type ExtractedCollection<'s> = Extracted<'s, dyn CollectionExtractor>;
pub type ExtractedMap<'s> = Extracted<'s, dyn MapExtractor>;

impl<'s, E: CollectionExtractor + ?Sized> Extracted<'s, E> {
    pub fn new(object: HeapObject<'s>, extractor: Arc<E>) -> ExtractResult<Self> {
        let fields = FieldMap::build(extractor.fields(), object.class()?);
        Ok(Self { cx: ExtractionCx { object, fields }, extractor })
    }

    pub fn object(&self) -> &HeapObject<'s> {
        &self.cx.object
    }

    pub fn capabilities(&self) -> Capabilities {
        self.extractor.capabilities()
    }

    pub fn has_size(&self) -> bool {
        self.capabilities().size
    }

    pub fn has_capacity(&self) -> bool {
        self.capabilities().capacity
    }

    pub fn has_fill_ratio(&self) -> bool {
        self.capabilities().fill_ratio
    }

    pub fn has_extractable_contents(&self) -> bool {
        self.capabilities().extractable_contents
    }

    pub fn has_extractable_array(&self) -> bool {
        self.capabilities().extractable_array
    }

    pub fn size(&self) -> ExtractResult<Option<u64>> {
        self.gate(self.capabilities().size, "size")?;
        self.extractor.size(&self.cx)
    }

    pub fn capacity(&self) -> ExtractResult<Option<u64>> {
        self.gate(self.capabilities().capacity, "capacity")?;
        self.extractor.capacity(&self.cx)
    }

    pub fn fill_ratio(&self) -> ExtractResult<Option<f64>> {
        self.gate(self.capabilities().fill_ratio, "fill_ratio")?;
        self.extractor.fill_ratio(&self.cx)
    }

    pub fn extract_entry_ids(&self) -> ExtractResult<Vec<u32>> {
        self.gate(self.capabilities().extractable_contents, "entry ids")?;
        self.extractor.extract_entry_ids(&self.cx)
    }

    pub fn extract_array(&self) -> ExtractResult<Option<ArrayView>> {
        self.gate(self.capabilities().extractable_array, "backing array")?;
        self.extractor.extract_array(&self.cx)
    }

    pub fn is_empty(&self) -> ExtractResult<Option<bool>> {
        Ok(self.size()?.map(|n| n == 0))
    }

    fn gate(&self, allowed: bool, what: &'static str) -> ExtractResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(ExtractError::Unsupported(what))
        }
    }
}

impl<'s, E: MapExtractor + ?Sized> Extracted<'s, E> {
    pub fn has_collision_ratio(&self) -> bool {
        self.capabilities().collision_ratio
    }

    pub fn collision_ratio(&self) -> ExtractResult<Option<f64>> {
        self.gate(self.capabilities().collision_ratio, "collision_ratio")?;
        self.extractor.collision_ratio(&self.cx)
    }

    pub fn entries(&self) -> ExtractResult<Vec<MapEntry>> {
        self.gate(self.capabilities().extractable_contents, "entries")?;
        self.extractor.entries(&self.cx)
    }

    pub fn entry_by_identity(&self, key_id: u32) -> ExtractResult<Option<u32>> {
        self.gate(self.capabilities().extractable_contents, "entries")?;
        self.extractor.entry_by_identity(&self.cx, key_id)
    }
}

/// Selects an extractor for `object` and wraps it as a collection view.
/// An explicit override always wins; plain arrays use the built-in array
/// extractor; everything else goes through the registry. `None` when
/// nothing matches.
pub fn extract_collection<'s>(
    object: HeapObject<'s>,
    registry: &ExtractorRegistry,
    override_extractor: Option<Arc<dyn CollectionExtractor>>,
) -> ExtractResult<Option<ExtractedCollection<'s>>> {
    if let Some(extractor) = override_extractor {
        return Ok(Some(Extracted::new(object, extractor)?));
    }
    if object.record()?.kind == "ARRAY" {
        let extractor: Arc<dyn CollectionExtractor> = Arc::new(ArrayExtractor);
        return Ok(Some(Extracted::new(object, extractor)?));
    }
    let class = object.class()?;
    match registry.lookup(object.snapshot(), class) {
        Some(descriptor) => {
            Ok(Some(Extracted::new(object, descriptor.extractor.as_collection())?))
        }
        None => Ok(None),
    }
}

/// Map-shaped counterpart of [`extract_collection`]. Arrays are not
/// maps, so only overrides and registry map entries match.
pub fn extract_map<'s>(
    object: HeapObject<'s>,
    registry: &ExtractorRegistry,
    override_extractor: Option<Arc<dyn MapExtractor>>,
) -> ExtractResult<Option<ExtractedMap<'s>>> {
    if let Some(extractor) = override_extractor {
        return Ok(Some(Extracted::new(object, extractor)?));
    }
    let class = object.class()?;
    match registry.lookup(object.snapshot(), class) {
        Some(descriptor) => match descriptor.extractor.as_map() {
            Some(extractor) => Ok(Some(Extracted::new(object, extractor)?)),
            None => Ok(None),
        },
        None => Ok(None),
    }
}
