use crate::extract::{
    ArrayView, Capabilities, CollectionExtractor, ExtractResult, ExtractionCx, FieldShape,
    FieldSpec, MapExtractor, MapEntry,
};
use crate::snapshot::HeapObject;

/// Collections whose size is a scalar on their own record.
pub struct LengthCollectionExtractor;

const LENGTH_FIELDS: [FieldSpec; 1] =
    [FieldSpec { name: "length", shape: FieldShape::Scalar }];

impl CollectionExtractor for LengthCollectionExtractor {
    fn capabilities(&self) -> Capabilities {
        Capabilities { size: true, ..Capabilities::default() }
    }

    fn fields(&self) -> &[FieldSpec] {
        &LENGTH_FIELDS
    }

    fn size(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<u64>> {
        cx.scalar("length")
    }
}

/// Collections backed by one contiguous array held in a declared field.
pub struct HashedCollectionExtractor {
    array_field: &'static str,
    fields: [FieldSpec; 1],
}

impl HashedCollectionExtractor {
    pub fn new(array_field: &'static str) -> Self {
        Self {
            array_field,
            fields: [FieldSpec { name: array_field, shape: FieldShape::Reference }],
        }
    }
}

fn backing<'s>(
    cx: &ExtractionCx<'s>,
    array_field: &str,
) -> ExtractResult<Option<HeapObject<'s>>> {
    cx.field_object(array_field)
}

fn backing_capacity(cx: &ExtractionCx<'_>, array_field: &str) -> ExtractResult<Option<u64>> {
    let array = match backing(cx, array_field)? {
        Some(array) => array,
        None => return Ok(None),
    };
    match array.record()?.length {
        Some(length) => Ok(Some(length)),
        None => Ok(Some(array.data_refs().len() as u64)),
    }
}

impl CollectionExtractor for HashedCollectionExtractor {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            size: true,
            capacity: true,
            fill_ratio: true,
            extractable_contents: true,
            extractable_array: true,
            ..Capabilities::default()
        }
    }

    fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    fn size(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<u64>> {
        Ok(backing(cx, self.array_field)?.map(|array| array.data_refs().len() as u64))
    }

    fn capacity(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<u64>> {
        backing_capacity(cx, self.array_field)
    }

    fn fill_ratio(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<f64>> {
        let size = match self.size(cx)? {
            Some(size) => size,
            None => return Ok(None),
        };
        match self.capacity(cx)? {
            Some(capacity) if capacity > 0 => Ok(Some(size as f64 / capacity as f64)),
            _ => Ok(None),
        }
    }

    fn extract_entry_ids(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Vec<u32>> {
        Ok(backing(cx, self.array_field)?
            .map(|array| array.data_refs().to_vec())
            .unwrap_or_default())
    }

    fn extract_array(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<ArrayView>> {
        let array = match backing(cx, self.array_field)? {
            Some(array) => array,
            None => return Ok(None),
        };
        let length = match array.record()?.length {
            Some(length) => length,
            None => array.data_refs().len() as u64,
        };
        Ok(Some(ArrayView {
            object_id: array.id(),
            length,
            entry_ids: array.data_refs().to_vec(),
        }))
    }
}

/// Open-addressed maps backed by one array of alternating key/value
/// slots.
pub struct HashedMapExtractor {
    array_field: &'static str,
    fields: [FieldSpec; 1],
}

impl HashedMapExtractor {
    pub fn new(array_field: &'static str) -> Self {
        Self {
            array_field,
            fields: [FieldSpec { name: array_field, shape: FieldShape::Reference }],
        }
    }

    fn pairs(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<Vec<MapEntry>>> {
        let array = match backing(cx, self.array_field)? {
            Some(array) => array,
            None => return Ok(None),
        };
        let entries = array
            .data_refs()
            .chunks(2)
            .map(|pair| MapEntry { key: pair.first().copied(), value: pair.get(1).copied() })
            .collect();
        Ok(Some(entries))
    }
}

impl CollectionExtractor for HashedMapExtractor {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            size: true,
            capacity: true,
            fill_ratio: true,
            extractable_contents: true,
            collision_ratio: true,
            ..Capabilities::default()
        }
    }

    fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    fn size(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<u64>> {
        Ok(self.pairs(cx)?.map(|entries| entries.len() as u64))
    }

    fn capacity(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<u64>> {
        backing_capacity(cx, self.array_field)
    }

    fn fill_ratio(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<f64>> {
        let size = match self.size(cx)? {
            Some(size) => size,
            None => return Ok(None),
        };
        match self.capacity(cx)? {
            Some(capacity) if capacity > 0 => Ok(Some(size as f64 / capacity as f64)),
            _ => Ok(None),
        }
    }

    fn extract_entry_ids(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Vec<u32>> {
        let mut ids = Vec::new();
        if let Some(entries) = self.pairs(cx)? {
            for entry in entries {
                ids.extend(entry.key);
                ids.extend(entry.value);
            }
        }
        Ok(ids)
    }
}

impl MapExtractor for HashedMapExtractor {
    fn entries(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Vec<MapEntry>> {
        Ok(self.pairs(cx)?.unwrap_or_default())
    }

    /// Keys hashed by identity over the bucket count; the collision
    /// ratio is the share of entries landing in an already-taken bucket.
    fn collision_ratio(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<f64>> {
        let entries = match self.pairs(cx)? {
            Some(entries) if !entries.is_empty() => entries,
            _ => return Ok(None),
        };
        let buckets = match self.capacity(cx)? {
            Some(buckets) if buckets > 0 => buckets,
            _ => return Ok(None),
        };
        let mut taken = std::collections::HashSet::new();
        for entry in &entries {
            if let Some(key) = entry.key {
                taken.insert(u64::from(key) % buckets);
            }
        }
        let size = entries.len() as f64;
        Ok(Some((size - taken.len() as f64) / size))
    }
}
