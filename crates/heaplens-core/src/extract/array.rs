use crate::extract::{ArrayView, Capabilities, CollectionExtractor, ExtractResult, ExtractionCx};

/// Built-in extractor for plain arrays. Not registry-matched: arrays are
/// recognized by their record type tag, ahead of any registered
/// descriptor.
pub struct ArrayExtractor;

impl ArrayExtractor {
    fn length(&self, cx: &ExtractionCx<'_>) -> ExtractResult<u64> {
        match cx.scalar("length")? {
            Some(length) => Ok(length),
            None => Ok(cx.object.data_refs().len() as u64),
        }
    }
}

impl CollectionExtractor for ArrayExtractor {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            size: true,
            capacity: true,
            extractable_contents: true,
            extractable_array: true,
            ..Capabilities::default()
        }
    }

    fn size(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<u64>> {
        Ok(Some(self.length(cx)?))
    }

    fn capacity(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<u64>> {
        Ok(Some(self.length(cx)?))
    }

    fn extract_entry_ids(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Vec<u32>> {
        Ok(cx.object.data_refs().to_vec())
    }

    fn extract_array(&self, cx: &ExtractionCx<'_>) -> ExtractResult<Option<ArrayView>> {
        Ok(Some(ArrayView {
            object_id: cx.object.id(),
            length: self.length(cx)?,
            entry_ids: cx.object.data_refs().to_vec(),
        }))
    }
}
