use std::sync::Arc;

use heaplens_dump::class::ClassRecord;

use crate::extract::{CollectionExtractor, MapExtractor};
use crate::snapshot::{schema, Snapshot};

// Guards the class-of chain walk against synthetic self-loops.
const MAX_CLASS_CHAIN: usize = 16;

#[derive(Clone)]
pub enum RegisteredExtractor {
    Collection(Arc<dyn CollectionExtractor>),
    Map(Arc<dyn MapExtractor>),
}

impl RegisteredExtractor {
    pub fn as_collection(&self) -> Arc<dyn CollectionExtractor> {
        match self {
            RegisteredExtractor::Collection(e) => e.clone(),
            RegisteredExtractor::Map(e) => e.clone() as Arc<dyn CollectionExtractor>,
        }
    }

    pub fn as_map(&self) -> Option<Arc<dyn MapExtractor>> {
        match self {
            RegisteredExtractor::Collection(_) => None,
            RegisteredExtractor::Map(e) => Some(e.clone()),
        }
    }
}

/// One known collection implementation: which class it matches, under
/// which snapshot schema versions, and the extractor that understands
/// its layout.
#[derive(Clone)]
pub struct CollectionDescriptor {
    pub class_name: String,
    pub match_subclasses: bool,
    pub versions: schema::VersionFlags,
    pub extractor: RegisteredExtractor,
}

/// Registry of collection descriptors, matched against an object's
/// class. Populated by the embedding application; first matching entry
/// wins, so register more specific descriptors first.
#[derive(Default)]
pub struct ExtractorRegistry {
    entries: Vec<CollectionDescriptor>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: CollectionDescriptor) {
        self.entries.push(descriptor);
    }

    pub fn register_collection(
        &mut self,
        class_name: &str,
        versions: schema::VersionFlags,
        extractor: Arc<dyn CollectionExtractor>,
    ) {
        self.register(CollectionDescriptor {
            class_name: class_name.to_string(),
            match_subclasses: false,
            versions,
            extractor: RegisteredExtractor::Collection(extractor),
        });
    }

    pub fn register_map(
        &mut self,
        class_name: &str,
        versions: schema::VersionFlags,
        extractor: Arc<dyn MapExtractor>,
    ) {
        self.register(CollectionDescriptor {
            class_name: class_name.to_string(),
            match_subclasses: false,
            versions,
            extractor: RegisteredExtractor::Map(extractor),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup<'r>(
        &'r self,
        snapshot: &Snapshot,
        class: &ClassRecord,
    ) -> Option<&'r CollectionDescriptor> {
        let version = snapshot.schema_version();
        self.entries.iter().find(|entry| {
            if entry.versions & version == 0 {
                return false;
            }
            if entry.class_name == class.name {
                return true;
            }
            entry.match_subclasses && chain_contains(snapshot, class, &entry.class_name)
        })
    }
}

/// Walks the class-of linkage upward looking for a named ancestor. The
/// dump format carries no separate superclass edge, so this is the only
/// inheritance signal available.
fn chain_contains(snapshot: &Snapshot, class: &ClassRecord, name: &str) -> bool {
    let mut current = class.class_address;
    for _ in 0..MAX_CLASS_CHAIN {
        let address = match current {
            Some(address) => address,
            None => return false,
        };
        let parent = match snapshot.class_by_address(address) {
            Some(parent) => parent,
            None => return false,
        };
        if parent.name == name {
            return true;
        }
        if parent.class_address == Some(address) {
            // Synthetic root class points at itself.
            return false;
        }
        current = parent.class_address;
    }
    false
}
