//! In-process storage backend.
//!
//! [`MemoryStore`] implements every relational repository trait and
//! [`MemoryVectorIndex`] implements exact cosine k-NN. Together they back a
//! [`Library`] without PostgreSQL, which the pipeline and search tests rely on.

mod index;
mod store;

use std::sync::Arc;

use lumen_core::Library;

pub use index::MemoryVectorIndex;
pub use store::MemoryStore;

/// Bundle a store and an index into a [`Library`].
pub fn library(store: Arc<MemoryStore>, vectors: Arc<MemoryVectorIndex>) -> Library {
    Library {
        photos: store.clone(),
        faces: store.clone(),
        people: store.clone(),
        tags: store.clone(),
        queue: store.clone(),
        search: store,
        vectors,
    }
}

/// A fresh, empty in-process library plus handles to its backing stores.
pub fn empty_library() -> (Library, Arc<MemoryStore>, Arc<MemoryVectorIndex>) {
    let store = Arc::new(MemoryStore::new());
    let vectors = Arc::new(MemoryVectorIndex::new());
    (library(store.clone(), vectors.clone()), store, vectors)
}
