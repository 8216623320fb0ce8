pub mod cached;
pub mod store;

pub use cached::CachedContentStore;
pub use store::{ContentStore, StoreError};
