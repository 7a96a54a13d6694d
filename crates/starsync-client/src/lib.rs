//! Remote store access for StarSync: the [`RemoteStore`] contract, the
//! REST implementation, packed list decoding and an in-memory store.

pub mod http;
pub mod memory;
pub mod packed;
pub mod store;

pub use http::HttpStore;
pub use memory::{MemoryStore, StoreOp};
pub use packed::{decode_packed, decode_page};
pub use store::{Filter, ListQuery, Page, RemoteStore};
