//! Shared service wrappers used by interfaces.

mod local_store;

pub use local_store::LocalStore;
