pub mod access_guard;
pub mod lifecycle;
pub mod metadata_store;
pub mod object_store;
pub mod session_store;
