//! Core data models for the file service.
//!
//! `FileRecord` maps to the `file_metadata` table via `sqlx::FromRow` and
//! serializes as JSON via `serde` (without its storage key).

pub mod file;
