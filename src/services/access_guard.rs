//! Ownership check applied before every read or mutation addressed by file id.

use crate::models::file::{FileRecord, UserId};

/// True when `record` exists and belongs to `requester`.
pub fn can_access(requester: UserId, record: Option<&FileRecord>) -> bool {
    record.is_some_and(|r| r.owner_id == requester)
}

/// Outcome of guarding a lookup, keeping "absent" apart from "not yours".
#[derive(Debug, PartialEq)]
pub enum Access<'a> {
    Granted(&'a FileRecord),
    Denied,
    Missing,
}

/// Classify a looked-up record for `requester`.
pub fn check(requester: UserId, record: Option<&FileRecord>) -> Access<'_> {
    match record {
        None => Access::Missing,
        Some(r) if can_access(requester, Some(r)) => Access::Granted(r),
        Some(_) => Access::Denied,
    }
}
