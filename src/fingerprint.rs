//! Call-site fingerprints (API ids)
//!
//! An API id names a call site independently of the request that reached
//! it: `<CASE_TYPE>-<digest>`, where the digest is a 64-bit FNV-1a hash over
//! the retained frame hashes of the normalized stack followed by the hash of
//! the source method. The same call site therefore maps to the same id on
//! every invocation, and the collector uses it for deduplication and for
//! the API blocking allow-list.
//!
//! # Example
//! ```
//! use vigil::fingerprint::generate_api_id;
//! use vigil::operation::CaseType;
//!
//! let a = generate_api_id(CaseType::SqlDbCommand, &[1, 2, 3], Some("dao.find(Dao.java:3)")).unwrap();
//! let b = generate_api_id(CaseType::SqlDbCommand, &[1, 2, 3], Some("dao.find(Dao.java:3)")).unwrap();
//! assert_eq!(a, b);
//! assert!(a.starts_with("SQL_DB_COMMAND-"));
//! ```

use crate::operation::CaseType;
use std::hash::Hasher;
use thiserror::Error;

/// API id given to operations whose call site could not be fingerprinted
pub const UNDEFINED_API_ID: &str = "UNDEFINED";

/// Separator between the case type and the digest
pub const API_ID_SEPARATOR: char = '-';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("normalized stack is empty, no source method to fingerprint")]
    EmptyTrace,
}

/// FNV-1a hash of a string
pub fn hash_str(value: &str) -> u64 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(value.as_bytes());
    hasher.finish()
}

/// 64-bit FNV-1a digest over an ordered list of hashes
pub fn digest(hashes: &[u64]) -> u64 {
    let mut hasher = fnv::FnvHasher::default();
    for hash in hashes {
        hasher.write(&hash.to_le_bytes());
    }
    hasher.finish()
}

/// Build the API id for a call site
///
/// `frame_hashes` are the retained frame hashes in traversal order;
/// `source_method` is the string form of the first retained frame.
pub fn generate_api_id(
    case_type: CaseType,
    frame_hashes: &[u64],
    source_method: Option<&str>,
) -> Result<String, FingerprintError> {
    let source_method = source_method.ok_or(FingerprintError::EmptyTrace)?;

    let mut input = Vec::with_capacity(frame_hashes.len() + 1);
    input.extend_from_slice(frame_hashes);
    input.push(hash_str(source_method));

    Ok(format!(
        "{}{}{}",
        case_type.as_str(),
        API_ID_SEPARATOR,
        hex::encode(digest(&input).to_be_bytes())
    ))
}

/// Like [`generate_api_id`], falling back to [`UNDEFINED_API_ID`]
pub fn api_id_or_undefined(
    case_type: CaseType,
    frame_hashes: &[u64],
    source_method: Option<&str>,
) -> String {
    match generate_api_id(case_type, frame_hashes, source_method) {
        Ok(api_id) => api_id,
        Err(e) => {
            tracing::debug!(error = %e, case_type = %case_type, "falling back to undefined api id");
            UNDEFINED_API_ID.to_string()
        }
    }
}
