use bplus_core::ValueRef;

/// Ref value meaning "no previous version"
pub const NO_REF: u64 = 0;

/// First ref handed out by a fresh store
pub const FIRST_REF: u64 = 1;

/// Format a ref as big-endian bytes (preserves sort order in LMDB)
pub fn ref_to_key(reference: ValueRef) -> [u8; 8] {
    reference.to_bytes()
}

/// Parse a ref from big-endian bytes
pub fn key_to_ref(bytes: &[u8]) -> Option<ValueRef> {
    ValueRef::from_bytes(bytes).ok()
}

/// Encode a stored version: `[prev_ref: u64 BE][value bytes]`
pub fn encode_version(previous: u64, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + value.len());
    buf.extend_from_slice(&previous.to_be_bytes());
    buf.extend_from_slice(value);
    buf
}

/// Split a stored version into its previous ref and value bytes
pub fn decode_version(bytes: &[u8]) -> Option<(u64, &[u8])> {
    if bytes.len() < 8 {
        return None;
    }
    let (head, value) = bytes.split_at(8);
    let previous = u64::from_be_bytes(head.try_into().ok()?);
    Some((previous, value))
}

/// Meta keys used in the meta database
pub mod meta_keys {
    pub const NEXT_REF: &str = "next_ref";
    pub const SCHEMA_VERSION: &str = "schema_version";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
}
