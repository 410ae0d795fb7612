use bplus_core::{EngineError, Status};

/// Map an LMDB error onto the engine status table.
///
/// Codes with no counterpart keep LMDB's own numeric value.
pub(crate) fn map_lmdb_err(err: lmdb::Error) -> EngineError {
    let status = match err {
        lmdb::Error::NotFound => Status::NOT_FOUND,
        lmdb::Error::MapFull
        | lmdb::Error::DbsFull
        | lmdb::Error::ReadersFull
        | lmdb::Error::TlsFull
        | lmdb::Error::TxnFull
        | lmdb::Error::CursorFull
        | lmdb::Error::PageFull => Status::ALLOC,
        lmdb::Error::PageNotFound
        | lmdb::Error::Corrupted
        | lmdb::Error::VersionMismatch
        | lmdb::Error::Invalid => Status::FILE_READ,
        lmdb::Error::Other(errno) if errno > 0 => Status::FILE,
        other => Status::from_code(other.to_err_code()),
    };
    EngineError::new(status, err.to_string())
}
