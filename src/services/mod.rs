//! The relocation engine (`ObjectManager` and its operations) and the local
//! store backend.

pub mod chunked_copy;
pub mod consolidation;
pub mod deleter;
pub mod lister;
pub mod mover;
pub mod object_manager;
pub mod storage_service;
