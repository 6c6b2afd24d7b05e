//! Synchronization protocol
//!
//! Three independent request/response pairs:
//! - INFO: does the replica hold the same value? (OK / NOT_FOUND / PARTIAL)
//! - COPY: store these values verbatim
//! - SYNC: rebuild the value from the replica's own value and a diff

pub mod codec;
pub mod error;
pub mod handler;
pub mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use handler::{HandlerStats, SyncHandler};
pub use types::{
    now_millis, CopyRequest, InfoRequest, InfoResponse, InfoStatus, Request, RequestKind,
    Response, SyncAck, SyncRequest,
};
