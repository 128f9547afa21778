// HTTP plumbing shared by the gateway and the notifier: the JSON error
// envelope, request-id propagation and the standard middleware stack.

pub mod envelope;
pub mod middleware;
pub mod request_id;

pub use envelope::{ApiError, ErrorKind};
pub use request_id::{
    attach_request_id_header, current_request_id, with_request_id_scope, REQUEST_ID_HEADER,
};
