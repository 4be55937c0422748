//! Background service: runs scheduled jobs and answers status queries over
//! a unix socket in `~/.ferry/ferry.sock`.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_detail, request_prepare, request_run, request_status, request_stop, send_request,
    DaemonRequest, DaemonResponse,
};
pub use runtime::{init_tracing, run, start_blocking};
