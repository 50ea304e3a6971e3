//! Gateway: HTTP surface over the task pipeline and the path jail.
//!
//! Single port. `GET /` liveness, `POST /run` dispatches a task, `GET /read` reads under the
//! data root. Optional bearer-token auth on everything but liveness.

mod protocol;
mod server;

pub use protocol::{ErrorKind, ErrorResponse, ReadQuery, RunBody, RunQuery, TaskResponse};
pub use server::{router, run_gateway, serve, GatewayState};
