//! HTTP surface for CodeRadar: analysis runs, job polling and cancellation,
//! server-sent job events, repository catalog, insight workflow and CLI sync.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod sse;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use server::Server;
pub use state::AppState;
