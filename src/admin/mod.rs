//! Admin surface: HTTP API and the node server that hosts it

pub mod http;
pub mod server;

pub use http::{create_router, AdminState};
pub use server::NodeServer;
