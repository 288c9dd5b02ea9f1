pub mod client;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod model;
pub mod remote;
pub mod routes;
pub mod server;
pub mod state;
pub mod ws;

#[cfg(test)]
mod testing;

pub use client::*;
pub use connection::*;
pub use coordinator::*;
pub use error::*;
pub use logging::*;
pub use model::*;
pub use remote::*;
pub use routes::*;
pub use server::*;
pub use state::*;
