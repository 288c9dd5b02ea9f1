pub mod backend;
pub mod error;
pub mod lifecycle;
pub mod persistence;
pub mod service;

#[cfg(test)]
mod testing;

pub use backend::*;
pub use error::*;
pub use lifecycle::*;
pub use persistence::*;
pub use service::*;
