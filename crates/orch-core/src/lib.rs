pub mod config;
pub mod conversation;
pub mod error;
pub mod state;
pub mod state_machine;
pub mod store;
pub mod types;
pub mod validation;

pub use config::*;
pub use conversation::*;
pub use error::*;
pub use state::*;
pub use state_machine::*;
pub use store::*;
pub use types::*;
pub use validation::*;
