pub mod decode;
pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod runner;
pub mod tools;
pub mod types;

pub use decode::*;
pub use error::*;
pub use orchestrator::*;
pub use provider::*;
pub use runner::*;
pub use tools::*;
pub use types::*;
