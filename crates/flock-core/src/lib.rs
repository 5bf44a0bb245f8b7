pub mod config;
pub mod error;
pub mod io;
pub mod naming;
pub mod orchestrator;
pub mod paths;
pub mod remote;

pub use error::{FlockError, Result};
