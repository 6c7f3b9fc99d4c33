#![doc = "Common types shared across the soil dashboard workspace."]

pub mod config;
pub mod error;
pub mod health;
pub mod model;
pub mod session;
pub mod state;

pub use config::*;
pub use error::*;
pub use health::*;
pub use model::*;
pub use session::*;
pub use state::*;
