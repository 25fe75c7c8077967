pub mod config;
pub mod messages;
pub mod models;
pub mod traits;

pub use config::*;
pub use messages::*;
pub use models::*;
pub use traits::*;
