//! Account directory and balance refresh

mod directory;
mod refresher;
mod types;

pub use directory::AccountDirectory;
pub use refresher::AccountRefresher;
pub use types::*;
