pub mod config;
pub mod directory;
pub mod output;
pub mod providers;
pub mod snapshot;
pub mod store;
