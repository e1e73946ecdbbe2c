pub mod audit;
pub mod config;
pub mod lock;
pub mod merge;
pub mod paths;
pub mod pending;
pub mod router;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod util;
pub mod watcher;
