pub mod audit;
pub mod blackout;
pub mod config;
pub mod engine;
pub mod jobs;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod signal;
pub mod table;
pub mod wal;
pub mod window;
