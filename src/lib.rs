pub mod clock;
pub mod config;
pub mod engine;
pub mod expiry;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod payment;
pub mod pricing;
pub mod reaper;
pub mod wal;
pub mod wire;
