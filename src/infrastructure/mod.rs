pub mod alerting;
pub mod circuit_breaker;
pub mod core;
pub mod mock;
pub mod persistence;
pub mod state_store;
pub mod venues;
