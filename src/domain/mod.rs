pub mod errors;
pub mod fees;
pub mod ports;
pub mod types;
