pub mod feed;
pub mod kalshi;
pub mod polymarket;
