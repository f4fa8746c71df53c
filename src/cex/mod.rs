pub mod kucoin;

// Re-export
pub use kucoin::Kucoin;
