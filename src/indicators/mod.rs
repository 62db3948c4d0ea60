// Technical indicators module
// Only what the trend filter needs: exponential moving averages

pub mod ema;

pub use ema::calculate_ema;
