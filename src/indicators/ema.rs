/// Calculate Exponential Moving Average (EMA)
///
/// `prices` must be ordered oldest to newest. The series is seeded with the
/// first price and smoothed with alpha = 2/(period+1), matching the
/// recursive definition used by the trend filter (ewm with adjust=false).
/// Returns the EMA at the newest price, or None when fewer prices than the
/// period are available.
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut ema = prices[0];
    for price in &prices[1..] {
        ema = (price - ema) * alpha + ema;
    }

    Some(ema)
}
