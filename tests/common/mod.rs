use std::collections::BTreeMap;

use olps_agents::observation::{Bar, MarketHistory, Row};

/// A deterministic two-asset price history long enough to exercise every
/// agent's warmup window without needing real market data.
pub fn two_asset_history(n_rows: usize) -> MarketHistory {
    let mut rows = Vec::new();
    for i in 0..n_rows {
        let wobble = (i as f64 * 0.31).sin() * 4.0;
        let mut bars = BTreeMap::new();
        bars.insert("BTC".to_string(), Bar { open: 100.0 + wobble, close: 100.0 + wobble, holding: 0.0 });
        bars.insert("ETH".to_string(), Bar { open: 50.0 - wobble * 0.5, close: 50.0 - wobble * 0.5, holding: 0.0 });
        rows.push(Row { bars, fiat_balance: 100.0 });
    }
    MarketHistory::new(vec!["BTC".to_string(), "ETH".to_string()], "USDT".to_string(), rows)
}
