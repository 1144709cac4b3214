//! Upstream payload parsing
//!
//! Trade frames carry `{"p": "<price>", "T": <epoch ms>, ...}`; depth
//! frames carry `{"bids": [["p","q"], ...], "asks": [["p","q"], ...]}`.
//! Anything that does not parse is dropped silently; the feeds also send
//! subscription acks and heartbeats we do not care about.

use rust_decimal::Decimal;
use serde::Deserialize;

use super::FeedEvent;

#[derive(Debug, Deserialize)]
struct TradeFrame {
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "T")]
    ts: i64,
}

#[derive(Debug, Deserialize)]
struct DepthFrame {
    bids: Vec<(Decimal, Decimal)>,
    asks: Vec<(Decimal, Decimal)>,
}

pub fn parse_trade(price_key: &str, text: &str) -> Option<FeedEvent> {
    let frame: TradeFrame = serde_json::from_str(text).ok()?;
    if frame.price <= Decimal::ZERO {
        return None;
    }
    Some(FeedEvent::Trade {
        price_key: price_key.to_string(),
        price: frame.price,
        ts: frame.ts,
    })
}

pub fn parse_depth(price_key: &str, text: &str) -> Option<FeedEvent> {
    let frame: DepthFrame = serde_json::from_str(text).ok()?;
    Some(FeedEvent::Depth {
        price_key: price_key.to_string(),
        bids: frame.bids,
        asks: frame.asks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_trade_frame() {
        let text = r#"{"e":"trade","E":1690000000100,"s":"BTCUSDT","p":"30010.50","q":"0.012","T":1690000000099}"#;
        match parse_trade("btcusdt", text) {
            Some(FeedEvent::Trade { price_key, price, ts }) => {
                assert_eq!(price_key, "btcusdt");
                assert_eq!(price, dec!(30010.50));
                assert_eq!(ts, 1690000000099);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_trade_rejects_junk_and_nonpositive() {
        assert!(parse_trade("btcusdt", "not json").is_none());
        assert!(parse_trade("btcusdt", r#"{"result":null,"id":1}"#).is_none());
        assert!(parse_trade("btcusdt", r#"{"p":"0","T":1}"#).is_none());
    }

    #[test]
    fn test_parse_depth_frame() {
        let text = r#"{"lastUpdateId":160,"bids":[["29999.0","1.2"],["29998.5","0.4"]],"asks":[["30001.0","0.7"]]}"#;
        match parse_depth("btcusdt", text) {
            Some(FeedEvent::Depth { bids, asks, .. }) => {
                assert_eq!(bids.len(), 2);
                assert_eq!(bids[0].0, dec!(29999.0));
                assert_eq!(asks[0].1, dec!(0.7));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
