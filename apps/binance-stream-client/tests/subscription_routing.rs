//! Subscription and Routing Integration Tests
//!
//! Tests reference counting on the wire, subscription handles, and delivery
//! of normalized records from inbound frames.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

mod common;

use std::time::Duration;

use tokio::time::timeout;

use binance_stream_client::{
    ChannelKey, ClientError, Exchange, Instrument, Method, RefChange, Side,
};
use common::{Harness, method_and_params};

const BTC_TRADE: &str = r#"{"stream":"btcusdt@trade","data":{"e":"trade","E":1690000000000,"s":"BTCUSDT","t":555,"p":"30000.1","q":"0.01","m":true}}"#;

const BTC_DEPTH: &str = r#"{"stream":"btcusdt@depth20@100ms","data":{"lastUpdateId":160,"bids":[["100.5","2.0"],["100.4","1.0"]],"asks":[["101.0","1.5"]]}}"#;

#[tokio::test(start_paused = true)]
async fn first_and_last_reference_send_one_request_each() {
    let mut h = Harness::new();
    h.client.connect().await.unwrap();
    let mut session = h.next_session().await;
    let key = ChannelKey::trades("BTCUSDT", false);

    assert!(matches!(
        h.client.add_reference(&key),
        RefChange::FirstReference { .. }
    ));
    assert!(matches!(
        h.client.add_reference(&key),
        RefChange::Retained { references: 2, .. }
    ));
    h.client.add_reference(&key);
    h.client.remove_reference(&key).unwrap();
    h.client.remove_reference(&key).unwrap();
    assert!(matches!(
        h.client.remove_reference(&key).unwrap(),
        RefChange::LastReference { .. }
    ));

    let subscribe = session.next_request_text().await;
    assert_eq!(
        subscribe,
        r#"{"method":"SUBSCRIBE","params":["btcusdt@trade"],"id":1}"#
    );
    let unsubscribe = session.next_request().await;
    assert_eq!(
        method_and_params(&unsubscribe),
        ("UNSUBSCRIBE".to_string(), vec!["btcusdt@trade".to_string()])
    );
    assert!(session.is_quiet().await);
    assert_eq!(h.client.reference_count(&key), 0);
}

#[tokio::test(start_paused = true)]
async fn removing_unknown_reference_is_an_error() {
    let h = Harness::new();
    let key = ChannelKey::orderbook("BTCUSDT", 100);

    let err = h.client.remove_reference(&key).unwrap_err();

    assert_eq!(err, ClientError::NotSubscribed("btcusdt@depth20@100ms".to_string()));
    assert!(h.client.active_channels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn explicit_send_allocates_increasing_ids() {
    let mut h = Harness::new();
    h.client.connect().await.unwrap();
    let mut session = h.next_session().await;

    assert!(h.client.send(Method::Subscribe, vec!["btcusdt@trade".to_string()]));
    assert!(h.client.send(Method::Unsubscribe, vec!["btcusdt@trade".to_string()]));

    let first = session.next_request().await;
    let second = session.next_request().await;
    assert_eq!(first["id"], 1);
    assert_eq!(second["id"], 2);
    assert_eq!(h.client.stats().last_request_id, 2);
}

#[tokio::test(start_paused = true)]
async fn trade_frames_reach_the_subscription() {
    let mut h = Harness::new();
    let mut trades = h
        .client
        .subscribe_trades(&Instrument::binance("btcusdt"))
        .await
        .unwrap();
    let mut session = h.next_session().await;
    session.next_request().await;

    session.push(r#"{"stream":"btcusdt@kline_1m","data":{"k":{}}}"#);
    session.push(r#"{"stream":"dogeusdt@trade","data":{"t":1,"m":false,"E":1,"p":"1","q":"1"}}"#);
    session.push("not json");
    session.push(BTC_TRADE);

    let print = timeout(Duration::from_secs(5), trades.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(print.order_id, 555);
    assert_eq!(print.side, Side::Sell);
    assert_eq!(print.timestamp, 1_690_000_000_000);
    assert_eq!(print.symbol, "BTCUSDT");
    assert_eq!(print.price, 30000.1);
    assert_eq!(print.volume, 0.01);
    assert!(trades.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn orderbook_frames_are_normalized_and_retained() {
    let mut h = Harness::new();
    let mut books = h
        .client
        .subscribe_orderbook(&Instrument::binance("BTCUSDT"))
        .await
        .unwrap();
    let mut session = h.next_session().await;
    assert_eq!(books.channel(), "btcusdt@depth20@100ms");
    session.next_request().await;

    session.push(BTC_DEPTH);

    let update = timeout(Duration::from_secs(5), books.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(update.last_update_id, Some(160));
    assert_eq!(update.book.bids.len(), 2);
    let best_bid = update.book.best_bid().unwrap();
    assert_eq!(best_bid.price, 100.5);
    assert_eq!(best_bid.volume, 2.0);
    assert!(best_bid.processed);
    assert_eq!(books.latest(), Some(update));
}

#[tokio::test(start_paused = true)]
async fn dropping_last_subscription_unsubscribes() {
    let mut h = Harness::new();
    let btc = Instrument::binance("BTCUSDT");
    let first = h.client.subscribe_trades(&btc).await.unwrap();
    let second = h.client.subscribe_trades(&btc).await.unwrap();
    let mut session = h.next_session().await;

    let subscribe = session.next_request().await;
    assert_eq!(subscribe["method"], "SUBSCRIBE");

    drop(first);
    assert!(session.is_quiet().await);
    assert_eq!(h.client.reference_count(second.key()), 1);

    let key = second.key().clone();
    drop(second);
    let unsubscribe = session.next_request().await;
    assert_eq!(unsubscribe["method"], "UNSUBSCRIBE");
    assert_eq!(h.client.reference_count(&key), 0);
    assert!(!h.client.hub().has_sink("btcusdt@trade"));
}

#[tokio::test(start_paused = true)]
async fn subscriber_sees_end_of_stream_after_channel_released() {
    let mut h = Harness::new();
    let btc = Instrument::binance("BTCUSDT");
    let mut subscription = h.client.subscribe_trades(&btc).await.unwrap();
    let _session = h.next_session().await;

    h.client.remove_reference(subscription.key()).unwrap();

    assert!(subscription.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn other_exchange_instruments_are_rejected() {
    let h = Harness::new();
    let instrument = Instrument {
        symbol: "BTC-USD".to_string(),
        exchange: Exchange::Other("coinbase".to_string()),
    };

    let err = h.client.subscribe_trades(&instrument).await.unwrap_err();

    assert_eq!(err, ClientError::UnsupportedExchange("BTC-USD".to_string()));
    assert_eq!(h.connector.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn subscribe_after_shutdown_fails() {
    let h = Harness::new();
    h.client.shutdown();

    let err = h
        .client
        .subscribe_orderbook(&Instrument::binance("BTCUSDT"))
        .await
        .unwrap_err();

    assert_eq!(err, ClientError::Shutdown);
    assert!(h.client.active_channels().is_empty());
}
