mod common;

use chainmirror_core::pagination::PageQuery;
use chainmirror_indexers::oracle::OracleMappers;
use chainmirror_indexers::price::OraclePriceAggregatedMapper;
use chainmirror_indexers::payload::PricePair;

use common::*;

/// One appoint followed by six updates of the same oracle.
fn seven_snapshots() -> Vec<chainmirror_core::types::SourceBlock> {
    let mut chain = ChainBuilder::new("p")
        .block(vec![])
        .block(vec![appoint("o1", 1, &[("BTC", "USD")])]);
    for i in 0..6u8 {
        chain = chain.block(vec![update(&format!("u{i}"), "o1", i + 2, &[("BTC", "USD")])]);
    }
    chain.build()
}

#[tokio::test]
async fn oracle_history_pages_of_three() {
    let m = mirror(seven_snapshots(), None);
    m.driver.cycle().await.unwrap();
    let history = OracleMappers::new(m.store.clone()).history;

    let first = history
        .query_by_oracle("o1", &PageQuery::new(3))
        .await
        .unwrap();
    let second = history
        .query_by_oracle("o1", &PageQuery::new(3).after(first.next().unwrap()))
        .await
        .unwrap();
    let third = history
        .query_by_oracle("o1", &PageQuery::new(3).after(second.next().unwrap()))
        .await
        .unwrap();

    let sizes = [first.data.len(), second.data.len(), third.data.len()];
    assert_eq!(sizes, [3, 3, 1]);
    // newest first, ending with the appoint
    assert_eq!(first.data[0].txid, "u5");
    assert_eq!(third.data[0].txid, "o1");

    let json = serde_json::to_value(&third).unwrap();
    assert!(json.get("page").is_none());
    assert!(serde_json::to_value(&second).unwrap()["page"]["next"].is_string());
}

#[tokio::test]
async fn cursor_survives_new_blocks() {
    let chain = ChainBuilder::new("p")
        .block(vec![])
        .block(vec![appoint("o1", 1, &[("BTC", "USD")])])
        .block(vec![set_data("f2", "o1", time_of(2), &[("BTC", "USD", 10.0)])])
        .block(vec![set_data("f3", "o1", time_of(3), &[("BTC", "USD", 11.0)])])
        .block(vec![set_data("f4", "o1", time_of(4), &[("BTC", "USD", 12.0)])])
        .block(vec![set_data("f5", "o1", time_of(5), &[("BTC", "USD", 13.0)])])
        .build();
    let m = mirror(chain[..5].to_vec(), None);
    m.driver.cycle().await.unwrap();

    let prices = OraclePriceAggregatedMapper::new(m.store.clone());
    let pair = PricePair {
        token: "BTC".into(),
        currency: "USD".into(),
    };
    let first = prices.query_by_pair(&pair, &PageQuery::new(2)).await.unwrap();
    let heights: Vec<_> = first.data.iter().map(|p| p.block.height).collect();
    assert_eq!(heights, [4, 3]);
    let cursor = first.next().unwrap().to_string();

    // a new block lands ahead of the cursor
    m.source.set_chain(chain);
    m.driver.cycle().await.unwrap();

    let rest = prices
        .query_by_pair(&pair, &PageQuery::new(2).after(cursor))
        .await
        .unwrap();
    let heights: Vec<_> = rest.data.iter().map(|p| p.block.height).collect();
    assert_eq!(heights, [2]);
    assert!(rest.page.is_none());
}
