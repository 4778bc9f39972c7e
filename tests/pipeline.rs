//! End-to-end pipeline test: a synthetic scanner output stream is parsed by
//! `ScanStream`, pushed through the `InvestigationEngine`, and probed
//! against local mock HTTP endpoints.

mod support;

use std::sync::Arc;
use std::time::Duration;

use llamascan::engine::InvestigationEngine;
use llamascan::probe::ProbeClient;
use llamascan::scan::ScanStream;
use support::{mock_endpoint, TAGS_BODY, VERSION_BODY};

#[tokio::test]
async fn scan_stream_feeds_engine_end_to_end() {
    let good_one = mock_endpoint(Some(TAGS_BODY), Some(VERSION_BODY)).await;
    let good_two = mock_endpoint(Some(TAGS_BODY), Some(VERSION_BODY)).await;
    let broken = mock_endpoint(None, None).await;

    // Three discovery lines, no diagnostics, mixed delimiters and a missing
    // final terminator, exactly as masscan might emit them.
    let script = format!(
        "#masscan\nopen tcp {} 127.0.0.1 1700000000\ropen tcp {} 127.0.0.1 1700000001\nopen tcp {} 127.0.0.1 1700000002",
        good_one.port(),
        broken.port(),
        good_two.port(),
    );

    let prober = Arc::new(ProbeClient::new(Duration::from_secs(2)).unwrap());
    let mut engine = InvestigationEngine::new(prober, 4);
    engine.start().unwrap();

    let mut stream = ScanStream::from_reader(script.as_bytes());
    let mut discovered = 0;
    loop {
        match stream.next_host().await {
            Ok(Some(host)) => {
                discovered += 1;
                engine.add_host(host).unwrap();
            }
            Ok(None) => break,
            Err(e) => panic!("unexpected terminal scan error: {e}"),
        }
    }
    engine.stop().await;

    let results = engine.drain();
    assert_eq!(discovered, 3);
    assert_eq!(results.len(), 2, "exactly the two healthy hosts must match");
    assert!(results.iter().all(|i| i.version == "0.1.32"));
    assert!(results.iter().all(|i| i.models.len() == 1));

    let matched_ports: Vec<u16> = results.iter().map(|i| i.port).collect();
    assert!(matched_ports.contains(&good_one.port()));
    assert!(matched_ports.contains(&good_two.port()));
    assert!(!matched_ports.contains(&broken.port()));
}
