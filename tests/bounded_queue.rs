use std::thread;
use std::time::Duration;

use dining_monitors::pipeline::{consume_until_sentinel, produce, Pipeline};
use dining_monitors::telemetry::init_test_logging;
use dining_monitors::{BoundedChannel, ScenarioConfig, Wait};

#[test]
fn twenty_values_cross_a_five_slot_queue() {
    init_test_logging();
    let config = ScenarioConfig::from_toml_str(
        "[pipeline]\nproducer_pause_ms = 1\nconsumer_pause_ms = 5\n",
    )
    .unwrap()
    .pipeline;

    let report = Pipeline::new(config.capacity, config.sentinel)
        .producer_pause(Duration::from_millis(config.producer_pause_ms))
        .consumer_pause(Duration::from_millis(config.consumer_pause_ms))
        .run(config.values(), config.patience())
        .unwrap();

    assert_eq!(report.produced, 20);
    assert_eq!(report.consumed, (1..=20).collect::<Vec<i64>>());
    assert!(report.peak_len <= 5);
}

#[test]
fn several_producers_one_sentinel_each() {
    init_test_logging();
    let channel = BoundedChannel::new(3);
    let wait = Wait::timeout(Duration::from_secs(10));

    let mut received = thread::scope(|s| {
        for base in [100u32, 200, 300] {
            let channel = channel.clone();
            s.spawn(move || produce(&channel, base + 1..=base + 10, &0, wait).unwrap());
        }
        let mut received = Vec::new();
        for _ in 0..3 {
            received.extend(consume_until_sentinel(&channel, &0, wait, |_| {}).unwrap());
        }
        received
    });

    assert!(channel.is_empty());
    received.sort_unstable();
    let expected: Vec<u32> = [100u32, 200, 300]
        .iter()
        .flat_map(|base| base + 1..=base + 10)
        .collect();
    assert_eq!(received, expected);
}
