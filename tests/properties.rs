use std::thread;
use std::time::Duration;

use dining_monitors::dining::Bowl;
use dining_monitors::{BoundedChannel, ResourcePool, SyncError, Termination, Wait};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn channel_preserves_order_across_threads(
        values in prop::collection::vec(any::<u16>(), 0..200),
        capacity in 1usize..8,
    ) {
        let channel = BoundedChannel::new(capacity);
        let received = thread::scope(|s| {
            let producer = channel.clone();
            let sent = values.clone();
            s.spawn(move || {
                for v in sent {
                    producer.push(v);
                }
            });
            (0..values.len()).map(|_| channel.pop()).collect::<Vec<_>>()
        });
        prop_assert_eq!(received, values);
        prop_assert!(channel.is_empty());
    }

    #[test]
    fn pool_hands_out_each_unit_exactly_once(total in 0u64..300, workers in 1usize..6) {
        let pool = ResourcePool::one_shot(total);
        let counts = thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    s.spawn(|| {
                        let mut taken = 0u64;
                        while pool.try_consume().is_ok() {
                            taken += 1;
                        }
                        taken
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });
        prop_assert_eq!(counts.iter().sum::<u64>(), total);
        prop_assert!(pool.is_finished());
    }

    #[test]
    fn replenish_never_exceeds_capacity(total in 1u64..50, taken in 0u64..50, refill in 0u64..100) {
        let taken = taken.min(total);
        let pool = ResourcePool::new(total, Termination::ConsumptionTarget(u64::MAX));
        for _ in 0..taken {
            pool.try_consume_with(Wait::timeout(Duration::ZERO)).unwrap();
        }
        let left = total - taken;
        match pool.replenish(refill) {
            Ok(now) => {
                prop_assert!(refill > 0 && left + refill <= total);
                prop_assert_eq!(now, left + refill);
            }
            Err(SyncError::EmptyRefill) => prop_assert_eq!(refill, 0),
            Err(SyncError::OverCapacity { remaining, .. }) => {
                prop_assert!(left + refill > total);
                prop_assert_eq!(remaining, left);
            }
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
        prop_assert!(pool.snapshot().remaining <= total);
    }

    #[test]
    fn bowl_count_is_conserved(sweets in 0u64..500, takers in 1usize..5) {
        let bowl = Bowl::new(sweets);
        let eaten: u64 = thread::scope(|s| {
            let handles: Vec<_> = (0..takers)
                .map(|_| s.spawn(|| std::iter::from_fn(|| bowl.take_one()).count() as u64))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        prop_assert_eq!(eaten + bowl.remaining(), sweets);
        prop_assert!(bowl.is_empty());
    }
}
