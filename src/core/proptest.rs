//! Property-based tests for the traffic counters.
//!
//! These tests use proptest to verify:
//! - Totals equal the arithmetic sum regardless of increment order
//! - Totals are independent of how increments are split across threads
//! - Reset always returns to zero

#![cfg(test)]

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use proptest::prelude::*;

use crate::core::StatsCounter;

#[derive(Debug, Clone, Copy)]
enum Delta {
    Sent(u32),
    Recv(u32),
}

fn arb_delta() -> impl Strategy<Value = Delta> {
    prop_oneof![any::<u32>().prop_map(Delta::Sent), any::<u32>().prop_map(Delta::Recv)]
}

fn apply(stats: &StatsCounter, delta: Delta) {
    match delta {
        Delta::Sent(n) => stats.add_sent(u64::from(n)),
        Delta::Recv(n) => stats.add_recv(u64::from(n)),
    };
}

fn sums(deltas: &[Delta]) -> (u64, u64) {
    deltas.iter().fold((0, 0), |(sent, recv), delta| match *delta {
        Delta::Sent(n) => (sent + u64::from(n), recv),
        Delta::Recv(n) => (sent, recv + u64::from(n)),
    })
}

proptest! {
    #[test]
    fn totals_are_order_independent(mut deltas in prop::collection::vec(arb_delta(), 0..200)) {
        let (sent, recv) = sums(&deltas);

        let forward = StatsCounter::new();
        forward.begin(Instant::now());
        for delta in &deltas {
            apply(&forward, *delta);
        }

        deltas.reverse();
        let backward = StatsCounter::new();
        backward.begin(Instant::now());
        for delta in &deltas {
            apply(&backward, *delta);
        }

        let a = forward.snapshot();
        let b = backward.snapshot();
        prop_assert_eq!((a.bytes_sent, a.bytes_recv), (sent, recv));
        prop_assert_eq!((b.bytes_sent, b.bytes_recv), (sent, recv));
    }

    #[test]
    fn totals_survive_concurrent_interleaving(
        chunks in prop::collection::vec(prop::collection::vec(arb_delta(), 0..50), 1..6)
    ) {
        let all: Vec<Delta> = chunks.iter().flatten().copied().collect();
        let (sent, recv) = sums(&all);

        let stats = Arc::new(StatsCounter::new());
        stats.begin(Instant::now());
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for delta in chunk {
                        apply(&stats, delta);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = stats.snapshot();
        prop_assert_eq!((snap.bytes_sent, snap.bytes_recv), (sent, recv));
    }

    #[test]
    fn reset_always_zeroes(deltas in prop::collection::vec(arb_delta(), 0..50), twice in any::<bool>()) {
        let stats = StatsCounter::new();
        stats.begin(Instant::now());
        for delta in &deltas {
            apply(&stats, *delta);
        }
        stats.reset();
        if twice {
            stats.reset();
        }
        let snap = stats.snapshot();
        prop_assert_eq!(snap.bytes_sent, 0);
        prop_assert_eq!(snap.bytes_recv, 0);
        prop_assert_eq!(snap.uptime_seconds, 0);
    }
}
