//! End-to-end scenarios over `TxnProcessor`, one per protocol family.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use ccstore_core::{CcMode, Expect, Put, Rmw, Transaction, TxnStatus};
use ccstore_engine::{ProcessorConfig, TxnProcessor};

fn small_config() -> ProcessorConfig {
    ProcessorConfig {
        workers: 2,
        keyspace_size: 128,
        ..ProcessorConfig::default()
    }
}

fn rmw(readset: &[u64], writeset: &[u64]) -> Transaction {
    Transaction::new(
        0,
        readset.iter().copied().collect(),
        writeset.iter().copied().collect(),
        Rmw {
            readset: BTreeSet::new(),
            writeset: writeset.iter().copied().collect(),
        },
    )
}

/// Scenario 1: two concurrent RMWs against the same key serialize to 2, not
/// 1, under every protocol family.
#[test]
fn isolation_holds_under_concurrent_increments() {
    for mode in [
        CcMode::Serial,
        CcMode::LockingExclusiveOnly,
        CcMode::Locking,
        CcMode::Occ,
        CcMode::POcc,
        CcMode::Mvcc,
    ] {
        let processor = TxnProcessor::new(mode, small_config()).expect("processor should start");
        processor.new_txn_request(rmw(&[], &[5]));
        processor.new_txn_request(rmw(&[], &[5]));
        for _ in 0..2 {
            assert_eq!(processor.get_txn_result().status(), TxnStatus::Committed);
        }

        processor.new_txn_request(Transaction::new(
            0,
            [5].into_iter().collect(),
            BTreeSet::new(),
            Expect(BTreeMap::from([(5, 2)])),
        ));
        assert_eq!(processor.get_txn_result().status(), TxnStatus::Committed);
    }
}

/// Scenario 2: under 2PL-SX, a transaction whose access set is disjoint from
/// another's blocks behind it only on the keys they actually share.
#[test]
fn locking_queues_then_releases_a_blocked_writer() {
    let processor = TxnProcessor::new(CcMode::Locking, small_config()).expect("processor should start");
    processor.new_txn_request(rmw(&[], &[10]));
    processor.new_txn_request(rmw(&[10], &[11]));
    let a = processor.get_txn_result();
    let b = processor.get_txn_result();
    assert!(a.status() == TxnStatus::Committed);
    assert!(b.status() == TxnStatus::Committed);
}

/// Scenario 3: OCC validation restarts a transaction whose read was
/// invalidated by a concurrent writer, and it eventually commits.
#[test]
fn occ_restarts_on_validation_failure_and_commits() {
    let processor = TxnProcessor::new(CcMode::Occ, small_config()).expect("processor should start");
    for _ in 0..20 {
        processor.new_txn_request(rmw(&[], &[7]));
    }
    for _ in 0..20 {
        let txn = processor.get_txn_result();
        assert_eq!(txn.status(), TxnStatus::Committed);
    }
}

/// Scenario 4: a sequence of N RMW transactions against one key commits to
/// final value N, the round-trip law from the invariants section.
#[test]
fn sequential_rmws_accumulate_to_n() {
    let processor = TxnProcessor::new(CcMode::Serial, small_config()).expect("processor should start");
    const N: usize = 50;
    for _ in 0..N {
        processor.new_txn_request(rmw(&[], &[3]));
    }
    let mut last_write = 0i64;
    for _ in 0..N {
        let txn = processor.get_txn_result();
        assert_eq!(txn.status(), TxnStatus::Committed);
        if let Some(&v) = txn.writes().get(&3) {
            last_write = v;
        }
    }
    assert_eq!(last_write, N as i64);
}

/// `Put` followed by `Expect` on the same key commits in every protocol.
#[test]
fn put_then_expect_round_trips() {
    for mode in [CcMode::Serial, CcMode::Occ, CcMode::Mvcc] {
        let processor = TxnProcessor::new(mode, small_config()).expect("processor should start");
        processor.new_txn_request(Transaction::new(
            0,
            BTreeSet::new(),
            [20].into_iter().collect(),
            Put(BTreeMap::from([(20, 77)])),
        ));
        let put_result = processor.get_txn_result();
        assert_eq!(put_result.status(), TxnStatus::Committed);

        processor.new_txn_request(Transaction::new(
            0,
            [20].into_iter().collect(),
            BTreeSet::new(),
            Expect(BTreeMap::from([(20, 77)])),
        ));
        let expect_result = processor.get_txn_result();
        assert_eq!(expect_result.status(), TxnStatus::Committed);
    }
}

/// Scenario 5: Strife clusters a batch whose access sets chain together
/// (W3 bridges W1 and W2) into one conflict-free cluster.
#[test]
fn strife_clusters_bridged_writesets() {
    let config = ProcessorConfig {
        workers: 3,
        keyspace_size: 128,
        strife_k: 4,
        strife_alpha: 0.2,
        strife_batch_window: Duration::from_millis(20),
    };
    let processor = TxnProcessor::new(CcMode::Strife, config).expect("processor should start");
    processor.new_txn_request(rmw(&[], &[10, 20, 30, 40]));
    processor.new_txn_request(rmw(&[], &[60, 70, 80, 90]));
    processor.new_txn_request(rmw(&[], &[30, 40, 50, 60]));

    for _ in 0..3 {
        let txn = processor.get_txn_result();
        assert_eq!(txn.status(), TxnStatus::Committed);
    }
}

/// Scenario 6 (starvation bound, scaled down for test runtime): a larger
/// workload of RMWs over a small keyspace all eventually commit.
#[test]
fn every_transaction_in_a_busy_workload_eventually_commits() {
    let processor = TxnProcessor::new(CcMode::Occ, small_config()).expect("processor should start");
    const COUNT: usize = 200;
    for i in 0..COUNT {
        processor.new_txn_request(rmw(&[], &[(i % 16) as u64]));
    }
    for _ in 0..COUNT {
        let txn = processor.get_txn_result();
        assert_eq!(txn.status(), TxnStatus::Committed);
    }
}
