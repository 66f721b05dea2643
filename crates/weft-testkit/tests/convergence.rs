//! Replicas converge regardless of who wrote what.

use proptest::prelude::*;

use weft::sync::{compare_knowledge, ConvergenceResult};
use weft_testkit::{sync_pair, Space, TestPeer, WriteSchedule};

async fn run_schedule(schedule: &WriteSchedule) -> anyhow::Result<Vec<TestPeer>> {
    let mut space = Space::new(0x30);
    let mut peers = Vec::with_capacity(schedule.peers);
    for n in 0..schedule.peers {
        peers.push(space.writer(n as u8 + 1).await?);
    }

    for write in &schedule.writes {
        peers[write.peer]
            .engine
            .propose_mutation(write.ops.clone())
            .await?;
    }

    // A chain there and back spreads every log to every peer.
    for i in 1..peers.len() {
        sync_pair(&peers[i - 1], &peers[i]).await?;
    }
    for i in (1..peers.len()).rev() {
        sync_pair(&peers[i - 1], &peers[i]).await?;
    }
    for peer in &peers {
        peer.settle().await?;
    }
    Ok(peers)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn test_replicas_converge(schedule: WriteSchedule) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();

        let peers = runtime.block_on(run_schedule(&schedule)).unwrap();
        let first = &peers[0];
        let state = first.engine.state();
        let knowledge = runtime.block_on(first.knowledge());
        let digest = runtime.block_on(first.engine.digest()).unwrap();

        prop_assert_eq!(knowledge.total_entries(), schedule.writes.len() as u64);
        for peer in &peers[1..] {
            prop_assert_eq!(&*peer.engine.state(), &*state);
            prop_assert_eq!(runtime.block_on(peer.engine.digest()).unwrap(), digest);

            let theirs = runtime.block_on(peer.knowledge());
            prop_assert!(matches!(
                compare_knowledge(&knowledge, &theirs),
                ConvergenceResult::Converged
            ));
        }

        for peer in &peers {
            runtime.block_on(peer.engine.close()).unwrap();
        }
    }
}
