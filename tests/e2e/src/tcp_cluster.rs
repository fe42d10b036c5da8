//! E2E Test: Proposal rounds over loopback TCP
//!
//! Runs the whole stack per node: listener, connection workers, peer
//! registry, inbound dispatcher and coordinator. Verifies:
//! - a 3-node full mesh connects and agrees on a block
//! - losing a peer shrinks the quorum and rounds keep succeeding

use {
    ledger_consensus_proposal::{BlockStore, Miner},
    ledger_e2e_tests::helpers::*,
    std::time::Duration,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn wait_for_full_mesh(nodes: &[TcpNode]) {
    let peers = nodes.len().saturating_sub(1);
    for node in nodes {
        assert!(
            wait_for(CONNECT_TIMEOUT, || node.registry.connected_peer_count() == peers),
            "node {} connected to {} of {peers} peers",
            node.id,
            node.registry.connected_peer_count()
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: 3 nodes agree on a block over TCP
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_three_node_tcp_round() {
    init_logging();
    let nodes = tcp_cluster(3);
    wait_for_full_mesh(&nodes);

    let block = candidate_block(nodes[0].id, 1);
    let outcome = nodes[0].coordinator.run(block.clone()).unwrap();
    assert!(outcome.is_accepted(), "{outcome}");
    assert!(nodes[0].store.has_block(&block.hash));

    for node in &nodes[1..] {
        assert!(
            wait_for(CONNECT_TIMEOUT, || node.miner.resume_count() == 1),
            "node {} never resumed",
            node.id
        );
        assert!(!node.miner.has_active_proposal());
        assert!(wait_for(CONNECT_TIMEOUT, || node.store.has_block(&block.hash)));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: a peer leaves, the survivors keep agreeing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_round_after_peer_loss() {
    init_logging();
    let mut nodes = tcp_cluster(3);
    wait_for_full_mesh(&nodes);

    nodes[2].shutdown();
    let lost = nodes[2].id;
    assert!(
        wait_for(CONNECT_TIMEOUT, || {
            !nodes[0].registry.is_connected_to(&lost)
                && nodes[0].registry.connected_peer_count() == 1
        }),
        "node 0 still holds a session to the stopped peer"
    );

    let outcome = nodes[0]
        .coordinator
        .run(candidate_block(nodes[0].id, 1))
        .unwrap();
    assert!(outcome.is_accepted(), "{outcome}");
    assert!(wait_for(CONNECT_TIMEOUT, || nodes[1].miner.resume_count() == 1));
}
