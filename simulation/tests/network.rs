//! Nodes exchanging blocks over the simulated network

use rota_common::{time::ManualClock, GenesisState};
use rota_module_block_producer::ChainError;
use rota_simulation::{SimulatedNetwork, TestChain};

fn clock() -> ManualClock {
    ManualClock::new(GenesisState::default().initial_timestamp)
}

#[test]
fn unconnected_nodes_do_not_sync() {
    let clock = clock();
    let chain1 = TestChain::in_memory("chain1", &clock).unwrap();
    let chain2 = TestChain::in_memory("chain2", &clock).unwrap();

    chain1.produce_blocks(1, 0).unwrap();
    assert_eq!(chain1.head_block_num(), 1);
    assert_eq!(chain2.head_block_num(), 0);

    chain2.produce_blocks(5, 0).unwrap();
    assert_eq!(chain1.head_block_num(), 1);
    assert_eq!(chain2.head_block_num(), 5);
}

#[test]
fn connected_nodes_share_blocks() {
    let clock = clock();
    let mut chain1 = TestChain::in_memory("chain1", &clock).unwrap();
    let mut chain2 = TestChain::in_memory("chain2", &clock).unwrap();
    let net = SimulatedNetwork::new();
    net.join(&mut chain1).unwrap();
    net.join(&mut chain2).unwrap();

    chain1.produce_blocks(1, 0).unwrap();
    assert_eq!(chain1.head_block_num(), 1);
    assert_eq!(chain2.head_block_num(), 1);
    assert_eq!(chain1.head_block_id(), chain2.head_block_id());

    chain2.produce_blocks(5, 0).unwrap();
    assert_eq!(chain1.head_block_num(), 6);
    assert_eq!(chain2.head_block_num(), 6);
    assert_eq!(chain1.head_block_id(), chain2.head_block_id());
}

#[test]
fn forked_nodes_converge_on_reconnect() {
    let clock = clock();
    let mut chain1 = TestChain::in_memory("chain1", &clock).unwrap();
    let mut chain2 = TestChain::in_memory("chain2", &clock).unwrap();
    let net = SimulatedNetwork::new();

    chain1.produce_blocks(1, 0).unwrap();
    assert_eq!(chain1.head_block_num(), 1);
    assert_eq!(chain2.head_block_num(), 0);
    assert_ne!(chain1.head_block_id(), chain2.head_block_id());

    net.join(&mut chain1).unwrap();
    net.join(&mut chain2).unwrap();
    assert_eq!(chain2.head_block_num(), 1);
    assert_eq!(chain1.head_block_id(), chain2.head_block_id());

    chain2.produce_blocks(5, 0).unwrap();
    assert_eq!(chain1.head_block_num(), 6);
    assert_eq!(chain2.head_block_num(), 6);
    assert_eq!(chain1.head_block_id(), chain2.head_block_id());

    net.leave(&mut chain1);
    chain1.produce_blocks(1, 1).unwrap();
    chain2.produce_blocks(1, 0).unwrap();
    assert_eq!(chain1.head_block_num(), 7);
    assert_eq!(chain2.head_block_num(), 7);
    assert_ne!(chain1.head_block_id(), chain2.head_block_id());

    chain2.produce_blocks(1, 1).unwrap();
    net.join(&mut chain1).unwrap();
    assert_eq!(chain1.head_block_num(), 8);
    assert_eq!(chain2.head_block_num(), 8);
    assert_eq!(chain1.head_block_id(), chain2.head_block_id());
}

#[test]
fn wiped_node_resyncs_with_running_network() {
    let clock = clock();
    let mut chain1 = TestChain::in_memory("chain1", &clock).unwrap();
    let mut chain2 = TestChain::in_memory("chain2", &clock).unwrap();
    let net = SimulatedNetwork::new();
    net.join(&mut chain1).unwrap();
    net.join(&mut chain2).unwrap();

    {
        let mut chain3 = TestChain::in_memory("chain3", &clock).unwrap();
        net.join(&mut chain3).unwrap();

        chain1.produce_blocks(3, 0).unwrap();
        chain2.produce_blocks(3, 0).unwrap();
        assert_eq!(chain1.head_block_num(), 6);
        assert_eq!(chain2.head_block_num(), 6);
        assert_eq!(chain3.head_block_num(), 6);
        assert_eq!(chain1.head_block_id(), chain2.head_block_id());
        assert_eq!(chain1.head_block_id(), chain3.head_block_id());

        net.leave(&mut chain3);
    }

    let mut chain3 = TestChain::in_memory("chain3", &clock).unwrap();
    assert_eq!(chain3.head_block_num(), 0);

    net.join(&mut chain3).unwrap();
    assert_eq!(chain3.head_block_num(), 6);

    chain1.produce_blocks(3, 0).unwrap();
    chain2.produce_blocks(3, 0).unwrap();
    assert_eq!(chain1.head_block_num(), 12);
    assert_eq!(chain2.head_block_num(), 12);
    assert_eq!(chain3.head_block_num(), 12);
    assert_eq!(chain1.head_block_id(), chain2.head_block_id());
    assert_eq!(chain1.head_block_id(), chain3.head_block_id());
}

#[test]
fn blocks_are_relayed_across_intermediate_nodes() {
    let clock = clock();
    let mut chains: Vec<TestChain> = ["a", "b", "c"]
        .into_iter()
        .map(|name| TestChain::in_memory(name, &clock).unwrap())
        .collect();
    let net = SimulatedNetwork::new();
    for chain in chains.iter_mut() {
        net.join(chain).unwrap();
    }
    net.disconnect("a", "c");
    assert!(!net.is_linked("a", "c"));
    assert!(net.is_linked("a", "b"));

    chains[0].produce_blocks(4, 0).unwrap();
    let head = chains[0].head_block_id();
    for chain in &chains {
        assert_eq!(chain.head_block_num(), 4);
        assert_eq!(chain.head_block_id(), head);
    }
}

#[test]
fn dropped_node_leaves_the_network() {
    let clock = clock();
    let mut chain1 = TestChain::in_memory("chain1", &clock).unwrap();
    let net = SimulatedNetwork::new();
    net.join(&mut chain1).unwrap();
    {
        let mut chain2 = TestChain::in_memory("chain2", &clock).unwrap();
        net.join(&mut chain2).unwrap();
        assert_eq!(net.members(), vec!["chain1".to_string(), "chain2".to_string()]);
    }
    assert_eq!(net.members(), vec!["chain1".to_string()]);
    chain1.produce_blocks(2, 0).unwrap();
    assert_eq!(chain1.head_block_num(), 2);
}

#[test]
fn unlinkable_delivery_is_rejected_until_catch_up() {
    let clock = clock();
    let mut chain1 = TestChain::in_memory("chain1", &clock).unwrap();
    let mut chain2 = TestChain::in_memory("chain2", &clock).unwrap();
    let net = SimulatedNetwork::new();
    net.join(&mut chain1).unwrap();
    net.join(&mut chain2).unwrap();
    net.disconnect("chain1", "chain2");

    chain1.produce_blocks(3, 0).unwrap();
    assert_eq!(chain2.head_block_num(), 0);

    let third = chain1.fetch_block_by_number(3).unwrap().unwrap();
    assert!(matches!(
        net.deliver("chain2", third.clone()),
        Err(ChainError::UnlinkableBlock { .. })
    ));
    assert_eq!(chain2.head_block_num(), 0);
    assert!(!chain2.is_known_block(&third.id()));

    net.connect("chain1", "chain2").unwrap();
    assert_eq!(chain2.head_block_num(), 3);
    assert_eq!(chain2.head_block_id(), third.id());
}

#[test]
fn block_from_wrong_producer_is_not_relayed() {
    let clock = clock();
    let mut chain1 = TestChain::in_memory("chain1", &clock).unwrap();
    let mut chain2 = TestChain::in_memory("chain2", &clock).unwrap();
    let net = SimulatedNetwork::new();
    net.join(&mut chain1).unwrap();
    net.join(&mut chain2).unwrap();
    net.disconnect("chain1", "chain2");

    chain1.produce_blocks(1, 0).unwrap();
    let mut forged = chain1.fetch_block_by_number(1).unwrap().unwrap();
    forged.header.producer = rota_common::AccountName::new("initu").unwrap();

    assert!(matches!(
        net.deliver("chain2", forged),
        Err(ChainError::WrongProducer { number: 1, .. })
    ));
    assert_eq!(chain2.head_block_num(), 0);

    net.connect("chain1", "chain2").unwrap();
    assert_eq!(chain2.head_block_id(), chain1.head_block_id());
}

#[test]
fn unknown_node_cannot_be_connected() {
    let net = SimulatedNetwork::new();
    assert!(matches!(net.connect("ghost", "spirit"), Err(ChainError::NotFound(_))));
}
