//! Nodes restarting against their on-disk block log

use rota_common::{time::ManualClock, AccountName, ChainParams, GenesisState, PERCENT_100};
use rota_simulation::{SimulatedNetwork, TestChain};
use tempfile::TempDir;

/// Blocks between head and last irreversible block on a healthy chain
fn lag() -> u64 {
    let params = ChainParams::default();
    let round = params.blocks_per_round(GenesisState::default().producers.len());
    round * params.irreversible_threshold_percent / PERCENT_100
}

fn clock() -> ManualClock {
    ManualClock::new(GenesisState::default().initial_timestamp)
}

#[test]
fn restart_rewinds_to_last_irreversible_block() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    {
        let chain = TestChain::on_disk("chain", dir.path(), &clock).unwrap();
        chain.produce_blocks(20, 0).unwrap();
        assert_eq!(chain.head_block_num(), 20);
        assert_eq!(chain.last_irreversible_block_num(), 20 - lag());
    }

    let chain = TestChain::on_disk("chain", dir.path(), &clock).unwrap();
    assert_eq!(chain.head_block_num(), 20 - lag());
    chain.produce_blocks(5, 0).unwrap();
    assert_eq!(chain.head_block_num(), 25 - lag());
}

#[test]
fn sleepy_node_catches_up_after_restart() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let mut producer = TestChain::in_memory("producer", &clock).unwrap();
    let net = SimulatedNetwork::new();
    net.join(&mut producer).unwrap();

    producer.produce_blocks(20, 0).unwrap();
    {
        let mut sleepy = TestChain::on_disk("sleepy", dir.path(), &clock).unwrap();
        net.join(&mut sleepy).unwrap();
        assert_eq!(producer.head_block_num(), 20);
        assert_eq!(sleepy.head_block_num(), 20);
        net.leave(&mut sleepy);
    }

    producer.produce_blocks(5, 0).unwrap();
    assert_eq!(producer.head_block_num(), 25);

    let mut sleepy = TestChain::on_disk("sleepy", dir.path(), &clock).unwrap();
    assert_eq!(sleepy.head_block_num(), 20 - lag());

    net.join(&mut sleepy).unwrap();
    assert_eq!(sleepy.head_block_num(), 25);
    assert_eq!(sleepy.head_block_id(), producer.head_block_id());
}

#[test]
fn reindex_replays_a_long_log() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    {
        let chain = TestChain::on_disk("chain", dir.path(), &clock).unwrap();
        chain.produce_blocks(100, 0).unwrap();
        assert_eq!(chain.last_irreversible_block_num(), 100 - lag());
    }

    let chain = TestChain::on_disk("chain", dir.path(), &clock).unwrap();
    assert_eq!(chain.head_block_num(), 100 - lag());
    chain.produce_blocks(20, 0).unwrap();
    assert_eq!(chain.head_block_num(), 120 - lag());
}

#[test]
fn replay_rebuilds_the_same_state() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let inita = AccountName::new("inita").unwrap();
    let initb = AccountName::new("initb").unwrap();
    let newguy = AccountName::new("newguy").unwrap();

    let (lib, lib_id) = {
        let chain = TestChain::on_disk("chain", dir.path(), &clock).unwrap();
        chain.create_account(&inita, &newguy).unwrap();
        chain.transfer(&inita, &initb, 500).unwrap();
        chain.produce_blocks(5, 0).unwrap();
        chain.produce_blocks(3, 2).unwrap();
        chain.produce_blocks(30, 0).unwrap();

        let lib = chain.last_irreversible_block_num();
        let block = chain.fetch_block_by_number(lib).unwrap().unwrap();
        (lib, block.id())
    };
    assert!(lib > 8);

    let chain = TestChain::on_disk("chain", dir.path(), &clock).unwrap();
    assert_eq!(chain.head_block_num(), lib);
    assert_eq!(chain.head_block_id(), lib_id);
    assert_eq!(chain.get_liquid_balance(&inita).unwrap(), 100_000 - 600);
    assert_eq!(chain.get_liquid_balance(&initb).unwrap(), 100_500);
    assert_eq!(chain.get_staked_balance(&newguy).unwrap(), 100);
    let missed: u64 = ["initg", "inith", "initj", "initk", "initm", "initn"]
        .iter()
        .map(|n| chain.get_producer(&AccountName::new(n).unwrap()).unwrap().total_missed)
        .sum();
    assert_eq!(missed, 6);

    // A node fed the same blocks by a peer ends in the same state
    let replayed = chain.lock().head_state().globals.recent_slots_filled;
    let fresh = TestChain::in_memory("fresh", &clock).unwrap();
    for number in 1..=lib {
        let block = chain.fetch_block_by_number(number).unwrap().unwrap();
        fresh.lock().push_block(block).unwrap();
    }
    assert_eq!(fresh.head_block_id(), lib_id);
    assert_eq!(fresh.lock().head_state().globals.recent_slots_filled, replayed);
    assert_eq!(fresh.get_liquid_balance(&inita).unwrap(), 100_000 - 600);
}
