//! Block delivery between linked nodes

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use rota_common::Block;
use rota_module_block_producer::{ChainController, ChainError, ChainEvent};
use tracing::{debug, info, warn};

use crate::chain::TestChain;

pub type SharedController = Arc<Mutex<ChainController>>;

/// Lock a controller, taking it over if a previous holder panicked
pub(crate) fn lock(controller: &SharedController) -> MutexGuard<'_, ChainController> {
    controller.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn link_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[derive(Default)]
struct NetworkState {
    nodes: BTreeMap<String, SharedController>,

    /// Bidirectional links, smaller name first
    links: BTreeSet<(String, String)>,

    /// Blocks in flight from the first node to the second
    queues: BTreeMap<(String, String), VecDeque<Arc<Block>>>,
}

impl NetworkState {
    fn node(&self, name: &str) -> Result<SharedController, ChainError> {
        self.nodes.get(name).cloned().ok_or_else(|| ChainError::NotFound(format!("node {name}")))
    }

    fn peers_of(&self, name: &str) -> Vec<String> {
        self.links
            .iter()
            .filter_map(|(a, b)| {
                if a == name {
                    Some(b.clone())
                } else if b == name {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Bring two nodes to the same preferred chain
    fn sync_pair(&self, a: &str, b: &str) -> Result<(), ChainError> {
        if a == b {
            return Ok(());
        }
        let first = self.node(a)?;
        let second = self.node(b)?;
        let mut first = lock(&first);
        let mut second = lock(&second);
        first.sync_with(&mut second)
    }

    /// Queue every block a node applied since the last call for its peers
    fn collect_applied(&mut self) {
        let mut outgoing = Vec::new();
        for (name, controller) in &self.nodes {
            for event in lock(controller).take_events() {
                match event {
                    ChainEvent::BlockApplied(block) => outgoing.push((name.clone(), block)),
                    ChainEvent::ForkSwitched {
                        from,
                        to,
                        common_ancestor,
                    } => {
                        debug!(node = name, %from, %to, common_ancestor, "Node switched fork")
                    }
                    ChainEvent::Irreversible { .. } => {}
                }
            }
        }

        for (sender, block) in outgoing {
            for peer in self.peers_of(&sender) {
                self.queues.entry((sender.clone(), peer)).or_default().push_back(block.clone());
            }
        }
    }

    /// Hand the oldest block of every queue to its receiver.
    /// Returns false if nothing was in flight.
    fn deliver_round(&mut self) -> bool {
        let mut in_flight = Vec::new();
        for ((sender, receiver), queue) in self.queues.iter_mut() {
            if let Some(block) = queue.pop_front() {
                in_flight.push((sender.clone(), receiver.clone(), block));
            }
        }
        self.queues.retain(|_, queue| !queue.is_empty());
        if in_flight.is_empty() {
            return false;
        }

        for (sender, receiver, block) in in_flight {
            let Some(controller) = self.nodes.get(&receiver) else {
                continue;
            };
            let result = lock(controller).push_block((*block).clone());
            match result {
                Ok(()) => {}
                Err(ChainError::UnlinkableBlock { .. }) => {
                    debug!(
                        sender,
                        receiver,
                        number = block.number(),
                        "Unlinkable block, catching up"
                    );
                    if let Err(e) = self.sync_pair(&receiver, &sender) {
                        warn!(sender, receiver, "Catch-up failed: {e}");
                    }
                }
                Err(e) => {
                    warn!(sender, receiver, number = block.number(), "Block rejected: {e}")
                }
            }
        }
        true
    }

    fn run(&mut self) {
        loop {
            self.collect_applied();
            if !self.deliver_round() {
                break;
            }
        }
    }

    fn remove(&mut self, name: &str) {
        if self.nodes.remove(name).is_none() {
            return;
        }
        self.links.retain(|(a, b)| a != name && b != name);
        self.queues.retain(|(sender, receiver), _| sender != name && receiver != name);
        info!(node = name, "Node left network");
    }
}

/// Shared handle to a set of linked nodes
#[derive(Clone, Default)]
pub struct SimulatedNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add `chain`, link it to every member and catch both sides up.
    /// From now on blocks `chain` produces reach the network.
    pub fn join(&self, chain: &mut TestChain) -> Result<(), ChainError> {
        let name = chain.name().to_string();
        chain.attach(self.clone());

        let mut state = self.state();
        let controller = chain.controller();
        // Blocks applied while offline travel through the catch-up instead
        lock(&controller).take_events();

        let members: Vec<String> = state.nodes.keys().filter(|n| **n != name).cloned().collect();
        state.nodes.insert(name.clone(), controller);
        for member in &members {
            state.links.insert(link_key(&name, member));
        }
        info!(node = name, peers = members.len(), "Node joined network");

        for member in &members {
            state.sync_pair(&name, member)?;
        }
        state.run();
        Ok(())
    }

    /// Remove `chain` and all its links. Its blocks stay where they are.
    pub fn leave(&self, chain: &mut TestChain) {
        chain.detach();
        self.remove(chain.name());
    }

    pub(crate) fn remove(&self, name: &str) {
        self.state().remove(name);
    }

    /// Link two members and catch them up
    pub fn connect(&self, a: &str, b: &str) -> Result<(), ChainError> {
        let mut state = self.state();
        state.node(a)?;
        state.node(b)?;
        if a != b {
            state.links.insert(link_key(a, b));
        }
        state.sync_pair(a, b)?;
        state.run();
        Ok(())
    }

    /// Unlink two members, dropping anything still in flight between them
    pub fn disconnect(&self, a: &str, b: &str) {
        let mut state = self.state();
        state.links.remove(&link_key(a, b));
        state.queues.remove(&(a.to_string(), b.to_string()));
        state.queues.remove(&(b.to_string(), a.to_string()));
        debug!(a, b, "Nodes disconnected");
    }

    pub fn is_linked(&self, a: &str, b: &str) -> bool {
        self.state().links.contains(&link_key(a, b))
    }

    pub fn members(&self) -> Vec<String> {
        self.state().nodes.keys().cloned().collect()
    }

    /// Push `block` straight into `node`, then relay whatever it applied
    pub fn deliver(&self, node: &str, block: Block) -> Result<(), ChainError> {
        let mut state = self.state();
        let controller = state.node(node)?;
        let result = lock(&controller).push_block(block);
        state.run();
        result
    }

    /// Deliver queued blocks until nothing is in flight
    pub fn run(&self) {
        self.state().run();
    }
}
