//! Rota block producer module for Caryatid
//! Runs the chain controller: produces blocks in the slots of the configured
//! local producers, applies blocks offered by peers and answers chain queries

pub mod apply;
pub mod controller;
pub mod error;
pub mod native_contract;
pub mod participation;
pub mod schedule;
pub mod state;

use std::sync::Arc;

use anyhow::Result;
use caryatid_sdk::{module, Context};
use config::Config;
use rota_common::{
    configuration::{get_bool_flag, get_string_flag, get_u64_flag},
    messages::{
        BlockMessage, ChainMessage, ChainQuery, ChainQueryResponse, HeadInfo, Message,
        StateQuery, StateQueryResponse, SyncRequestMessage,
    },
    time::{Clock, SystemClock},
    AccountName, ChainParams, GenesisState,
};
use rota_module_block_log::open_block_log;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub use controller::{ChainController, ChainEvent, ControllerStatus};
pub use error::ChainError;
pub use native_contract::{ContractEngine, NativeEngine, TransactionReceipt};

const DEFAULT_SUBSCRIBE_BLOCKS_TOPIC: (&str, &str) =
    ("subscribe-blocks-topic", "rota.block.available");
const DEFAULT_PUBLISH_BLOCKS_TOPIC: (&str, &str) = ("publish-blocks-topic", "rota.block.produced");
const DEFAULT_SYNC_TOPIC: (&str, &str) = ("sync-topic", "rota.sync.request");
const DEFAULT_CHAIN_QUERY_TOPIC: (&str, &str) = ("chain-query-topic", "rota.query.chain");
const DEFAULT_CHAIN_EVENTS_TOPIC: (&str, &str) = ("chain-events-topic", "rota.chain.events");
const DEFAULT_NODE_NAME: (&str, &str) = ("node-name", "rota");
const DEFAULT_ENABLE_STALE_PRODUCTION: (&str, bool) = ("enable-stale-production", false);
const DEFAULT_REQUIRED_PARTICIPATION: (&str, u64) = ("required-participation", 3_300);
const CONFIG_KEY_PRODUCERS: &str = "producers";

/// Block producer module
#[module(
    message_type(Message),
    name = "block-producer",
    description = "Round-robin block production and fork choice"
)]
pub struct BlockProducer;

#[derive(Debug, Clone)]
struct ProducerConfig {
    node_name: String,
    subscribe_blocks_topic: String,
    publish_blocks_topic: String,
    sync_topic: String,
    chain_query_topic: String,
    chain_events_topic: String,
    local_producers: Vec<AccountName>,
    enable_stale_production: bool,
    required_participation: u64,
}

impl ProducerConfig {
    fn from_config(config: &Config) -> Result<Self> {
        let local_producers = match config.get::<Vec<String>>(CONFIG_KEY_PRODUCERS) {
            Ok(names) => {
                names.iter().map(|n| AccountName::new(n)).collect::<Result<Vec<_>, _>>()?
            }
            Err(_) => Vec::new(),
        };

        Ok(Self {
            node_name: get_string_flag(config, DEFAULT_NODE_NAME),
            subscribe_blocks_topic: get_string_flag(config, DEFAULT_SUBSCRIBE_BLOCKS_TOPIC),
            publish_blocks_topic: get_string_flag(config, DEFAULT_PUBLISH_BLOCKS_TOPIC),
            sync_topic: get_string_flag(config, DEFAULT_SYNC_TOPIC),
            chain_query_topic: get_string_flag(config, DEFAULT_CHAIN_QUERY_TOPIC),
            chain_events_topic: get_string_flag(config, DEFAULT_CHAIN_EVENTS_TOPIC),
            local_producers,
            enable_stale_production: get_bool_flag(config, DEFAULT_ENABLE_STALE_PRODUCTION),
            required_participation: get_u64_flag(config, DEFAULT_REQUIRED_PARTICIPATION),
        })
    }
}

/// Answer one chain query from the controller
fn handle_query(controller: &ChainController, query: &ChainQuery) -> ChainQueryResponse {
    match query {
        ChainQuery::GetHead => ChainQueryResponse::Head(HeadInfo {
            number: controller.head_block_num(),
            id: controller.head_block_id(),
            timestamp: controller.head_block_time(),
            producer: controller.head_block_producer().cloned(),
            last_irreversible_block_num: controller.last_irreversible_block_num(),
        }),

        ChainQuery::GetBlockByNumber { number } => {
            match controller.fetch_block_by_number(*number) {
                Ok(Some(block)) => ChainQueryResponse::Block(block),
                Ok(None) => ChainQueryResponse::NotFound,
                Err(e) => ChainQueryResponse::Error(e.to_string()),
            }
        }

        ChainQuery::GetProducer { name } => match controller.get_producer(name) {
            Some(record) => ChainQueryResponse::Producer(record),
            None => ChainQueryResponse::NotFound,
        },

        ChainQuery::GetParticipationRate => {
            ChainQueryResponse::ParticipationRate(controller.producer_participation_rate())
        }

        ChainQuery::GetScheduledProducer { slot } => {
            match controller.get_scheduled_producer(*slot) {
                Some(producer) => ChainQueryResponse::ScheduledProducer(producer),
                None => ChainQueryResponse::NotFound,
            }
        }

        ChainQuery::GetSlotTime { slot } => {
            ChainQueryResponse::SlotTime(controller.get_slot_time(*slot))
        }

        ChainQuery::GetLiquidBalance { name } => match controller.get_liquid_balance(name) {
            Ok(balance) => ChainQueryResponse::LiquidBalance(balance),
            Err(ChainError::NotFound(_)) => ChainQueryResponse::NotFound,
            Err(e) => ChainQueryResponse::Error(e.to_string()),
        },
    }
}

impl BlockProducer {
    /// Publish fork switches and irreversibility; applied blocks are logged only
    async fn publish_events(
        context: &Arc<Context<Message>>,
        topic: &str,
        events: Vec<ChainEvent>,
    ) {
        for event in events {
            let message = match event {
                ChainEvent::BlockApplied(block) => {
                    debug!(number = block.number(), producer = %block.producer(), "Block applied");
                    continue;
                }
                ChainEvent::ForkSwitched {
                    from,
                    to,
                    common_ancestor,
                } => ChainMessage::ForkSwitched {
                    from,
                    to,
                    common_ancestor,
                },
                ChainEvent::Irreversible { number, id } => {
                    ChainMessage::Irreversible { number, id }
                }
            };
            context
                .message_bus
                .publish(topic, Arc::new(Message::Chain(message)))
                .await
                .unwrap_or_else(|e| error!("Failed to publish chain event: {e}"));
        }
    }

    /// Produce if the current slot belongs to one of our producers
    async fn try_produce(
        context: &Arc<Context<Message>>,
        controller: &Mutex<ChainController>,
        cfg: &ProducerConfig,
        production_enabled: &mut bool,
    ) {
        let now = SystemClock.now();
        let mut controller = controller.lock().await;

        if !*production_enabled {
            // Wait until caught up, unless told to build on a stale chain
            if cfg.enable_stale_production || controller.get_slot_time(1) >= now {
                info!("Chain is current, enabling production");
                *production_enabled = true;
            } else {
                return;
            }
        }

        let Some(slot) = controller.get_slot_at_time(now) else {
            return;
        };
        let Some(producer) = controller.get_scheduled_producer(slot) else {
            return;
        };
        if !cfg.local_producers.contains(&producer) {
            return;
        }

        let participation = controller.producer_participation_rate();
        if participation < cfg.required_participation && !cfg.enable_stale_production {
            warn!(
                participation,
                required = cfg.required_participation,
                "Not producing: participation too low"
            );
            return;
        }

        match controller.produce_block(slot - 1) {
            Ok(block) => {
                let events = controller.take_events();
                drop(controller);

                let message = ChainMessage::BlockProduced(BlockMessage {
                    source: cfg.node_name.clone(),
                    block,
                });
                context
                    .message_bus
                    .publish(&cfg.publish_blocks_topic, Arc::new(Message::Chain(message)))
                    .await
                    .unwrap_or_else(|e| error!("Failed to publish block: {e}"));
                Self::publish_events(context, &cfg.chain_events_topic, events).await;
            }
            Err(e) => error!(%producer, slot, "Block production failed: {e}"),
        }
    }

    /// Apply a block from a peer, asking for the gap if it does not link
    async fn handle_block(
        context: &Arc<Context<Message>>,
        controller: &Mutex<ChainController>,
        cfg: &ProducerConfig,
        message: &BlockMessage,
    ) {
        let mut controller = controller.lock().await;
        let number = message.block.number();
        let result = controller.push_block(message.block.clone());
        let events = controller.take_events();
        let lib = controller.last_irreversible_block_num();
        drop(controller);

        match result {
            Ok(()) => {}
            Err(ChainError::UnlinkableBlock { .. }) => {
                info!(number, source = message.source, "Unlinkable block, requesting catch-up");
                let request = ChainMessage::SyncRequest(SyncRequestMessage {
                    requester: cfg.node_name.clone(),
                    from: lib + 1,
                    to: number,
                    reply_topic: cfg.subscribe_blocks_topic.clone(),
                });
                context
                    .message_bus
                    .publish(&cfg.sync_topic, Arc::new(Message::Chain(request)))
                    .await
                    .unwrap_or_else(|e| error!("Failed to publish sync request: {e}"));
            }
            Err(e) => warn!(number, source = message.source, "Rejected block: {e}"),
        }

        Self::publish_events(context, &cfg.chain_events_topic, events).await;
    }

    /// Send a peer the blocks it asked for, on the topic it reads blocks from
    async fn serve_sync(
        context: &Arc<Context<Message>>,
        controller: &Mutex<ChainController>,
        cfg: &ProducerConfig,
        request: &SyncRequestMessage,
    ) {
        let blocks = {
            let controller = controller.lock().await;
            let mut blocks = Vec::new();
            for number in request.from..=request.to.min(controller.head_block_num()) {
                match controller.fetch_block_by_number(number) {
                    Ok(Some(block)) => blocks.push(block),
                    Ok(None) => break,
                    Err(e) => {
                        error!(number, "Cannot serve block: {e}");
                        break;
                    }
                }
            }
            blocks
        };

        debug!(
            requester = request.requester,
            topic = request.reply_topic,
            count = blocks.len(),
            "Serving sync request"
        );
        for block in blocks {
            let message = ChainMessage::BlockAvailable(BlockMessage {
                source: cfg.node_name.clone(),
                block,
            });
            context
                .message_bus
                .publish(&request.reply_topic, Arc::new(Message::Chain(message)))
                .await
                .unwrap_or_else(|e| error!("Failed to publish block: {e}"));
        }
    }

    /// Main init function
    pub async fn init(&self, context: Arc<Context<Message>>, config: Arc<Config>) -> Result<()> {
        let cfg = ProducerConfig::from_config(&config)?;
        info!("Node '{}'", cfg.node_name);
        info!("Creating blocks subscriber on '{}'", cfg.subscribe_blocks_topic);
        info!("Publishing blocks on '{}'", cfg.publish_blocks_topic);
        info!("Sync requests on '{}'", cfg.sync_topic);
        info!("Creating chain query handler on '{}'", cfg.chain_query_topic);
        for producer in &cfg.local_producers {
            info!("Local producer: {producer}");
        }

        let params = ChainParams::from_config(&config);
        let genesis = GenesisState::from_config(&config, params.block_interval_seconds)?;
        let log = open_block_log(config.clone())?;
        let controller = ChainController::open(
            params,
            genesis,
            Box::new(NativeEngine),
            Arc::new(SystemClock),
            log,
        )?;
        info!(
            head = controller.head_block_num(),
            lib = controller.last_irreversible_block_num(),
            "Chain opened"
        );
        let controller = Arc::new(Mutex::new(controller));

        // Query handler
        let query_controller = controller.clone();
        context.handle(&cfg.chain_query_topic, move |message| {
            let controller = query_controller.clone();
            async move {
                let Message::StateQuery(StateQuery::Chain(query)) = message.as_ref() else {
                    return Arc::new(Message::StateQueryResponse(StateQueryResponse::Chain(
                        ChainQueryResponse::Error("Invalid message for block-producer".into()),
                    )));
                };
                let response = handle_query(&*controller.lock().await, query);
                Arc::new(Message::StateQueryResponse(StateQueryResponse::Chain(response)))
            }
        });

        // Inbound blocks
        let mut block_subscription = context.subscribe(&cfg.subscribe_blocks_topic).await?;
        let block_context = context.clone();
        let block_controller = controller.clone();
        let block_cfg = cfg.clone();
        context.run(async move {
            loop {
                let Ok((_, message)) = block_subscription.read().await else {
                    error!("Block message read failed");
                    return;
                };
                // Relayed blocks and catch-up replies arrive on the same topic
                if let Message::Chain(
                    ChainMessage::BlockAvailable(block_message)
                    | ChainMessage::BlockProduced(block_message),
                ) = message.as_ref()
                {
                    if block_message.source == block_cfg.node_name {
                        continue;
                    }
                    let span = info_span!("block_producer.block", number = block_message.block.number());
                    Self::handle_block(&block_context, &block_controller, &block_cfg, block_message)
                        .instrument(span)
                        .await;
                }
            }
        });

        // Catch-up requests from peers
        let mut sync_subscription = context.subscribe(&cfg.sync_topic).await?;
        let sync_context = context.clone();
        let sync_controller = controller.clone();
        let sync_cfg = cfg.clone();
        context.run(async move {
            loop {
                let Ok((_, message)) = sync_subscription.read().await else {
                    error!("Sync message read failed");
                    return;
                };
                if let Message::Chain(ChainMessage::SyncRequest(request)) = message.as_ref() {
                    if request.requester == sync_cfg.node_name {
                        continue;
                    }
                    let span = info_span!("block_producer.sync", from = request.from, to = request.to);
                    Self::serve_sync(&sync_context, &sync_controller, &sync_cfg, request)
                        .instrument(span)
                        .await;
                }
            }
        });

        // Production on clock ticks
        let mut tick_subscription = context.subscribe("clock.tick").await?;
        let tick_context = context.clone();
        context.run(async move {
            let mut production_enabled = false;
            loop {
                let Ok((_, message)) = tick_subscription.read().await else {
                    return;
                };
                if let Message::Clock(message) = message.as_ref() {
                    if cfg.local_producers.is_empty() {
                        continue;
                    }
                    let span = info_span!("block_producer.tick", number = message.number);
                    Self::try_produce(&tick_context, &controller, &cfg, &mut production_enabled)
                        .instrument(span)
                        .await;
                }
            }
        });

        Ok(())
    }
}
