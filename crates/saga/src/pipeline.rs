//! In-process wiring of the order handler, the reactor and the collaborators.
//!
//! ```text
//!            submit                       publish
//!   caller ──────────► command stage ──────────────► FanOutPublisher
//!                          ▲                          │            │
//!                          │ commands     outcomes    ▼  requests  ▼
//!                          └──────────── reactor ◄── collaborators
//! ```
//!
//! The command queue is unbounded so the reactor never waits on the command
//! stage; every event queue is bounded by [`PipelineConfig::channel_capacity`].
//! An outbox relay re-publishes committed events whose first publish failed,
//! including ones left over from an earlier run over the same store.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use domain::{
    Command, CommandSender, DomainError, EventPublisher, IntegrationEvent, Notifier, Order,
    OrderCommand, OrderCommandHandler, OrderRepository, OrderStatus, PublishError,
    RecordingPublisher,
};
use event_store::EventStore;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::collaborators::CollaboratorStage;
use crate::reactor::OrderEventReactor;
use crate::services::{InventoryService, PaymentService};

const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Tuning knobs for [`FulfillmentPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity of each subscriber's event queue.
    pub channel_capacity: usize,
    /// How many times a command that lost a concurrency race is re-run.
    pub max_command_retries: u32,
    /// Pause between outbox relay passes.
    pub outbox_poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            max_command_retries: 3,
            outbox_poll_interval: Duration::from_millis(100),
        }
    }
}

struct Subscriber {
    accepts: fn(&IntegrationEvent) -> bool,
    sender: mpsc::Sender<IntegrationEvent>,
}

/// Publisher delivering each event to every subscriber whose filter accepts it.
///
/// Keeps a log of everything delivered. After [`close`](Self::close) every
/// publish fails with [`PublishError::ChannelClosed`].
#[derive(Clone)]
pub struct FanOutPublisher {
    subscribers: Arc<RwLock<Option<Vec<Subscriber>>>>,
    log: RecordingPublisher,
}

impl FanOutPublisher {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Some(Vec::new()))),
            log: RecordingPublisher::new(),
        }
    }

    /// Registers a subscriber and returns its queue.
    pub fn subscribe(
        &self,
        capacity: usize,
        accepts: fn(&IntegrationEvent) -> bool,
    ) -> mpsc::Receiver<IntegrationEvent> {
        let (sender, receiver) = mpsc::channel(capacity);
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(subscribers) = subscribers.as_mut() {
            subscribers.push(Subscriber { accepts, sender });
        }
        receiver
    }

    /// Drops every subscriber queue. Subscribers finish what is already queued.
    pub fn close(&self) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Everything delivered so far, in order.
    pub fn published(&self) -> Vec<IntegrationEvent> {
        self.log.events()
    }
}

#[async_trait]
impl EventPublisher for FanOutPublisher {
    async fn publish(&self, event: IntegrationEvent) -> Result<(), PublishError> {
        let targets: Vec<mpsc::Sender<IntegrationEvent>> = {
            let subscribers = self
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let Some(subscribers) = subscribers.as_ref() else {
                return Err(PublishError::ChannelClosed);
            };
            subscribers
                .iter()
                .filter(|s| (s.accepts)(&event))
                .map(|s| s.sender.clone())
                .collect()
        };

        for target in targets {
            target
                .send(event.clone())
                .await
                .map_err(|_| PublishError::ChannelClosed)?;
        }
        self.log.publish(event).await
    }
}

impl Default for FanOutPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends commands into the pipeline's command queue.
#[derive(Clone)]
pub struct ChannelCommandSender {
    sender: mpsc::UnboundedSender<OrderCommand>,
}

#[async_trait]
impl CommandSender for ChannelCommandSender {
    async fn send(&self, command: OrderCommand) -> Result<(), PublishError> {
        self.sender
            .send(command)
            .map_err(|_| PublishError::ChannelClosed)
    }
}

fn is_outcome(event: &IntegrationEvent) -> bool {
    OrderEventReactor::react(event).is_some()
}

fn is_collaborator_request(event: &IntegrationEvent) -> bool {
    matches!(
        event,
        IntegrationEvent::StockReservationRequested { .. }
            | IntegrationEvent::OrderStarted { .. }
            | IntegrationEvent::StockReversalRequested { .. }
    )
}

/// Runs a command, re-running it while it loses concurrency races.
pub async fn handle_with_retry<S: EventStore>(
    handler: &OrderCommandHandler<S>,
    command: OrderCommand,
    max_retries: u32,
) -> Result<bool, DomainError> {
    let mut attempt = 0;
    loop {
        match handler.handle(command.clone()).await {
            Err(e) if e.is_conflict() && attempt < max_retries => {
                attempt += 1;
                metrics::counter!("saga_command_retries_total", "command" => command.name())
                    .increment(1);
                tracing::warn!(command = command.name(), attempt, "concurrency conflict, retrying");
            }
            result => return result,
        }
    }
}

/// The whole order workflow running on tokio tasks.
pub struct FulfillmentPipeline<S: EventStore> {
    config: PipelineConfig,
    handler: Arc<OrderCommandHandler<S>>,
    publisher: FanOutPublisher,
    commands: Option<ChannelCommandSender>,
    stop_relay: watch::Sender<bool>,
    relay: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: EventStore + 'static> FulfillmentPipeline<S> {
    /// Spawns the command, reactor and collaborator stages and the outbox
    /// relay.
    pub fn start<I, P>(
        config: PipelineConfig,
        repository: OrderRepository<S>,
        notifier: Arc<dyn Notifier>,
        inventory: I,
        payment: P,
    ) -> Self
    where
        I: InventoryService + 'static,
        P: PaymentService + 'static,
    {
        let publisher = FanOutPublisher::new();
        let outcomes = publisher.subscribe(config.channel_capacity, is_outcome);
        let requests = publisher.subscribe(config.channel_capacity, is_collaborator_request);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let commands = ChannelCommandSender { sender: command_tx };

        let handler = Arc::new(OrderCommandHandler::new(
            repository,
            Arc::new(publisher.clone()),
            notifier,
        ));

        let reactor = OrderEventReactor::new(Arc::new(commands.clone()));
        let collaborators =
            CollaboratorStage::new(inventory, payment, Arc::new(publisher.clone()));

        let tasks = vec![
            tokio::spawn(run_commands(
                handler.clone(),
                command_rx,
                config.max_command_retries,
            )),
            tokio::spawn(run_reactor(reactor, outcomes)),
            tokio::spawn(run_collaborators(collaborators, requests)),
        ];
        let (stop_relay, stop) = watch::channel(false);
        let relay = tokio::spawn(run_outbox_relay(
            handler.clone(),
            config.outbox_poll_interval,
            stop,
        ));

        tracing::info!(
            channel_capacity = config.channel_capacity,
            max_command_retries = config.max_command_retries,
            outbox_poll_interval_ms = config.outbox_poll_interval.as_millis() as u64,
            "fulfillment pipeline started"
        );

        Self {
            config,
            handler,
            publisher,
            commands: Some(commands),
            stop_relay,
            relay: Some(relay),
            tasks,
        }
    }

    pub fn handler(&self) -> &OrderCommandHandler<S> {
        &self.handler
    }

    /// Every integration event delivered so far.
    pub fn published(&self) -> Vec<IntegrationEvent> {
        self.publisher.published()
    }

    /// Runs a command now and returns whether it was accepted.
    pub async fn execute(&self, command: OrderCommand) -> Result<bool, DomainError> {
        handle_with_retry(&self.handler, command, self.config.max_command_retries).await
    }

    /// Queues a command for the command stage.
    pub async fn submit(&self, command: OrderCommand) -> Result<(), PublishError> {
        match &self.commands {
            Some(commands) => commands.send(command).await,
            None => Err(PublishError::ChannelClosed),
        }
    }

    /// Injects an external event as if a collaborator had published it.
    pub async fn publish(&self, event: IntegrationEvent) -> Result<(), PublishError> {
        self.publisher.publish(event).await
    }

    /// Polls the store until the order reaches one of `statuses` or `timeout`
    /// elapses. Returns the order as last seen.
    pub async fn wait_for_status(
        &self,
        order_id: AggregateId,
        statuses: &[OrderStatus],
        timeout: Duration,
    ) -> Result<Option<Order>, DomainError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let order = self.handler.repository().find_by_id(order_id).await?;
            let settled = order
                .as_ref()
                .is_some_and(|o| statuses.contains(&o.status()));
            if settled || tokio::time::Instant::now() >= deadline {
                return Ok(order);
            }
            tokio::time::sleep(SETTLE_POLL_INTERVAL).await;
        }
    }

    /// Stops accepting work and waits for every stage to drain.
    ///
    /// Events produced while draining fail to publish and stay in the
    /// store's outbox for the next pipeline over the same store.
    pub async fn shutdown(mut self) {
        let _ = self.stop_relay.send(true);
        if let Some(relay) = self.relay.take()
            && let Err(e) = relay.await
        {
            tracing::error!(error = %e, "outbox relay panicked");
        }

        self.publisher.close();
        self.commands.take();

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "pipeline stage panicked");
            }
        }
        tracing::info!("fulfillment pipeline stopped");
    }
}

async fn run_commands<S: EventStore>(
    handler: Arc<OrderCommandHandler<S>>,
    mut commands: mpsc::UnboundedReceiver<OrderCommand>,
    max_retries: u32,
) {
    while let Some(command) = commands.recv().await {
        let name = command.name();
        match handle_with_retry(&handler, command, max_retries).await {
            Ok(true) => {}
            Ok(false) => tracing::info!(command = name, "queued command refused"),
            Err(e) => tracing::error!(command = name, error = %e, "queued command failed"),
        }
    }
    tracing::debug!("command stage stopped");
}

async fn run_outbox_relay<S: EventStore>(
    handler: Arc<OrderCommandHandler<S>>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match handler.dispatch_pending().await {
                    Ok(0) => {}
                    Ok(delivered) => tracing::info!(delivered, "outbox relay delivered events"),
                    Err(e) => tracing::error!(error = %e, "outbox relay pass failed"),
                }
            }
            _ = stop.changed() => break,
        }
    }
    tracing::debug!("outbox relay stopped");
}

async fn run_reactor(reactor: OrderEventReactor, mut events: mpsc::Receiver<IntegrationEvent>) {
    while let Some(event) = events.recv().await {
        if let Err(e) = reactor.handle(&event).await {
            tracing::error!(event = event.name(), error = %e, "reaction failed");
        }
    }
    tracing::debug!("reactor stage stopped");
}

async fn run_collaborators<I, P>(
    mut stage: CollaboratorStage<I, P>,
    mut events: mpsc::Receiver<IntegrationEvent>,
) where
    I: InventoryService,
    P: PaymentService,
{
    while let Some(event) = events.recv().await {
        let name = event.name();
        if let Err(e) = stage.handle(event).await {
            tracing::error!(event = name, error = %e, "collaborator failed");
        }
    }
    tracing::debug!("collaborator stage stopped");
}
