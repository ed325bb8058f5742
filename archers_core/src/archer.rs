//! Archer Runtime - one node of the line.
//!
//! An archer goes through two phases:
//!
//! ```text
//!   Archer (building)                     ArcherHandle (running)
//!   ┌──────────────────────────┐  launch  ┌──────────────────────────────┐
//!   │ connect_left / right     │ ───────► │ task: /fromleft  listener    │
//!   │ neighbours recorded once │          │ task: /fromright listener    │
//!   └──────────────────────────┘          │ start() (head of line only)  │
//!                                         └──────────────────────────────┘
//! ```
//!
//! Each listener task handles its channel's streams one at a time. Errors
//! inside a listener are logged and the message is dropped; there is no
//! path back to the head of the line to report them.

use crate::fire::{FireScheduler, FireSink};
use crate::message::Message;
use crate::relay::{originate, relay, Position, RelayError, RelayStep, Side};
use archers_env::{ArcherContext, Channel, EnvError, InboundStream, NodeId, PeerInfo, PeerTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Per-archer timing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArcherConfig {
    /// Shared start timestamp, on the context's monotonic clock
    pub start: Duration,

    /// Pause before every send, standing in for transmission latency
    pub hop_delay: Duration,

    /// Length of one counter unit when firing
    pub fire_unit: Duration,
}

impl Default for ArcherConfig {
    fn default() -> Self {
        Self {
            start: Duration::ZERO,
            hop_delay: Duration::from_secs(1),
            fire_unit: Duration::from_secs(1),
        }
    }
}

impl ArcherConfig {
    /// Sets the shared start timestamp.
    pub fn with_start(mut self, start: Duration) -> Self {
        self.start = start;
        self
    }

    /// Sets the pacing delay before each send.
    pub fn with_hop_delay(mut self, hop_delay: Duration) -> Self {
        self.hop_delay = hop_delay;
        self
    }

    /// Sets the length of one counter unit.
    pub fn with_fire_unit(mut self, fire_unit: Duration) -> Self {
        self.fire_unit = fire_unit;
        self
    }
}

/// An archer being wired into the line.
pub struct Archer<Ctx, Net>
where
    Ctx: ArcherContext,
    Net: PeerTransport,
{
    context: Arc<Ctx>,
    transport: Arc<Net>,
    config: ArcherConfig,
    left: Option<NodeId>,
    right: Option<NodeId>,

    /// Listener queues, indexed by `Channel::index`
    inbound: [Option<mpsc::Receiver<InboundStream>>; 2],
}

impl<Ctx, Net> Archer<Ctx, Net>
where
    Ctx: ArcherContext,
    Net: PeerTransport,
{
    /// Creates an archer with no neighbours.
    pub fn new(context: Arc<Ctx>, transport: Arc<Net>, config: ArcherConfig) -> Self {
        Self {
            context,
            transport,
            config,
            left: None,
            right: None,
            inbound: [None, None],
        }
    }

    pub fn id(&self) -> NodeId {
        self.transport.local_id()
    }

    /// What a neighbour needs to dial this archer.
    pub fn info(&self) -> PeerInfo {
        self.transport.local_info()
    }

    pub fn left(&self) -> Option<NodeId> {
        self.left
    }

    pub fn right(&self) -> Option<NodeId> {
        self.right
    }

    pub fn position(&self) -> Position {
        Position {
            has_left: self.left.is_some(),
            has_right: self.right.is_some(),
        }
    }

    /// Handshake with the predecessor: dial it, listen on `/fromleft`, record it.
    pub async fn connect_left(&mut self, peer: &PeerInfo) -> Result<(), EnvError> {
        self.handshake(Side::Left, peer).await
    }

    /// Handshake with the successor: dial it, listen on `/fromright`, record it.
    pub async fn connect_right(&mut self, peer: &PeerInfo) -> Result<(), EnvError> {
        self.handshake(Side::Right, peer).await
    }

    async fn handshake(&mut self, side: Side, peer: &PeerInfo) -> Result<(), EnvError> {
        let channel = side.listens_on();
        self.transport.connect(peer).await?;
        let rx = self.transport.listen(channel)?;

        self.inbound[channel.index()] = Some(rx);
        match side {
            Side::Left => self.left = Some(peer.id),
            Side::Right => self.right = Some(peer.id),
        }
        debug!("Archer {} linked {} neighbour {}", self.id(), side, peer);
        Ok(())
    }

    /// Starts one listener task per registered channel.
    ///
    /// Neighbours are frozen from here on.
    pub fn launch(self, sink: FireSink) -> ArcherHandle<Ctx, Net> {
        let Archer {
            context,
            transport,
            config,
            left,
            right,
            inbound,
        } = self;

        let id = transport.local_id();
        let fire = FireScheduler::new(Arc::clone(&context), id, config.start, config.fire_unit, sink);
        let shared = Arc::new(Shared {
            id,
            left,
            right,
            context,
            transport,
            config,
            fire,
        });

        for (channel, rx) in Channel::ALL.into_iter().zip(inbound) {
            if let Some(rx) = rx {
                let name = format!("archer-{}{}", id, channel.name());
                shared
                    .context
                    .spawn(&name, listen(Arc::clone(&shared), channel, rx));
            }
        }

        ArcherHandle { shared }
    }
}

/// A running archer.
pub struct ArcherHandle<Ctx, Net>
where
    Ctx: ArcherContext,
    Net: PeerTransport,
{
    shared: Arc<Shared<Ctx, Net>>,
}

impl<Ctx, Net> ArcherHandle<Ctx, Net>
where
    Ctx: ArcherContext,
    Net: PeerTransport,
{
    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    pub fn left(&self) -> Option<NodeId> {
        self.shared.left
    }

    pub fn right(&self) -> Option<NodeId> {
        self.shared.right
    }

    pub fn position(&self) -> Position {
        self.shared.position()
    }

    /// Sends the first message of a volley (or fires, for a lone archer).
    ///
    /// Only the head of the line may call this. Unlike relays inside the
    /// listeners, a failed send here is returned to the caller.
    pub async fn start(&self) -> Result<(), RelayError> {
        let step = originate(self.position(), self.id())?;
        info!("Archer {} starting volley", self.id());
        if let Some((side, message)) = step.forward {
            self.shared.send(side, message).await?;
        }
        if let Some(value) = step.fire {
            self.shared.fire.fire(value).await;
        }
        Ok(())
    }
}

/// State shared by an archer's listener tasks.
struct Shared<Ctx, Net>
where
    Ctx: ArcherContext,
    Net: PeerTransport,
{
    id: NodeId,
    left: Option<NodeId>,
    right: Option<NodeId>,
    context: Arc<Ctx>,
    transport: Arc<Net>,
    config: ArcherConfig,
    fire: FireScheduler<Ctx>,
}

impl<Ctx, Net> Shared<Ctx, Net>
where
    Ctx: ArcherContext,
    Net: PeerTransport,
{
    fn position(&self) -> Position {
        Position {
            has_left: self.left.is_some(),
            has_right: self.right.is_some(),
        }
    }

    fn neighbour(&self, side: Side) -> Option<NodeId> {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    async fn handle(&self, stream: InboundStream) {
        let channel = stream.channel();
        debug!("Archer {} received stream on {} from {}", self.id, channel, stream.sender());
        if let Err(e) = self.process(stream).await {
            error!("Archer {} {} handler: {}", self.id, channel, e);
        }
    }

    async fn process(&self, stream: InboundStream) -> Result<(), RelayError> {
        let message = Message::decode(stream.read())?;
        debug!("Archer {} read {}", self.id, message.value);

        let step = relay(self.position(), stream.channel(), message)?;
        self.apply(step).await;
        Ok(())
    }

    /// Forwards, then fires. A failed forward is logged and the fire still happens.
    async fn apply(&self, step: RelayStep) {
        if let Some((side, message)) = step.forward {
            if let Err(e) = self.send(side, message).await {
                error!("Archer {} relay {}: {}", self.id, side, e);
            }
        }
        if let Some(value) = step.fire {
            self.fire.fire(value).await;
        }
    }

    async fn send(&self, side: Side, message: Message) -> Result<(), RelayError> {
        let peer = self.neighbour(side).ok_or(RelayError::NoNeighbour {
            side,
            channel: side.arrives_on(),
        })?;

        self.context.sleep(self.config.hop_delay).await;

        let bytes = message.encode()?;
        let mut stream = self
            .transport
            .open_stream(peer, side.arrives_on())
            .await
            .map_err(|source| RelayError::Send { peer, source })?;
        stream.write(&bytes);
        stream
            .close()
            .await
            .map_err(|source| RelayError::Send { peer, source })?;

        debug!("Archer {} sent {} to {} neighbour {}", self.id, message.value, side, peer);
        Ok(())
    }
}

async fn listen<Ctx, Net>(shared: Arc<Shared<Ctx, Net>>, channel: Channel, mut rx: mpsc::Receiver<InboundStream>)
where
    Ctx: ArcherContext,
    Net: PeerTransport,
{
    while let Some(stream) = rx.recv().await {
        shared.handle(stream).await;
    }
    debug!("Archer {} listener on {} closed", shared.id, channel);
}
