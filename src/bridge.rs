//! Downstream subscription and consumer delivery.
//!
//! [`StreamBridge`] opens at most one subscription on the [`StreamHandler`]
//! and runs a pump task that moves events from the subscription into the
//! [`DeliveryContext`]. The delivery context is a single long-lived task that
//! owns the [`EventConsumer`]; every `on_event` call happens there, in the
//! order the subscription produced the events.
//!
//! Each subscription is tagged with an epoch. Deactivation clears the
//! current epoch and then waits for a fence to pass through the delivery
//! queue, so once [`StreamBridge::deactivate`] returns no event from the
//! closed subscription can reach the consumer.
//!
//! A subscription the handler ends on its own (connection loss) stays
//! registered until [`StreamBridge::release_ended`] is called for its epoch;
//! the optional end callback tells the owner when that happens.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::DomainEvent;
use crate::platform::{EventChannel, EventConsumer, StreamHandler};

/// Epoch value meaning "no subscription is open".
const NO_EPOCH: u64 = 0;

enum Delivery {
    Event { epoch: u64, event: DomainEvent },
    Fence(oneshot::Sender<()>),
}

/// The execution context consumer callbacks run on.
pub struct DeliveryContext {
    tx: mpsc::Sender<Delivery>,
    current_epoch: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
}

impl DeliveryContext {
    /// Spawn the delivery task owning `consumer`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<C: EventConsumer>(mut consumer: C, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Delivery>(capacity.max(1));
        let current_epoch = Arc::new(AtomicU64::new(NO_EPOCH));
        let delivered = Arc::new(AtomicU64::new(0));

        let epoch = Arc::clone(&current_epoch);
        let count = Arc::clone(&delivered);
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                match item {
                    Delivery::Event { epoch: tag, event } => {
                        if tag == epoch.load(Ordering::SeqCst) {
                            count.fetch_add(1, Ordering::SeqCst);
                            consumer.on_event(event);
                        } else {
                            debug!(epoch = tag, "dropping event from closed subscription");
                        }
                    }
                    Delivery::Fence(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            debug!("delivery context stopped");
        });

        Self {
            tx,
            current_epoch,
            delivered,
        }
    }

    /// Number of events handed to the consumer so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    fn open(&self, epoch: u64) {
        self.current_epoch.store(epoch, Ordering::SeqCst);
    }

    fn close(&self) {
        self.current_epoch.store(NO_EPOCH, Ordering::SeqCst);
    }

    /// Wait until every item queued before this call has been processed.
    async fn fence(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Delivery::Fence(ack_tx)).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }

    fn sender(&self) -> mpsc::Sender<Delivery> {
        self.tx.clone()
    }
}

/// Owned handle to the live downstream subscription.
pub struct StreamSubscriptionHandle {
    epoch: u64,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

impl StreamSubscriptionHandle {
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Called with the epoch of a subscription the handler ended.
pub type EndCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Opens, forwards, and closes the downstream event subscription.
pub struct StreamBridge {
    handler: Arc<dyn StreamHandler>,
    delivery: DeliveryContext,
    active: Mutex<Option<StreamSubscriptionHandle>>,
    last_epoch: AtomicU64,
    on_end: Option<EndCallback>,
}

impl StreamBridge {
    /// Create a bridge delivering to `consumer`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<C: EventConsumer>(
        handler: Arc<dyn StreamHandler>,
        consumer: C,
        delivery_capacity: usize,
    ) -> Self {
        Self {
            handler,
            delivery: DeliveryContext::spawn(consumer, delivery_capacity),
            active: Mutex::new(None),
            last_epoch: AtomicU64::new(NO_EPOCH),
            on_end: None,
        }
    }

    /// Invoke `callback` when the handler ends a subscription by closing its channel.
    #[must_use]
    pub fn on_end<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.on_end = Some(Arc::new(callback));
        self
    }

    /// Open the subscription if none is open.
    ///
    /// Returns `Ok(true)` when a new subscription was opened and `Ok(false)`
    /// when one was already live.
    ///
    /// # Errors
    ///
    /// Returns the stream handler's error if the subscription cannot be opened.
    pub async fn activate(&self) -> Result<bool> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            debug!("stream already active; activate is a no-op");
            return Ok(false);
        }

        let channel = self.handler.subscribe().await?;
        let epoch = self.last_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.delivery.open(epoch);

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump(
            channel,
            self.delivery.sender(),
            epoch,
            cancel.clone(),
            self.on_end.clone(),
        ));
        *active = Some(StreamSubscriptionHandle {
            epoch,
            cancel,
            pump,
        });
        info!(epoch, "stream subscription opened");
        Ok(true)
    }

    /// Close the subscription if one is open.
    ///
    /// Returns `true` when a subscription was closed. Safe to call at any
    /// time; must not be called from inside [`EventConsumer::on_event`].
    pub async fn deactivate(&self) -> bool {
        let mut active = self.active.lock().await;
        let Some(handle) = active.take() else {
            return false;
        };
        self.close(handle).await;
        true
    }

    /// Release the subscription for `epoch` after the handler ended it.
    ///
    /// Returns `false` when `epoch` is no longer the live subscription.
    pub async fn release_ended(&self, epoch: u64) -> bool {
        let mut active = self.active.lock().await;
        if active.as_ref().map(StreamSubscriptionHandle::epoch) != Some(epoch) {
            debug!(epoch, "ended subscription already replaced");
            return false;
        }
        let Some(handle) = active.take() else {
            return false;
        };
        self.close(handle).await;
        true
    }

    async fn close(&self, handle: StreamSubscriptionHandle) {
        handle.cancel.cancel();
        self.delivery.close();
        if let Err(e) = handle.pump.await {
            warn!(error = %e, epoch = handle.epoch, "stream pump task failed");
        }
        self.handler.unsubscribe().await;
        self.delivery.fence().await;
        info!(epoch = handle.epoch, "stream subscription closed");
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Number of events delivered to the consumer across all subscriptions.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivery.delivered()
    }
}

async fn pump(
    channel: EventChannel,
    delivery: mpsc::Sender<Delivery>,
    epoch: u64,
    cancel: CancellationToken,
    on_end: Option<EndCallback>,
) {
    let mut events = ReceiverStream::new(channel);
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = events.next() => match next {
                Some(event) => event,
                None => {
                    warn!(epoch, "stream subscription ended by handler");
                    if let Some(on_end) = &on_end {
                        on_end(epoch);
                    }
                    break;
                }
            },
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = delivery.send(Delivery::Event { epoch, event }) => {
                if sent.is_err() {
                    warn!(epoch, "delivery context closed; stopping stream pump");
                    break;
                }
            }
        }
    }
}
