//! Project event feed
//!
//! Events are serialized to JSON when they are published and travel as text
//! from then on. Published events wait in a bounded ingestion queue until a
//! distribution task hands each one, in order, to every live subscriber.
//!
//! ```text
//!  send_event ──► ingestion queue (100) ──► dispatcher ──┬──► subscriber queue (10)
//!                                                        └──► subscriber queue (10)
//! ```
//!
//! A subscriber that falls a whole queue behind is an [`OverflowFault`]. The
//! bus halts rather than drop the event or grow without bound.

use super::model::ContainerStatus;
use crate::error::{ComposeError, OverflowFault, Result};
use crate::settings::{DEFAULT_INGEST_CAPACITY, DEFAULT_SUBSCRIBER_CAPACITY};
use chrono::{SecondsFormat, Utc};
use futures::{Future, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Kind of object an event is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Container,
    Image,
    Network,
    Volume,
    #[serde(other)]
    Unknown,
}

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Start,
    Restart,
    Pause,
    Unpause,
    Stop,
    Kill,
    Die,
    Oom,
    Destroy,
    HealthStatus,
    #[serde(other)]
    Unknown,
}

/// A project-level state change reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// When the event happened (RFC 3339)
    pub time: String,
    /// Kind of object
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// What happened
    pub action: Action,
    /// Object ID
    pub id: String,
    /// Compose service the object belongs to
    pub service: String,
    /// Extra attributes, such as `name` and `image`
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Event {
    /// A container event stamped with the current time
    pub fn container(action: Action, service: &str, id: &str) -> Self {
        Self {
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            event_type: EventType::Container,
            action,
            id: id.to_string(),
            service: service.to_string(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    /// Decode an event from its wire form
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Best guess at the container state this event leaves behind
    pub fn guess_status(&self) -> Option<ContainerStatus> {
        if self.event_type != EventType::Container {
            return None;
        }

        match self.action {
            Action::Create => Some(ContainerStatus::Created),
            Action::Start | Action::Restart | Action::Unpause => Some(ContainerStatus::Running),
            Action::Pause => Some(ContainerStatus::Paused),
            Action::Stop => Some(ContainerStatus::Stopped),
            Action::Kill | Action::Die => Some(ContainerStatus::Exited),
            Action::Oom => Some(ContainerStatus::Dead),
            Action::Destroy => Some(ContainerStatus::Removing),
            Action::HealthStatus | Action::Unknown => None,
        }
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl Subscriber {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }
}

#[derive(Default)]
struct BusState {
    /// Held here until the dispatcher starts
    ingest_rx: Option<mpsc::Receiver<String>>,
    subscribers: Vec<Subscriber>,
    dispatcher: Option<JoinHandle<Result<()>>>,
    next_id: u64,
}

struct BusShared {
    state: Mutex<BusState>,
    subscriber_added: Notify,
    fault_tx: watch::Sender<Option<OverflowFault>>,
    subscriber_capacity: usize,
}

impl BusShared {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BusState>> {
        self.state
            .lock()
            .map_err(|_| ComposeError::Lock("Failed to acquire event bus lock".to_string()))
    }

    fn live_subscribers(&self) -> Result<usize> {
        let mut state = self.lock()?;
        state.subscribers.retain(Subscriber::is_live);
        Ok(state.subscribers.len())
    }

    /// Hand `event` to every live subscriber. Returns how many there were.
    fn deliver(&self, event: &str) -> Result<usize> {
        let mut state = self.lock()?;
        state.subscribers.retain(Subscriber::is_live);

        for subscriber in &state.subscribers {
            match subscriber.tx.try_send(event.to_string()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let fault = OverflowFault {
                        event: event.to_string(),
                        capacity: self.subscriber_capacity,
                    };
                    tracing::error!(
                        "Subscriber {} overflowed: {}. The event bus is halting.",
                        subscriber.id,
                        fault
                    );
                    return Err(fault.into());
                }
                // Cancelled between the retain and here; pruned next time.
                Err(TrySendError::Closed(_)) => {}
            }
        }

        Ok(state.subscribers.len())
    }

    /// Record the fault and close every subscriber
    fn halt(&self, fault: OverflowFault) {
        self.fault_tx.send_replace(Some(fault));
        if let Ok(mut state) = self.state.lock() {
            state.subscribers.clear();
        }
    }

    fn fault(&self) -> Option<OverflowFault> {
        self.fault_tx.borrow().clone()
    }
}

/// Bounded, ordered fan-out of serialized events
pub struct EventBus {
    ingest_tx: mpsc::Sender<String>,
    shared: Arc<BusShared>,
    shutdown: CancellationToken,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_INGEST_CAPACITY, DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl EventBus {
    pub fn new(ingest_capacity: usize, subscriber_capacity: usize) -> Self {
        let (ingest_tx, ingest_rx) = mpsc::channel(ingest_capacity.max(1));
        let (fault_tx, _) = watch::channel(None);

        let state = BusState {
            ingest_rx: Some(ingest_rx),
            ..Default::default()
        };

        Self {
            ingest_tx,
            shared: Arc::new(BusShared {
                state: Mutex::new(state),
                subscriber_added: Notify::new(),
                fault_tx,
                subscriber_capacity: subscriber_capacity.max(1),
            }),
            shutdown: CancellationToken::new(),
        }
    }

    /// Serialize and enqueue an event. Waits only while the ingestion queue
    /// is full.
    pub async fn send_event<E: Serialize + ?Sized>(&self, event: &E) -> Result<()> {
        let json = serde_json::to_string(event)?;
        self.send_raw(json).await
    }

    /// Enqueue an already serialized event
    pub async fn send_raw(&self, json: String) -> Result<()> {
        if let Some(fault) = self.shared.fault() {
            return Err(fault.into());
        }

        self.ingest_tx.send(json).await.map_err(|_| match self.shared.fault() {
            Some(fault) => ComposeError::Overflow(fault),
            None => ComposeError::Runtime("event bus is closed".to_string()),
        })
    }

    /// Add a subscriber. Its stream closes when `cancel` fires.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self, cancel: CancellationToken) -> Result<EventStream> {
        if let Some(fault) = self.shared.fault() {
            return Err(fault.into());
        }

        let (tx, rx) = mpsc::channel(self.shared.subscriber_capacity);
        let id = {
            let mut state = self.shared.lock()?;
            let id = state.next_id;
            state.next_id += 1;
            state.subscribers.push(Subscriber {
                id,
                tx,
                cancel: cancel.clone(),
            });

            if let Some(ingest_rx) = state.ingest_rx.take() {
                state.dispatcher = Some(tokio::spawn(dispatch(
                    ingest_rx,
                    Arc::clone(&self.shared),
                    self.shutdown.clone(),
                )));
            }
            id
        };

        self.shared.subscriber_added.notify_one();
        tracing::debug!("Event subscriber {} added", id);

        Ok(EventStream {
            rx,
            cancelled: Box::pin(cancel.cancelled_owned()),
            fault_rx: self.shared.fault_tx.subscribe(),
            finished: false,
        })
    }

    /// The fault that halted the bus, if any
    pub fn fault(&self) -> Option<OverflowFault> {
        self.shared.fault()
    }

    /// Wait until the bus halts with a fault
    pub async fn faulted(&self) -> OverflowFault {
        let mut fault_rx = self.shared.fault_tx.subscribe();
        loop {
            if let Some(fault) = fault_rx.borrow_and_update().clone() {
                return fault;
            }
            // The sender lives in `self`, so this cannot fail while we wait.
            if fault_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Stop distributing and wait for the dispatcher to finish.
    ///
    /// Returns the fault that halted the bus, if that is why it stopped.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();

        let dispatcher = self.shared.lock()?.dispatcher.take();
        match dispatcher {
            Some(handle) => handle
                .await
                .map_err(|e| ComposeError::Runtime(format!("event dispatcher panicked: {}", e)))?,
            None => Ok(()),
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Distribution loop. Events stay queued while nobody is subscribed.
async fn dispatch(
    mut ingest_rx: mpsc::Receiver<String>,
    shared: Arc<BusShared>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut pending: Option<String> = None;

    loop {
        while shared.live_subscribers()? == 0 {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                _ = shared.subscriber_added.notified() => {}
            }
        }

        let event = match pending.take() {
            Some(event) => event,
            None => tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                event = ingest_rx.recv() => match event {
                    Some(event) => event,
                    None => return Ok(()),
                },
            },
        };

        match shared.deliver(&event) {
            Ok(0) => pending = Some(event),
            Ok(_) => {}
            Err(ComposeError::Overflow(fault)) => {
                shared.halt(fault.clone());
                return Err(ComposeError::Overflow(fault));
            }
            Err(e) => {
                tracing::error!("Event dispatcher stopped: {}", e);
                return Err(e);
            }
        }
    }
}

/// One subscriber's view of the event feed.
///
/// Yields serialized events in publication order. If the bus halts on an
/// overflow, the buffered events are yielded first, then the fault once.
pub struct EventStream {
    rx: mpsc::Receiver<String>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    fault_rx: watch::Receiver<Option<OverflowFault>>,
    finished: bool,
}

impl EventStream {
    /// Next serialized event
    pub async fn recv(&mut self) -> Option<Result<String>> {
        self.next().await
    }

    /// Next event, decoded
    pub async fn recv_event(&mut self) -> Option<Result<Event>> {
        self.next()
            .await
            .map(|item| item.and_then(|json| Event::from_json(&json)))
    }
}

impl Stream for EventStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.finished = true;
            this.rx.close();
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(None) => {
                this.finished = true;
                let fault = this.fault_rx.borrow().clone();
                Poll::Ready(fault.map(|f| Err(ComposeError::Overflow(f))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
