use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::{spawn, task};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::state::TelloState;
use crate::video::TelloVideoFrame;

/// Something that happened to the drone.
#[derive(Debug, Clone, PartialEq)]
pub enum TelloEvent {
    /// A new state snapshot was received.
    State(TelloState),
    /// A reassembled video frame.
    VideoPacket(TelloVideoFrame),
    /// `take_off` was acknowledged.
    TakeOff,
    /// `land` was acknowledged.
    Land,
}

/// The kinds of event subscribers can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    State,
    VideoPacket,
    TakeOff,
    Land,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::State => "state",
            EventKind::VideoPacket => "video.packet",
            EventKind::TakeOff => "take.off",
            EventKind::Land => "land",
        }
    }
}

impl TelloEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TelloEvent::State(_) => EventKind::State,
            TelloEvent::VideoPacket(_) => EventKind::VideoPacket,
            TelloEvent::TakeOff => EventKind::TakeOff,
            TelloEvent::Land => EventKind::Land,
        }
    }
}

type Handler = Arc<dyn Fn(&TelloEvent) + Send + Sync>;

/// Publish/subscribe dispatcher.
///
/// `dispatch` only queues the event, handlers are called from a separate
/// delivery task so producers are never held up by slow subscribers. Events
/// dispatched before `start` are delivered once it is called.
#[derive(Clone)]
pub(crate) struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    handlers: Mutex<HashMap<EventKind, Vec<Handler>>>,
    queue: Mutex<Queue>,
}

struct Queue {
    sender: mpsc::UnboundedSender<TelloEvent>,
    receiver: Option<mpsc::UnboundedReceiver<TelloEvent>>,
    delivery: Option<(CancellationToken, task::JoinHandle<()>)>,
}

impl Queue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver: Some(receiver), delivery: None }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: Mutex::new(HashMap::new()),
                queue: Mutex::new(Queue::new()),
            }),
        }
    }

    /// Registers a handler for every event of the given kind.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&TelloEvent) + Send + Sync + 'static,
    {
        self.handlers().entry(kind).or_default().push(Arc::new(handler));
    }

    pub fn on_state<F>(&self, handler: F)
    where
        F: Fn(TelloState) + Send + Sync + 'static,
    {
        self.on(EventKind::State, move |event| {
            if let TelloEvent::State(state) = event {
                handler(*state)
            }
        });
    }

    pub fn on_video_packet<F>(&self, handler: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.on(EventKind::VideoPacket, move |event| {
            if let TelloEvent::VideoPacket(frame) = event {
                handler(&frame.data)
            }
        });
    }

    pub fn on_take_off<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::TakeOff, move |_| handler());
    }

    pub fn on_land<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::Land, move |_| handler());
    }

    /// Queues an event for delivery, never blocks.
    pub(crate) fn dispatch(&self, event: TelloEvent) {
        // fails once the delivery task has exited, until `stop` replaces the queue
        if self.queue().sender.send(event).is_err() {
            debug!("event dropped, delivery has stopped");
        }
    }

    /// Starts delivering events until `stop` is called or `scope` is
    /// cancelled. Does nothing if already started.
    pub(crate) fn start(&self, scope: &CancellationToken) {
        let mut queue = self.queue();
        let Some(mut receiver) = queue.receiver.take() else {
            return;
        };

        let token = scope.child_token();
        let cancelled = token.clone();
        let bus = self.clone();
        let task = spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    event = receiver.recv() => match event {
                        Some(event) => bus.deliver(&event),
                        None => break,
                    },
                    _ = cancelled.cancelled() => break,
                }
            }

            // drain whatever was queued before the stop
            while let Ok(event) = receiver.try_recv() {
                bus.deliver(&event);
            }
        });

        queue.delivery = Some((token, task));
    }

    /// Stops the delivery task after it has delivered the pending events.
    /// Subscriptions are kept, `start` resumes delivery.
    pub(crate) async fn stop(&self) {
        let delivery = self.queue().delivery.take();
        if let Some((token, task)) = delivery {
            token.cancel();
            if let Err(err) = task.await {
                error!("event delivery task failed: {err}");
            }
            *self.queue() = Queue::new();
        }
    }

    /// Drops every subscription and any undelivered event.
    pub(crate) fn reset(&self) {
        self.handlers().clear();
        let mut queue = self.queue();
        if queue.delivery.is_none() {
            *queue = Queue::new();
        }
    }

    fn deliver(&self, event: &TelloEvent) {
        let kind = event.kind();
        let handlers = match self.handlers().get(&kind) {
            Some(handlers) => handlers.clone(),
            None => return,
        };

        debug!(event = kind.name(), handlers = handlers.len(), "delivering");
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(event = kind.name(), "event handler panicked");
            }
        }
    }

    fn handlers(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<Handler>>> {
        self.inner.handlers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.inner.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
