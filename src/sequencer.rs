use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::time::{sleep_until, Instant};
use tokio::{spawn, task};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{Command, InFlight, InFlightEntry};
use crate::errors::{Result, TelloError};

const MAX_RESPONSE_SIZE: usize = 2048;

#[derive(Debug, Clone)]
struct Link {
    sock: Arc<UdpSocket>,
    scope: CancellationToken,
}

/// Sends commands one at a time and matches each to its response.
///
/// Ordinary commands queue on a single lock, so at most one of them is ever
/// waiting for a response. Cancellers (emergency, land) may skip that queue,
/// see [`InFlight::enter`].
///
/// The drone's responses carry nothing to tie them to a command, so every
/// command waiting for a response registers in a FIFO at the moment it is
/// written and each response goes to the oldest registration still waiting.
#[derive(Debug, Default)]
pub(crate) struct CommandSequencer {
    link: Mutex<Option<Link>>,
    sequence: AsyncMutex<()>,
    transmit: AsyncMutex<()>,
    in_flight: InFlight,
    responses: ResponseRouter,
}

impl CommandSequencer {
    pub(crate) fn attach(&self, sock: Arc<UdpSocket>, scope: CancellationToken) {
        *self.link() = Some(Link { sock, scope });
    }

    /// Forgets the socket, in-flight commands and pending waits.
    pub(crate) fn detach(&self) {
        self.link().take();
        self.in_flight.clear();
        self.responses.clear();
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub(crate) fn last_response(&self) -> Option<String> {
        self.responses.last()
    }

    /// Hands a response received on the command socket to the waiting
    /// command, returning false if nothing was waiting for it.
    pub(crate) fn deliver(&self, response: String) -> bool {
        self.responses.deliver(response)
    }

    /// Sends a command the drone doesn't acknowledge, returning as soon as it
    /// has been written.
    pub(crate) async fn send(&self, command: &Command) -> Result<()> {
        let link = self.connected()?;
        let deadline = command.deadline();

        let _admitted = self.admit(&link, command, deadline).await?;
        self.transmit(&link, command, deadline, || ()).await
    }

    /// Sends a command and passes its response to `handler`.
    pub(crate) async fn request<T>(
        &self,
        command: &Command,
        handler: impl FnOnce(&str) -> Result<T>,
    ) -> Result<T> {
        let link = self.connected()?;
        let deadline = command.deadline();

        let _admitted = self.admit(&link, command, deadline).await?;
        let mut pending = self
            .transmit(&link, command, deadline, || self.responses.register(command.id))
            .await?;

        let response = bounded(&link.scope, deadline, command.timeout, &mut pending.receiver)
            .await?
            .map_err(|_| TelloError::Cancelled)?;

        handler(&response)
    }

    /// Enters the command in flight and, unless it has priority, waits for
    /// the previous command to finish.
    async fn admit(
        &self,
        link: &Link,
        command: &Command,
        deadline: Option<Instant>,
    ) -> Result<(InFlightEntry<'_>, Option<AsyncMutexGuard<'_, ()>>)> {
        let (entry, priority) = self.in_flight.enter(command);
        if priority {
            debug!("[Tello] PRIORITY {}", command.text);
            return Ok((entry, None));
        }

        let turn = bounded(&link.scope, deadline, command.timeout, self.sequence.lock()).await?;
        Ok((entry, Some(turn)))
    }

    /// Writes the command. `register` runs just before the write, under the
    /// same lock, so no other command can be written in between.
    async fn transmit<R>(
        &self,
        link: &Link,
        command: &Command,
        deadline: Option<Instant>,
        register: impl FnOnce() -> R,
    ) -> Result<R> {
        let _transmitting =
            bounded(&link.scope, deadline, command.timeout, self.transmit.lock()).await?;

        let registered = register();

        debug!("[Tello] SEND {}", command.text);
        link.sock.send(command.text.as_bytes()).await.map_err(TelloError::WriteFailed)?;

        Ok(registered)
    }

    fn connected(&self) -> Result<Link> {
        self.link().clone().ok_or(TelloError::NotConnected)
    }

    fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Waits for `fut`, giving up when the scope is cancelled or the deadline
/// passes.
async fn bounded<F: Future>(
    scope: &CancellationToken,
    deadline: Option<Instant>,
    timeout: Duration,
    fut: F,
) -> Result<F::Output> {
    let expired = async {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        _ = scope.cancelled() => Err(TelloError::Cancelled),
        output = fut => Ok(output),
        _ = expired => Err(TelloError::Timeout(timeout)),
    }
}

type Waiter = (u64, oneshot::Sender<String>);

#[derive(Debug, Default)]
struct ResponseRouter {
    waiting: Mutex<VecDeque<Waiter>>,
    last: Mutex<Option<String>>,
}

impl ResponseRouter {
    fn register(&self, id: u64) -> PendingResponse<'_> {
        let (sender, receiver) = oneshot::channel();
        self.waiting().push_back((id, sender));
        PendingResponse { router: self, id, receiver }
    }

    fn deliver(&self, response: String) -> bool {
        *self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(response.clone());

        let mut waiting = self.waiting();
        let mut response = response;
        while let Some((_, sender)) = waiting.pop_front() {
            match sender.send(response) {
                Ok(()) => return true,
                Err(unsent) => response = unsent,
            }
        }
        false
    }

    fn last(&self) -> Option<String> {
        self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn clear(&self) {
        self.waiting().clear();
    }

    fn waiting(&self) -> MutexGuard<'_, VecDeque<Waiter>> {
        self.waiting.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A registration for the next response, withdrawn when dropped.
struct PendingResponse<'a> {
    router: &'a ResponseRouter,
    id: u64,
    receiver: oneshot::Receiver<String>,
}

impl Drop for PendingResponse<'_> {
    fn drop(&mut self) {
        let id = self.id;
        self.router.waiting().retain(|(waiting, _)| *waiting != id);
    }
}

/// Reads responses from the command socket.
#[derive(Debug)]
pub(crate) struct ResponseListener {
    task: task::JoinHandle<()>,
}

impl ResponseListener {
    pub(crate) fn start_listening(
        sock: Arc<UdpSocket>,
        sequencer: Arc<CommandSequencer>,
        scope: CancellationToken,
    ) -> Self {
        info!("[Tello] START LISTENING for responses");

        let task = spawn(async move {
            let mut buf = vec![0; MAX_RESPONSE_SIZE];
            loop {
                let received = tokio::select! {
                    _ = scope.cancelled() => break,
                    r = sock.recv(&mut buf) => r,
                };

                match received {
                    Ok(n) => {
                        let response = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                        debug!("[Tello] RECEIVED {response}");
                        if !sequencer.deliver(response) {
                            debug!("[Tello] no command waiting, response dropped");
                        }
                    }
                    Err(_) if scope.is_cancelled() => break,
                    Err(err) => warn!("[Tello] reading response failed: {err}"),
                }
            }
        });

        Self { task }
    }

    pub(crate) async fn stop_listening(self) {
        info!("[Tello] STOP LISTENING for responses");
        if let Err(err) = self.task.await {
            warn!("[Tello] response listener task failed: {err}");
        }
    }
}
