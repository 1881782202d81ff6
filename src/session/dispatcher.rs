use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bon::Builder;
use serde::Serialize;
use strum_macros::Display;
use tokio::runtime::Handle;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::connection::{ConnectionReport, ConnectionSession};
use super::discovery::{DiscoveryResult, ScanRequest, run_discovery};
use super::sink::{EventSink, Severity};
use crate::error::{ActiveResource, ConfigurationError, Operation, SessionError, TransportError};
use crate::gatt_uuid::normalize_uuid;
use crate::hw::{BleTransport, DeviceHandle, NotificationFeed};
use crate::payload::{WriteEncoding, decode_payload};

/// How often a live link is checked for silent loss.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long an in-flight operation may run on after a disconnect request.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Timing knobs for a [`SessionController`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Builder)]
pub struct ControllerConfig {
    #[builder(default = DEFAULT_POLL_INTERVAL)]
    poll_interval: Duration,
    #[builder(default = DEFAULT_GRACE_PERIOD)]
    grace_period: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ControllerConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }
}

/// Controller-level summary of what the session is doing.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Connected,
    Disconnecting,
}

/// Completion handle for an operation running on the I/O context.
///
/// Await it from async code, poll it with [`Pending::try_take`], or block on
/// it with [`Pending::wait`] from a thread outside the runtime.
#[derive(Debug)]
#[must_use = "dropping a pending handle discards the operation outcome"]
pub struct Pending<T> {
    receiver: oneshot::Receiver<Result<T, SessionError>>,
}

impl<T> Pending<T> {
    fn new(receiver: oneshot::Receiver<Result<T, SessionError>>) -> Self {
        Self { receiver }
    }

    /// Takes the outcome if it is ready, without waiting.
    pub fn try_take(&mut self) -> Option<Result<T, SessionError>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(SessionError::SessionClosed)),
        }
    }

    /// Blocks the current thread until the outcome is ready.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async execution context.
    pub fn wait(self) -> Result<T, SessionError> {
        self.receiver
            .blocking_recv()
            .unwrap_or_else(|_closed| Err(SessionError::SessionClosed))
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, SessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_closed| Err(SessionError::SessionClosed)))
    }
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

#[derive(Debug)]
enum Request {
    Read {
        uuid: String,
        reply: Reply<Vec<u8>>,
    },
    Write {
        uuid: String,
        payload: Vec<u8>,
        reply: Reply<()>,
    },
    Subscribe {
        uuid: String,
        reply: Reply<()>,
    },
    Unsubscribe {
        uuid: String,
        reply: Reply<()>,
    },
}

impl Request {
    fn fail(self, error: SessionError, sink: &EventSink) {
        match self {
            Self::Read { reply, .. } => {
                deliver(reply, Err(error), sink);
            }
            Self::Write { reply, .. }
            | Self::Subscribe { reply, .. }
            | Self::Unsubscribe { reply, .. } => {
                deliver(reply, Err(error), sink);
            }
        }
    }

    fn fail_without_connection(self, sink: &EventSink) {
        let error = match &self {
            Self::Unsubscribe { uuid, .. } => SessionError::NotSubscribed { uuid: uuid.clone() },
            _ => SessionError::NotConnected,
        };
        self.fail(error, sink);
    }
}

/// Reports a failed outcome and hands it to the caller. Returns whether the
/// failure means the link is gone.
fn deliver<T>(reply: Reply<T>, outcome: Result<T, SessionError>, sink: &EventSink) -> bool {
    let link_lost = match &outcome {
        Ok(_) => false,
        Err(error) => {
            sink.report_error(error);
            error.is_link_lost()
        }
    };
    // The caller may have dropped its handle.
    let _ = reply.send(outcome);
    link_lost
}

#[derive(Debug)]
struct ScanSlot {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct ConnectionSlot {
    id: u64,
    device: DeviceHandle,
    requests: mpsc::UnboundedSender<Request>,
    shutdown: CancellationToken,
    finished: watch::Receiver<bool>,
}

#[derive(Debug, Default)]
struct Slots {
    next_id: u64,
    state: SessionState,
    scan: Option<ScanSlot>,
    connection: Option<ConnectionSlot>,
}

impl Slots {
    fn busy(&self) -> Option<ActiveResource> {
        if self.scan.is_some() {
            Some(ActiveResource::Scan)
        } else if self.connection.is_some() {
            Some(ActiveResource::Connection)
        } else {
            None
        }
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug)]
struct Shared {
    sink: EventSink,
    slots: Mutex<Slots>,
    devices: watch::Sender<Arc<DiscoveryResult>>,
}

impl Shared {
    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_scan(&self, id: u64) {
        let mut slots = self.slots();
        if slots.scan.as_ref().is_some_and(|scan| scan.id == id) {
            slots.scan = None;
            slots.state = SessionState::Idle;
        }
    }

    fn mark_connected(&self, id: u64) {
        let mut slots = self.slots();
        let owns_slot = slots
            .connection
            .as_ref()
            .is_some_and(|connection| connection.id == id);
        if owns_slot && slots.state == SessionState::Connecting {
            slots.state = SessionState::Connected;
        }
    }

    fn finish_connection(&self, id: u64) {
        let mut slots = self.slots();
        if slots
            .connection
            .as_ref()
            .is_some_and(|connection| connection.id == id)
        {
            slots.connection = None;
            slots.state = SessionState::Idle;
        }
    }
}

/// Bridges a synchronous caller to the BLE transport.
///
/// Every method returns immediately. Work runs on the runtime behind
/// `runtime`: one task per scan and one task per connection, with requests
/// for a connection served strictly one at a time in submission order.
/// Outcomes are delivered through [`Pending`] handles and mirrored to the
/// [`EventSink`].
#[derive(Debug)]
pub struct SessionController {
    transport: Arc<dyn BleTransport>,
    runtime: Handle,
    config: ControllerConfig,
    shared: Arc<Shared>,
}

impl SessionController {
    /// Creates a controller that runs its I/O on `runtime`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn BleTransport>,
        sink: EventSink,
        runtime: Handle,
        config: ControllerConfig,
    ) -> Self {
        let (devices, _) = watch::channel(Arc::new(DiscoveryResult::default()));
        Self {
            transport,
            runtime,
            config,
            shared: Arc::new(Shared {
                sink,
                slots: Mutex::new(Slots::default()),
                devices,
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.slots().state
    }

    /// Returns the result of the most recent completed scan.
    #[must_use]
    pub fn devices(&self) -> Arc<DiscoveryResult> {
        Arc::clone(&self.shared.devices.borrow())
    }

    /// Subscribes to device-list replacements.
    #[must_use]
    pub fn watch_devices(&self) -> watch::Receiver<Arc<DiscoveryResult>> {
        self.shared.devices.subscribe()
    }

    /// Returns the device at a 1-based position in the current device list.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoSuchDevice`] when the position is out of range.
    pub fn device(&self, position: usize) -> Result<DeviceHandle, SessionError> {
        position
            .checked_sub(1)
            .and_then(|index| self.devices().devices().get(index).cloned())
            .ok_or(SessionError::NoSuchDevice { index: position })
    }

    /// Returns the device of the live or pending connection, if any.
    #[must_use]
    pub fn connected_device(&self) -> Option<DeviceHandle> {
        self.shared
            .slots()
            .connection
            .as_ref()
            .map(|connection| connection.device.clone())
    }

    /// Starts a bounded discovery scan.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyActive`] while another scan or a
    /// connection is active.
    #[instrument(skip(self), level = "debug")]
    pub fn start_scan(&self, request: ScanRequest) -> Result<Pending<DiscoveryResult>, SessionError> {
        let cancel = CancellationToken::new();
        let admitted = {
            let mut slots = self.shared.slots();
            match slots.busy() {
                Some(resource) => Err(resource),
                None => {
                    let id = slots.allocate_id();
                    slots.scan = Some(ScanSlot {
                        id,
                        cancel: cancel.clone(),
                    });
                    slots.state = SessionState::Scanning;
                    Ok(id)
                }
            }
        };
        let id = admitted.map_err(|resource| self.reject(SessionError::AlreadyActive(resource)))?;

        let (reply, receiver) = oneshot::channel();
        let transport = Arc::clone(&self.transport);
        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(async move {
            let outcome = run_discovery(transport.as_ref(), &request, &cancel, &shared.sink).await;
            match &outcome {
                Ok(result) => {
                    shared.devices.send_replace(Arc::new(result.clone()));
                }
                Err(error) => shared.sink.report_error(error),
            }
            shared.finish_scan(id);
            let _ = reply.send(outcome);
        });
        Ok(Pending::new(receiver))
    }

    /// Cancels the running scan. Returns `false` when no scan was running.
    pub fn stop_scan(&self) -> bool {
        match self.shared.slots().scan.as_ref() {
            Some(scan) => {
                scan.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Connects to a discovered device and enumerates it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyActive`] while a scan runs or another
    /// connection is live.
    #[instrument(skip(self, device), level = "debug", fields(address = device.address()))]
    pub fn connect(&self, device: &DeviceHandle) -> Result<Pending<ConnectionReport>, SessionError> {
        let shutdown = CancellationToken::new();
        let (requests, request_queue) = mpsc::unbounded_channel();
        let (finished, finished_receiver) = watch::channel(false);
        let admitted = {
            let mut slots = self.shared.slots();
            match slots.busy() {
                Some(resource) => Err(resource),
                None => {
                    let id = slots.allocate_id();
                    slots.connection = Some(ConnectionSlot {
                        id,
                        device: device.clone(),
                        requests,
                        shutdown: shutdown.clone(),
                        finished: finished_receiver,
                    });
                    slots.state = SessionState::Connecting;
                    Ok(id)
                }
            }
        };
        let id = admitted.map_err(|resource| self.reject(SessionError::AlreadyActive(resource)))?;

        let (reply, receiver) = oneshot::channel();
        let driver = ConnectionDriver {
            id,
            session: ConnectionSession::new(device.clone(), self.shared.sink.clone()),
            transport: Arc::clone(&self.transport),
            shared: Arc::clone(&self.shared),
            requests: request_queue,
            shutdown,
            config: self.config,
            finished,
        };
        self.runtime.spawn(driver.run(reply));
        Ok(Pending::new(receiver))
    }

    /// Tears down the live connection.
    ///
    /// Resolves once the connection is fully closed. Disconnecting while idle
    /// succeeds immediately.
    #[instrument(skip(self), level = "debug")]
    pub fn disconnect(&self) -> Pending<()> {
        let finished = {
            let mut guard = self.shared.slots();
            let slots = &mut *guard;
            slots.connection.as_ref().map(|connection| {
                connection.shutdown.cancel();
                slots.state = SessionState::Disconnecting;
                connection.finished.clone()
            })
        };

        let (reply, receiver) = oneshot::channel();
        match finished {
            Some(mut finished) => {
                self.runtime.spawn(async move {
                    // A dropped sender also means the connection task ended.
                    let _ = finished.wait_for(|done| *done).await;
                    let _ = reply.send(Ok(()));
                });
            }
            None => {
                let _ = reply.send(Ok(()));
            }
        }
        Pending::new(receiver)
    }

    /// Reads a characteristic from the read partition.
    pub fn read_characteristic(&self, uuid: &str) -> Pending<Vec<u8>> {
        let (reply, receiver) = oneshot::channel();
        match self.checked_uuid(uuid) {
            Ok(uuid) => self.submit(Request::Read { uuid, reply }),
            Err(error) => self.fail_now(reply, error),
        }
        Pending::new(receiver)
    }

    /// Decodes `text` with `encoding` and writes it to a characteristic from
    /// the write partition. Bad input is rejected before any I/O.
    pub fn write_characteristic(
        &self,
        uuid: &str,
        text: &str,
        encoding: WriteEncoding,
    ) -> Pending<()> {
        let (reply, receiver) = oneshot::channel();
        let checked = self.checked_uuid(uuid).and_then(|uuid| {
            let payload = decode_payload(text, encoding)?;
            Ok((uuid, payload))
        });
        match checked {
            Ok((uuid, payload)) => self.submit(Request::Write {
                uuid,
                payload,
                reply,
            }),
            Err(error) => self.fail_now(reply, error),
        }
        Pending::new(receiver)
    }

    /// Enables notifications or indications for a characteristic.
    pub fn subscribe(&self, uuid: &str) -> Pending<()> {
        let (reply, receiver) = oneshot::channel();
        match self.checked_uuid(uuid) {
            Ok(uuid) => self.submit(Request::Subscribe { uuid, reply }),
            Err(error) => self.fail_now(reply, error),
        }
        Pending::new(receiver)
    }

    /// Disables notifications for a characteristic.
    pub fn unsubscribe(&self, uuid: &str) -> Pending<()> {
        let (reply, receiver) = oneshot::channel();
        match self.checked_uuid(uuid) {
            Ok(uuid) => self.submit(Request::Unsubscribe { uuid, reply }),
            Err(error) => self.fail_now(reply, error),
        }
        Pending::new(receiver)
    }

    fn checked_uuid(&self, raw: &str) -> Result<String, SessionError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConfigurationError::EmptyUuid.into());
        }
        Ok(normalize_uuid(trimmed))
    }

    fn submit(&self, request: Request) {
        let sender = self
            .shared
            .slots()
            .connection
            .as_ref()
            .map(|connection| connection.requests.clone());
        let Some(sender) = sender else {
            request.fail_without_connection(&self.shared.sink);
            return;
        };
        if let Err(mpsc::error::SendError(request)) = sender.send(request) {
            request.fail(SessionError::SessionClosed, &self.shared.sink);
        }
    }

    fn fail_now<T>(&self, reply: Reply<T>, error: SessionError) {
        deliver(reply, Err(error), &self.shared.sink);
    }

    fn reject(&self, error: SessionError) -> SessionError {
        self.shared.sink.report_error(&error);
        error
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        let slots = self.shared.slots();
        if let Some(scan) = slots.scan.as_ref() {
            scan.cancel.cancel();
        }
        if let Some(connection) = slots.connection.as_ref() {
            connection.shutdown.cancel();
        }
    }
}

enum Teardown {
    Requested,
    LinkLost,
}

/// The I/O context of one connection. Owns the session exclusively.
struct ConnectionDriver {
    id: u64,
    session: ConnectionSession,
    transport: Arc<dyn BleTransport>,
    shared: Arc<Shared>,
    requests: mpsc::UnboundedReceiver<Request>,
    shutdown: CancellationToken,
    config: ControllerConfig,
    finished: watch::Sender<bool>,
}

impl ConnectionDriver {
    async fn run(mut self, reply: Reply<ConnectionReport>) {
        let grace = self.config.grace_period;
        let connected = with_grace(
            self.session.connect(self.transport.as_ref()),
            &self.shutdown,
            grace,
        )
        .await;

        let feed = match connected {
            Some(Ok((report, feed))) => {
                self.shared.mark_connected(self.id);
                deliver(reply, Ok(report), &self.shared.sink);
                feed
            }
            Some(Err(error)) => {
                deliver(reply, Err(error), &self.shared.sink);
                self.finish(false);
                return;
            }
            None => {
                let error = SessionError::transport(
                    Operation::Connect,
                    TransportError::GracePeriodElapsed,
                );
                deliver(reply, Err(error), &self.shared.sink);
                self.disconnect_within_grace().await;
                self.finish(false);
                return;
            }
        };

        match self.serve(feed).await {
            Teardown::Requested => self.disconnect_within_grace().await,
            Teardown::LinkLost => self.session.handle_link_lost(),
        }
        self.finish(true);
    }

    async fn serve(&mut self, mut feed: NotificationFeed) -> Teardown {
        let mut poll = interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Teardown::Requested,
                notification = feed.next() => match notification {
                    Some(notification) => self.session.handle_notification(&notification),
                    None => {
                        debug!("notification stream ended");
                        return Teardown::LinkLost;
                    }
                },
                request = self.requests.recv() => match request {
                    Some(request) => {
                        if self.execute(request).await {
                            return Teardown::LinkLost;
                        }
                    }
                    None => return Teardown::Requested,
                },
                _ = poll.tick() => {
                    if !self.session.is_alive().await {
                        return Teardown::LinkLost;
                    }
                }
            }
        }
    }

    /// Runs one request to completion. Returns whether the link was lost.
    async fn execute(&mut self, request: Request) -> bool {
        let grace = self.config.grace_period;
        let shutdown = &self.shutdown;
        let session = &mut self.session;
        let sink = &self.shared.sink;

        match request {
            Request::Read { uuid, reply } => {
                let outcome = with_grace(session.read(&uuid), shutdown, grace)
                    .await
                    .unwrap_or_else(|| Err(grace_elapsed(Operation::Read, &uuid)));
                deliver(reply, outcome, sink)
            }
            Request::Write {
                uuid,
                payload,
                reply,
            } => {
                let outcome = with_grace(session.write(&uuid, &payload), shutdown, grace)
                    .await
                    .unwrap_or_else(|| Err(grace_elapsed(Operation::Write, &uuid)));
                deliver(reply, outcome, sink)
            }
            Request::Subscribe { uuid, reply } => {
                let outcome = with_grace(session.subscribe(&uuid), shutdown, grace)
                    .await
                    .unwrap_or_else(|| Err(grace_elapsed(Operation::Subscribe, &uuid)));
                deliver(reply, outcome, sink)
            }
            Request::Unsubscribe { uuid, reply } => {
                let outcome = with_grace(session.unsubscribe(&uuid), shutdown, grace)
                    .await
                    .unwrap_or_else(|| Err(grace_elapsed(Operation::Unsubscribe, &uuid)));
                deliver(reply, outcome, sink)
            }
        }
    }

    async fn disconnect_within_grace(&mut self) {
        if timeout(self.config.grace_period, self.session.disconnect())
            .await
            .is_err()
        {
            warn!("disconnect did not finish within the grace period");
            self.session.abandon();
            self.shared.sink.status("Disconnected", Severity::Info);
        }
    }

    fn finish(mut self, was_connected: bool) {
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            if was_connected {
                request.fail(SessionError::SessionClosed, &self.shared.sink);
            } else {
                request.fail_without_connection(&self.shared.sink);
            }
        }
        debug!(
            state = %self.session.state(),
            subscriptions = self.session.subscription_count(),
            "connection task finished"
        );
        self.shared.finish_connection(self.id);
        self.finished.send_replace(true);
    }
}

/// Runs `operation` to completion unless `shutdown` fires, after which it
/// gets at most `grace` more time. Returns `None` when the grace period ran
/// out.
async fn with_grace<F: Future>(
    operation: F,
    shutdown: &CancellationToken,
    grace: Duration,
) -> Option<F::Output> {
    tokio::pin!(operation);
    tokio::select! {
        biased;
        output = &mut operation => Some(output),
        () = shutdown.cancelled() => timeout(grace, operation).await.ok(),
    }
}

fn grace_elapsed(operation: Operation, uuid: &str) -> SessionError {
    SessionError::transport_for(operation, uuid, TransportError::GracePeriodElapsed)
}

#[cfg(test)]
mod tests {
    use std::future::pending;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn pending_reports_closed_when_the_task_drops_its_reply() {
        let (reply, receiver) = oneshot::channel::<Result<(), SessionError>>();
        let mut pending = Pending::new(receiver);
        assert!(pending.try_take().is_none());

        drop(reply);

        assert_matches!(pending.try_take(), Some(Err(SessionError::SessionClosed)));
    }

    #[tokio::test]
    async fn pending_resolves_with_the_delivered_outcome() {
        let (reply, receiver) = oneshot::channel();
        let pending = Pending::new(receiver);

        reply.send(Ok(7_u8)).expect("receiver alive");

        assert_eq!(7, pending.await.expect("outcome"));
    }

    #[tokio::test(start_paused = true)]
    async fn with_grace_lets_in_flight_work_finish() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let output = with_grace(
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                "done"
            },
            &shutdown,
            Duration::from_secs(3),
        )
        .await;

        assert_eq!(Some("done"), output);
    }

    #[tokio::test(start_paused = true)]
    async fn with_grace_gives_up_after_the_grace_period() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let output = with_grace(pending::<()>(), &shutdown, Duration::from_secs(3)).await;

        assert_eq!(None, output);
    }

    #[test]
    fn controller_config_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(Duration::from_millis(100), config.poll_interval());
        assert_eq!(Duration::from_secs(3), config.grace_period());
    }
}
