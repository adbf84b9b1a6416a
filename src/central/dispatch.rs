use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use super::context::BleCentral;
use crate::error::GattError;
use crate::hw::PlatformEventSource;

/// Producing half of an application-facing event stream.
#[derive(Debug)]
pub(crate) struct EventSender<T> {
    sender: mpsc::UnboundedSender<T>,
}

impl<T> EventSender<T> {
    /// Delivers an event. A dropped receiver is not an error; the event is discarded.
    pub(crate) fn emit(&self, event: T) {
        if self.sender.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }
}

/// Ordered stream of events for one scan, connection, or subscription.
///
/// The stream ends after its terminal event, or when the owning handle is closed.
#[derive(Debug)]
pub struct EventStream<T> {
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> EventStream<T> {
    /// Returns an already delivered event without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`mpsc::error::TryRecvError::Empty`] when nothing is queued and
    /// [`mpsc::error::TryRecvError::Disconnected`] once the stream has ended.
    pub fn try_recv(&mut self) -> Result<T, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Drains every queued event without waiting.
    pub fn drain_ready(&mut self) -> Vec<T> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

pub(crate) fn event_channel<T>() -> (EventSender<T>, EventStream<T>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (EventSender { sender }, EventStream { receiver })
}

pub(crate) type Responder<T> = oneshot::Sender<Result<T, GattError>>;

/// Future resolving with the outcome of one GATT request.
///
/// Resolves with [`GattError::Cancelled`] if the connection is closed before
/// the platform answers.
#[derive(Debug)]
#[must_use = "a GATT request reports its outcome only when awaited"]
pub struct GattRequest<T> {
    state: RequestState<T>,
}

#[derive(Debug)]
enum RequestState<T> {
    Ready(Option<Result<T, GattError>>),
    Pending(oneshot::Receiver<Result<T, GattError>>),
}

impl<T> GattRequest<T> {
    pub(crate) fn ready(result: Result<T, GattError>) -> Self {
        Self {
            state: RequestState::Ready(Some(result)),
        }
    }

    pub(crate) fn pending() -> (Responder<T>, Self) {
        let (sender, receiver) = oneshot::channel();
        (
            sender,
            Self {
                state: RequestState::Pending(receiver),
            },
        )
    }
}

impl<T: Unpin> Future for GattRequest<T> {
    type Output = Result<T, GattError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            RequestState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(GattError::Cancelled)))
            }
            RequestState::Pending(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|outcome| outcome.unwrap_or(Err(GattError::Cancelled))),
        }
    }
}

pub(crate) fn resolve<T>(responder: Responder<T>, result: Result<T, GattError>) {
    if responder.send(result).is_err() {
        trace!("GATT request future dropped before completion");
    }
}

/// Handle to the background task pumping platform callbacks into a [`BleCentral`].
#[derive(Debug)]
pub struct DispatcherHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    pub(crate) fn spawn(central: BleCentral, source: PlatformEventSource) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_dispatch_loop(central, source, cancel.clone()));
        Self { cancel, task }
    }

    /// Stops pumping; callbacks still queued are discarded.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Waits for the pump to finish after [`Self::shutdown`] or after every sink is dropped.
    pub async fn join(self) {
        if let Err(error) = self.task.await {
            debug!(?error, "platform dispatcher task ended abnormally");
        }
    }
}

#[instrument(skip_all, level = "debug")]
async fn run_dispatch_loop(
    central: BleCentral,
    mut source: PlatformEventSource,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("platform dispatcher cancelled");
                break;
            }
            maybe_event = source.recv() => {
                let Some(event) = maybe_event else {
                    debug!("platform event channel closed");
                    break;
                };
                central.handle_platform_event(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tokio_stream::StreamExt;

    use super::*;

    #[tokio::test]
    async fn stream_ends_when_sender_is_dropped() {
        let (sender, mut stream) = event_channel();
        sender.emit(1u8);
        sender.emit(2u8);
        drop(sender);

        assert_eq!(vec![1, 2], (&mut stream).collect::<Vec<_>>().await);
        assert_matches!(
            stream.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        );
    }

    #[tokio::test]
    async fn pending_request_resolves_cancelled_when_responder_drops() {
        let (responder, request) = GattRequest::<Vec<u8>>::pending();
        drop(responder);

        assert_eq!(Err(GattError::Cancelled), request.await);
    }

    #[tokio::test]
    async fn pending_request_resolves_with_sent_value() {
        let (responder, request) = GattRequest::pending();
        resolve(responder, Ok(vec![0x0A]));

        assert_eq!(Ok(vec![0x0A]), request.await);
    }

    #[tokio::test]
    async fn ready_request_resolves_immediately() {
        let request = GattRequest::<()>::ready(Err(GattError::NotConnected));

        assert_eq!(Err(GattError::NotConnected), request.await);
    }
}
