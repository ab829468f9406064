//! Owns the single copy of the book and facade. Earlier drafts of this
//! engine wrapped `OrderBook` in `Arc<Mutex<_>>` so every connection handler
//! could reach in directly; per the single-threaded-cooperative
//! serializer model, that mutex is redundant — one task owns `OrderBook`
//! and `SessionFacade` outright and every connection talks to it over an
//! `mpsc` channel instead of taking a lock.

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::facade::{FacadeConfig, SessionFacade};
use crate::orderbook::OrderBook;

/// One decoded wire message plus a channel to deliver its encoded
/// response(s) back to whichever connection submitted it. A single request
/// can yield more than one response when it sets off a stop cascade.
pub struct Request {
    pub raw: Vec<u8>,
    pub respond_to: oneshot::Sender<Vec<Vec<u8>>>,
}

/// A handle connection tasks hold to submit work to the serializer.
#[derive(Clone)]
pub struct Handle {
    sender: mpsc::Sender<Request>,
}

impl Handle {
    /// Submits `raw` for processing and waits for the encoded response(s).
    /// Fails only if the serializer task has shut down.
    pub async fn submit(&self, raw: Vec<u8>) -> Option<Vec<Vec<u8>>> {
        let (respond_to, recv) = oneshot::channel();
        self.sender.send(Request { raw, respond_to }).await.ok()?;
        recv.await.ok()
    }
}

/// Owns `OrderBook` and `SessionFacade`; the sole writer of book state.
pub struct Serializer {
    book: OrderBook,
    facade: SessionFacade,
    receiver: mpsc::Receiver<Request>,
}

/// Spawns the serializer task and returns a cloneable `Handle` for
/// connection tasks to submit requests through. `channel_capacity` bounds
/// how many in-flight requests can queue before senders start backing off.
pub fn spawn_serializer(config: FacadeConfig, channel_capacity: usize) -> Handle {
    let (sender, receiver) = mpsc::channel(channel_capacity);
    let serializer = Serializer {
        book: OrderBook::new(),
        facade: SessionFacade::new(config),
        receiver,
    };
    tokio::spawn(serializer.run());
    Handle { sender }
}

impl Serializer {
    async fn run(mut self) {
        info!("serializer task started");
        while let Some(request) = self.receiver.recv().await {
            let response = self.facade.process_message(&mut self.book, &request.raw);
            if request.respond_to.send(response).is_err() {
                warn!("connection dropped before response delivered");
            }
        }
        info!("serializer task shutting down, channel closed");
    }
}
