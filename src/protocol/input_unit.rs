use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::bottle::Bottle;
use crate::carrier::Inbound;
use crate::port::mailbox::Delivery;
use crate::port::Route;

use super::connection_state::ConnectionState;

/// Where an input worker hands its results: decoded messages while the connection is
///  healthy, and a final notification when it winds down (peer close, transport error or
///  a requested stop) so the owner can drop it from the connection table.
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    async fn deliver(&self, delivery: Delivery);

    /// `error` is `None` for an orderly stop.
    async fn finished(&self, id: u64, route: Route, error: Option<String>);
}

/// A worker bound to one accepted inbound connection: owns the [`ConnectionState`], runs
///  the receive loop on its own task and forwards decoded payloads to the handler. For
///  reply-capable connections the same socket carries the reply back upstream before the
///  message is acknowledged.
pub struct InputUnit {
    id: u64,
    route: Route,
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl InputUnit {
    /// The worker idles until `ready` resolves, giving the owner time to register the
    ///  returned handle before the first delivery can possibly race with it.
    pub fn spawn(
        id: u64,
        state: ConnectionState,
        handler: Arc<dyn InboundHandler>,
        shutdown: watch::Receiver<bool>,
        ready: oneshot::Receiver<()>,
    ) -> InputUnit {
        let route = state.route().clone();
        let stop = Arc::new(Notify::new());
        let handle = tokio::spawn(run(id, state, handler, shutdown, stop.clone(), ready));
        InputUnit { id, route, stop, handle }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn request_stop(&self) {
        self.stop.notify_one();
    }

    pub async fn join(self) {
        self.handle.await.ok();
    }
}

async fn run(
    id: u64,
    mut state: ConnectionState,
    handler: Arc<dyn InboundHandler>,
    mut shutdown: watch::Receiver<bool>,
    stop: Arc<Notify>,
    ready: oneshot::Receiver<()>,
) {
    ready.await.ok();

    let route = state.route().clone();
    let supports_reply = state.supports_reply();
    trace!("input worker {} starting on {}", id, route);

    let error: Option<String> = loop {
        if *shutdown.borrow() {
            break None;
        }

        let inbound = tokio::select! {
            biased;
            _ = shutdown.changed() => break None,
            _ = stop.notified() => break None,
            r = state.expect_message() => r,
        };

        let (bottle, want_reply) = match inbound {
            Err(e) => break Some(format!("{:#}", e)),
            Ok(Inbound::Skip) => continue,
            Ok(Inbound::Message { bottle, want_reply }) => (bottle, want_reply),
        };

        if want_reply && supports_reply {
            let (tx, rx) = oneshot::channel();
            handler
                .deliver(Delivery { route: route.clone(), bottle, replier: Some(tx) })
                .await;

            // a dropped replier releases us with an empty reply; port shutdown while a
            // reply is pending drops the connection instead
            let reply: Bottle = tokio::select! {
                biased;
                _ = shutdown.changed() => break None,
                _ = stop.notified() => break None,
                r = rx => r.unwrap_or_default(),
            };
            if let Err(e) = state.write_reply(&reply).await {
                break Some(format!("{:#}", e));
            }
        } else {
            handler
                .deliver(Delivery { route: route.clone(), bottle, replier: None })
                .await;
        }

        if let Err(e) = state.send_ack().await {
            break Some(format!("{:#}", e));
        }
    };

    debug!("input worker {} on {} finishing{}", id, route, match &error {
        Some(e) => format!(": {}", e),
        None => String::new(),
    });
    state.close().await;
    handler.finished(id, route, error).await;
}
