use anyhow::{bail, Context as AnyhowContext};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::bottle::Bottle;
use crate::carrier::{CarrierRegistry, Election};
use crate::name::NameResolver;
use crate::net::TcpTwoWay;
use crate::protocol::connection_state::ConnectionState;
use crate::protocol::input_unit::{InboundHandler, InputUnit};
use crate::protocol::OutputConnection;

use super::config::PortConfig;
use super::events::{EventReporter, PortEvent};
use super::mailbox::{Delivery, Mailbox};
use super::route::{Contact, Route};

/// Process-wide carrier context: the registry, the multicast sender election and the
///  name-resolution collaborator, constructed once at startup and passed by handle into
///  every port - no ambient globals. Registration of additional carrier prototypes
///  happens before the first `open`; lookups afterwards are read-only and concurrent.
pub struct PortContext {
    registry: CarrierRegistry,
    election: Arc<Election<String>>,
    resolver: Arc<dyn NameResolver>,
    next_id: AtomicU64,
}

impl PortContext {
    pub fn new(resolver: Arc<dyn NameResolver>) -> Arc<PortContext> {
        PortContext::with_registry(CarrierRegistry::with_defaults(), resolver)
    }

    pub fn with_registry(registry: CarrierRegistry, resolver: Arc<dyn NameResolver>) -> Arc<PortContext> {
        Arc::new(PortContext {
            registry,
            election: Arc::new(Election::default()),
            resolver,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn registry(&self) -> &CarrierRegistry {
        &self.registry
    }

    pub fn election(&self) -> &Arc<Election<String>> {
        &self.election
    }

    pub fn resolver(&self) -> &Arc<dyn NameResolver> {
        &self.resolver
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Callback sink for inbound messages. Invoked synchronously on the delivering
///  connection's worker task; a reply-capable message carries a [`Replier`].
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
    async fn on_message(&self, route: &Route, bottle: Bottle, replier: Option<Replier>);
}

/// One-shot reply handle for an inbound RPC message. Dropping it unreplied releases the
///  connection with an empty reply.
pub struct Replier {
    tx: oneshot::Sender<Bottle>,
}

impl Replier {
    pub fn reply(self, bottle: Bottle) {
        self.tx.send(bottle).ok();
    }
}

struct Structural {
    inputs: FxHashMap<u64, InputUnit>,
    outputs: FxHashMap<Route, Arc<OutputConnection>>,
    accept_handle: Option<JoinHandle<()>>,
    closed: bool,
}

struct PortInner {
    context: Arc<PortContext>,
    config: Arc<PortConfig>,
    name: std::sync::Mutex<Option<String>>,
    local: std::sync::Mutex<Option<Contact>>,
    structural: Mutex<Structural>,
    mailbox: Mailbox,
    callback: std::sync::Mutex<Option<Arc<dyn MessageSink>>>,
    pending_reply: std::sync::Mutex<Option<oneshot::Sender<Bottle>>>,
    events: EventReporter,
    shutdown: watch::Sender<bool>,
    interrupt: Notify,
}

/// The heart of a port: the per-endpoint connection manager. Owns the inbound worker set
///  and the outbound connection set, serializes structural changes under one lock, and
///  implements the port's send / receive / reply semantics on top of them. Steady-state
///  I/O on an established connection never takes the structural lock.
pub struct PortCore {
    inner: Arc<PortInner>,
}

impl PortCore {
    pub fn new(context: Arc<PortContext>) -> PortCore {
        PortCore::with_config(context, PortConfig::default())
    }

    pub fn with_config(context: Arc<PortContext>, config: PortConfig) -> PortCore {
        let (shutdown, _) = watch::channel(false);
        PortCore {
            inner: Arc::new(PortInner {
                context,
                config: Arc::new(config),
                name: std::sync::Mutex::new(None),
                local: std::sync::Mutex::new(None),
                structural: Mutex::new(Structural {
                    inputs: FxHashMap::default(),
                    outputs: FxHashMap::default(),
                    accept_handle: None,
                    closed: false,
                }),
                mailbox: Mailbox::default(),
                callback: std::sync::Mutex::new(None),
                pending_reply: std::sync::Mutex::new(None),
                events: EventReporter::default(),
                shutdown,
                interrupt: Notify::new(),
            }),
        }
    }

    /// Register the port under `name`, bind the listening face and start serving inbound
    ///  connections. Fails if the name is already bound locally, if registration is
    ///  rejected, or - fatally for startup - if no listening address can be obtained.
    pub async fn open(&self, name: &str) -> anyhow::Result<()> {
        let inner = &self.inner;
        {
            let structural = inner.structural.lock().await;
            if structural.closed {
                bail!("port has been closed");
            }
        }
        if inner.name.lock().unwrap().is_some() {
            bail!("port is already open");
        }

        let listener = TcpListener::bind(inner.config.bind_addr)
            .await
            .context("no usable listening address")?;
        let local_addr = listener.local_addr()?;
        let contact = Contact::new(local_addr.ip().to_string(), local_addr.port());

        inner
            .context
            .resolver
            .register(name, contact.clone())
            .await
            .with_context(|| format!("registering port name {:?}", name))?;

        *inner.name.lock().unwrap() = Some(name.to_string());
        *inner.local.lock().unwrap() = Some(contact);

        let accept_inner = inner.clone();
        let shutdown = inner.shutdown.subscribe();
        let handle = tokio::spawn(accept_loop(accept_inner, listener, shutdown));
        inner.structural.lock().await.accept_handle = Some(handle);

        info!("port {:?} listening on {:?}", name, local_addr);
        Ok(())
    }

    pub fn name(&self) -> Option<String> {
        self.inner.name.lock().unwrap().clone()
    }

    pub fn local_contact(&self) -> Option<Contact> {
        self.inner.local.lock().unwrap().clone()
    }

    /// Resolve `dest` and connect to it with `carrier` (empty = the contact's hint, or
    ///  `tcp`). Idempotent per distinct route: a request for an identical route is a
    ///  success no-op.
    pub async fn add_output(&self, dest: &str, carrier: &str) -> anyhow::Result<()> {
        let inner = &self.inner;
        let from = self.name().context("port is not open")?;

        let contact = inner
            .context
            .resolver
            .resolve(dest)
            .await
            .with_context(|| format!("resolving destination {:?}", dest))?;
        let carrier = if carrier.is_empty() {
            contact.carrier_hint.clone().unwrap_or_else(|| "tcp".to_string())
        } else {
            carrier.to_string()
        };
        let route = Route::new(from, dest, carrier);

        if inner.structural.lock().await.outputs.contains_key(&route) {
            debug!("output {} already exists", route);
            return Ok(());
        }

        let id = inner.context.next_id();
        let connection = OutputConnection::connect(
            inner.context.registry(),
            inner.context.election().clone(),
            id,
            route.clone(),
            &contact,
            inner.config.clone(),
        )
        .await?;

        let mut connection = Some(connection);
        let mut structural = inner.structural.lock().await;
        if structural.closed {
            drop(structural);
            connection.take().unwrap().close().await;
            bail!("port has been closed");
        }
        if !structural.outputs.contains_key(&route) {
            structural.outputs.insert(route.clone(), Arc::new(connection.take().unwrap()));
        }
        drop(structural);
        match connection {
            // lost a race against an identical request - still a success
            Some(duplicate) => duplicate.close().await,
            None => inner.events.report(PortEvent::OutputAdded(route)),
        }
        Ok(())
    }

    /// Tear down the matching outbound connection. Safe to call concurrently with
    ///  ongoing traffic on other connections - only the targeted entry is touched.
    pub async fn remove_output(&self, route: &Route) -> bool {
        let removed = self.inner.structural.lock().await.outputs.remove(route);
        match removed {
            Some(connection) => {
                connection.close().await;
                self.inner.events.report(PortEvent::OutputRemoved(route.clone()));
                true
            }
            None => false,
        }
    }

    /// Ask the matching inbound worker to stop; it removes itself once its loop exits.
    pub async fn remove_input(&self, route: &Route) -> bool {
        let structural = self.inner.structural.lock().await;
        let mut found = false;
        for unit in structural.inputs.values() {
            if unit.route() == route {
                unit.request_stop();
                found = true;
            }
        }
        found
    }

    /// Fan-out write: a snapshot of the outbound set is taken under the lock, the writes
    ///  happen outside it, so a slow peer cannot block connection-table changes. A
    ///  failing peer is reported, removed, and does not abort delivery to the others.
    /// Returns the number of outputs that accepted the message.
    pub async fn send(&self, bottle: &Bottle) -> usize {
        let outputs: Vec<Arc<OutputConnection>> =
            self.inner.structural.lock().await.outputs.values().cloned().collect();

        let mut delivered = 0;
        let mut broken: Vec<Route> = Vec::new();
        for connection in outputs {
            match connection.write(bottle).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("send on {} failed: {:#}", connection.route(), e);
                    self.inner.events.report(PortEvent::ConnectionError {
                        route: connection.route().clone(),
                        message: format!("{:#}", e),
                    });
                    broken.push(connection.route().clone());
                }
            }
        }
        for route in broken {
            self.remove_output(&route).await;
        }
        delivered
    }

    /// RPC write: send the command over the first reply-capable output and block for the
    ///  peer's reply.
    pub async fn send_with_reply(&self, bottle: &Bottle) -> anyhow::Result<Bottle> {
        let connection = {
            let structural = self.inner.structural.lock().await;
            structural
                .outputs
                .values()
                .find(|c| c.supports_reply())
                .cloned()
                .context("no reply-capable output connection")?
        };
        connection.write_with_reply(bottle).await
    }

    /// Blocking receive from the single-slot buffer: waits until a message is available,
    ///  the port is interrupted, or it closes (both yield `None`). With a callback
    ///  installed, inbound data never lands here.
    pub async fn receive(&self) -> Option<Bottle> {
        let inner = &self.inner;
        let mut shutdown = inner.shutdown.subscribe();
        loop {
            if let Some(delivery) = inner.mailbox.try_take() {
                *inner.pending_reply.lock().unwrap() = delivery.replier;
                return Some(delivery.bottle);
            }
            if *shutdown.borrow() {
                return None;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => return None,
                _ = inner.interrupt.notified() => return None,
                _ = inner.mailbox.wait() => {}
            }
        }
    }

    pub fn try_receive(&self) -> Option<Bottle> {
        let delivery = self.inner.mailbox.try_take()?;
        *self.inner.pending_reply.lock().unwrap() = delivery.replier;
        Some(delivery.bottle)
    }

    /// Answer the most recently received message. Fails when that message's connection
    ///  cannot carry a reply (or there is nothing to answer) - never a crash.
    pub fn reply(&self, bottle: Bottle) -> anyhow::Result<()> {
        match self.inner.pending_reply.lock().unwrap().take() {
            Some(tx) => {
                tx.send(bottle).ok();
                Ok(())
            }
            None => bail!("no reply-capable message awaiting a reply"),
        }
    }

    /// Install the asynchronous delivery callback. Takes effect for messages decoded
    ///  after the call; the single-slot buffer is bypassed from then on.
    pub fn set_callback(&self, sink: Arc<dyn MessageSink>) {
        *self.inner.callback.lock().unwrap() = Some(sink);
    }

    pub fn subscribe_events(&self) -> mpsc::UnboundedReceiver<PortEvent> {
        self.inner.events.subscribe()
    }

    pub async fn connections(&self) -> (Vec<Route>, Vec<Route>) {
        let structural = self.inner.structural.lock().await;
        let inputs = structural.inputs.values().map(|u| u.route().clone()).collect();
        let outputs = structural.outputs.keys().cloned().collect();
        (inputs, outputs)
    }

    /// Unblock anything parked in [`receive`](PortCore::receive). The port keeps
    ///  running; the parked call returns `None` (a drop, not an error).
    pub fn interrupt(&self) {
        self.inner.interrupt.notify_waiters();
    }

    /// Stop accepting, stop every inbound worker and wait for their loops to exit, tear
    ///  down all outputs, unregister the name. No worker touches port state after this
    ///  returns. Safe to call twice.
    pub async fn close(&self) {
        let inner = &self.inner;
        inner.shutdown.send(true).ok();
        inner.interrupt.notify_waiters();

        let (accept_handle, inputs, outputs) = {
            let mut structural = inner.structural.lock().await;
            structural.closed = true;
            (
                structural.accept_handle.take(),
                structural.inputs.drain().map(|(_, unit)| unit).collect::<Vec<_>>(),
                structural.outputs.drain().map(|(_, c)| c).collect::<Vec<_>>(),
            )
        };

        if let Some(handle) = accept_handle {
            handle.await.ok();
        }
        for unit in &inputs {
            unit.request_stop();
        }
        for unit in inputs {
            unit.join().await;
        }
        for connection in outputs {
            connection.close().await;
        }

        let name = inner.name.lock().unwrap().take();
        if let Some(name) = name {
            inner.context.resolver.unregister(&name).await;
            info!("port {:?} closed", name);
        }
    }
}

async fn accept_loop(inner: Arc<PortInner>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
    loop {
        let (stream, peer) = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            r = listener.accept() => match r {
                Ok(x) => x,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    continue;
                }
            },
        };
        trace!("incoming connection from {:?}", peer);
        let inner = inner.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(handle_incoming(inner, stream, peer, shutdown));
    }
}

async fn handle_incoming(
    inner: Arc<PortInner>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: watch::Receiver<bool>,
) {
    let local_addr = match stream.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("dropping connection from {:?}: {}", peer, e);
            return;
        }
    };
    let local_name = inner.name.lock().unwrap().clone().unwrap_or_default();

    let handshake = tokio::time::timeout(
        inner.config.handshake_timeout,
        ConnectionState::open_acceptor(
            inner.context.registry(),
            &local_name,
            Box::new(TcpTwoWay::new(stream)),
            local_addr,
            peer,
            inner.config.clone(),
        ),
    );
    let state = match handshake.await.map_err(anyhow::Error::from).and_then(|r| r) {
        Ok(state) => state,
        Err(e) => {
            debug!("handshake with {:?} failed: {:#}", peer, e);
            inner.events.report(PortEvent::ConnectionError {
                route: Route::new("?", local_name, "?"),
                message: format!("{:#}", e),
            });
            return;
        }
    };

    let id = inner.context.next_id();
    let route = state.route().clone();
    let (ready_tx, ready_rx) = oneshot::channel();
    let handler: Arc<dyn InboundHandler> = inner.clone();
    let unit = InputUnit::spawn(id, state, handler, shutdown, ready_rx);

    {
        let mut structural = inner.structural.lock().await;
        if structural.closed {
            drop(structural);
            unit.request_stop();
            ready_tx.send(()).ok();
            unit.join().await;
            return;
        }
        structural.inputs.insert(id, unit);
    }
    ready_tx.send(()).ok();
    inner.events.report(PortEvent::InputAdded(route));
}

#[async_trait]
impl InboundHandler for PortInner {
    async fn deliver(&self, delivery: Delivery) {
        let callback = self.callback.lock().unwrap().clone();
        match callback {
            Some(sink) => {
                let replier = delivery.replier.map(|tx| Replier { tx });
                sink.on_message(&delivery.route, delivery.bottle, replier).await;
            }
            None => self.mailbox.put(delivery),
        }
    }

    async fn finished(&self, id: u64, route: Route, error: Option<String>) {
        let removed = self.structural.lock().await.inputs.remove(&id);
        if removed.is_some() {
            self.events.report(PortEvent::InputRemoved(route.clone()));
        }
        if let Some(message) = error {
            warn!("input on {} dropped: {}", route, message);
            self.events.report(PortEvent::ConnectionError { route, message });
        }
    }
}
