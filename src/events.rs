//! Event dispatch connecting the host runtime to the offline worker.
//!
//! Two event types exist: install (delivered once at startup) and fetch
//! (delivered per intercepted request). Listeners run synchronously in
//! registration order and park their asynchronous work on the event itself
//! — `wait_until` during install, `respond_with` during fetch — and the
//! host awaits whatever was parked after dispatch returns.

use crate::error::Result;
use crate::http::{Request, Response};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Asynchronous install work registered via [`InstallEvent::wait_until`].
pub type WaitFuture = BoxFuture<'static, Result<()>>;

/// The response a fetch listener promised via [`FetchEvent::respond_with`].
pub type ResponseFuture = BoxFuture<'static, Result<Response>>;

// ============================================================================
// Events
// ============================================================================

/// Lifecycle event that triggers precaching.
///
/// The installation phase stays open until every future registered through
/// `wait_until` has settled; all of them must succeed for the install to
/// count as successful.
pub struct InstallEvent {
    pending: Mutex<Vec<WaitFuture>>,
}

impl InstallEvent {
    fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Keep the installation phase alive until `fut` settles.
    ///
    /// May be called multiple times; the futures run after all listeners
    /// have returned, not inline.
    pub fn wait_until<F>(&self, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.pending.lock().unwrap().push(Box::pin(fut));
    }

    fn into_pending(self) -> Vec<WaitFuture> {
        self.pending.into_inner().unwrap()
    }
}

/// Per-request event that lets the worker claim and produce the response.
pub struct FetchEvent {
    request: Request,
    response: Mutex<Option<ResponseFuture>>,
}

impl FetchEvent {
    fn new(request: Request) -> Self {
        Self {
            request,
            response: Mutex::new(None),
        }
    }

    /// The intercepted request. Listeners clone what they need into the
    /// future they register.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Claim responsibility for this request. The claim itself is
    /// synchronous; the response resolves later when the host awaits the
    /// future. The first claim wins — later calls are dropped with a
    /// warning.
    pub fn respond_with<F>(&self, fut: F)
    where
        F: Future<Output = Result<Response>> + Send + 'static,
    {
        let mut slot = self.response.lock().unwrap();
        if slot.is_some() {
            warn!(
                method = %self.request.method,
                url = %self.request.url,
                "respond_with called twice for one fetch event, ignoring second claim"
            );
            return;
        }
        *slot = Some(Box::pin(fut));
    }

    /// Whether a listener has already claimed this request.
    pub fn is_claimed(&self) -> bool {
        self.response.lock().unwrap().is_some()
    }

    fn into_outcome(self) -> FetchDispatch {
        let FetchEvent { request, response } = self;
        match response.into_inner().unwrap() {
            Some(fut) => FetchDispatch::Claimed(fut),
            None => FetchDispatch::Unclaimed(request),
        }
    }
}

/// Result of dispatching a fetch event: either a listener claimed the
/// request and the host must await its future, or nobody did and the host
/// gets the request back for its default handling.
pub enum FetchDispatch {
    Claimed(ResponseFuture),
    Unclaimed(Request),
}

// ============================================================================
// Dispatcher
// ============================================================================

type InstallListener = Box<dyn Fn(&InstallEvent) + Send + Sync>;
type FetchListener = Box<dyn Fn(&FetchEvent) + Send + Sync>;

/// Process-wide dispatcher the worker registers its handlers on.
///
/// Only the two event types above exist; dispatching never blocks — all
/// asynchronous work lives in the futures handed back to the caller.
#[derive(Default)]
pub struct EventDispatcher {
    install_listeners: RwLock<Vec<InstallListener>>,
    fetch_listeners: RwLock<Vec<FetchListener>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a callback to the install event.
    pub fn on_install<F>(&self, listener: F)
    where
        F: Fn(&InstallEvent) + Send + Sync + 'static,
    {
        self.install_listeners.write().unwrap().push(Box::new(listener));
    }

    /// Subscribe a callback to fetch events.
    pub fn on_fetch<F>(&self, listener: F)
    where
        F: Fn(&FetchEvent) + Send + Sync + 'static,
    {
        self.fetch_listeners.write().unwrap().push(Box::new(listener));
    }

    /// Deliver the install event and return the registered install work.
    ///
    /// An empty vec means no listener extended the event; such an install
    /// completes trivially.
    pub fn dispatch_install(&self) -> Vec<WaitFuture> {
        let event = InstallEvent::new();
        let listeners = self.install_listeners.read().unwrap();
        debug!(listeners = listeners.len(), "dispatching install event");
        for listener in listeners.iter() {
            listener(&event);
        }
        drop(listeners);
        event.into_pending()
    }

    /// Deliver a fetch event for `request` and report whether anyone
    /// claimed it.
    pub fn dispatch_fetch(&self, request: Request) -> FetchDispatch {
        let event = FetchEvent::new(request);
        let listeners = self.fetch_listeners.read().unwrap();
        for listener in listeners.iter() {
            listener(&event);
        }
        drop(listeners);
        event.into_outcome()
    }

    pub fn install_listener_count(&self) -> usize {
        self.install_listeners.read().unwrap().len()
    }

    pub fn fetch_listener_count(&self) -> usize {
        self.fetch_listeners.read().unwrap().len()
    }
}
