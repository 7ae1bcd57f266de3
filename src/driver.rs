//! The driver: the public, synchronous-looking face of the protocol
//!
//! One driver owns one channel. Every public method is `&mut self`, so one
//! outstanding request per channel and single-flight refresh are structural
//! rather than policed at runtime. Mutating calls refresh the mirror
//! afterward; reads are served from cached snapshots.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::time::Instant;

use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::expr::Expr;
use crate::mirror::{Handle, Mirror, Predicate};
use crate::protocol::{ImageFormat, MouseButton, RemoteNode, Request, Response};
use crate::supervisor;
use crate::wire::{self, Liveness, WireClient, WrappedValue};

/// How long a capture is given to stabilize (two identical consecutive
/// frames) before the latest frame is returned as-is
const CAPTURE_STABILIZE_CAP: Duration = Duration::from_secs(5);
const CAPTURE_PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// Properties requested in every tree dump. The reconciliation heuristic
/// depends on these being present in snapshots.
const DEFAULT_PROP_NAMES: [&str; 6] = [
    "AutomationId",
    "AutomationName",
    "Name",
    "Title",
    "Width",
    "Height",
];

/// Starts the responder's listener inside the foreign process and tracks
/// its lifetime. Injection itself lives outside the protocol core.
pub trait Bootstrap: Send + 'static {
    /// Start (or re-kick) the responder for the given channel.
    ///
    /// Called once before the first connect attempt and again from the
    /// connect-retry hook, since a bootstrap can race process startup.
    fn bootstrap(&mut self, channel_id: &str) -> Result<()>;

    /// Responder process exit code; `None` while it is still running
    fn exit_code(&mut self) -> Option<i32>;
}

struct SharedBootstrap<B>(Arc<Mutex<B>>);

impl<B: Bootstrap> Liveness for SharedBootstrap<B> {
    fn exit_code(&mut self) -> Option<i32> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).exit_code()
    }
}

/// A connected session with one responder
pub struct Driver {
    channel_id: String,
    client: WireClient,
    mirror: Mirror,
    config: Config,
    prop_names: BTreeSet<String>,
}

impl Driver {
    /// Bootstrap a responder, connect to its channel and take the first
    /// tree dump.
    pub async fn launch<B: Bootstrap>(mut bootstrap: B, config: Config) -> Result<Driver> {
        let channel_id = paths::new_channel_id(std::process::id());
        tracing::info!(channel_id = %channel_id, "launching driver session");

        bootstrap.bootstrap(&channel_id)?;
        let shared = Arc::new(Mutex::new(bootstrap));

        let client = {
            let retry_state = Arc::clone(&shared);
            let retry_channel = channel_id.clone();
            WireClient::connect(
                &channel_id,
                config.timeouts.clone(),
                &config.retry,
                Box::new(SharedBootstrap(Arc::clone(&shared))),
                move |attempt| {
                    // The bootstrap may have raced process startup; kick it
                    // again before the next attempt.
                    tracing::debug!(attempt, "re-running bootstrap before reconnect");
                    let result = retry_state
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .bootstrap(&retry_channel);
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "bootstrap re-kick failed");
                    }
                },
            )
            .await?
        };

        let mut driver = Driver {
            channel_id,
            client,
            mirror: Mirror::new(&config.mirror),
            prop_names: DEFAULT_PROP_NAMES.iter().map(|s| s.to_string()).collect(),
            config,
        };
        driver.refresh().await?;
        Ok(driver)
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Take a fresh tree dump and integrate it into the mirror
    pub async fn refresh(&mut self) -> Result<()> {
        let request = Request::TreeDump {
            prop_names: self.prop_names.clone(),
        };
        match self.send(&request).await? {
            Response::Tree(nodes) => {
                tracing::debug!(nodes = nodes.len(), "mirror refreshed");
                self.mirror.refresh(nodes);
                Ok(())
            }
            other => Err(unexpected_reply("TreeDump", &other)),
        }
    }

    /// Wait until some remote object matches, checking the cached dump
    /// before touching the wire, then re-dumping on a backoff ladder.
    pub async fn wait_for<F>(&mut self, predicate: F) -> Result<Handle>
    where
        F: Fn(&RemoteNode) -> bool + Send + Sync + 'static,
    {
        let found = self.wait_for_at_least(1, Arc::new(predicate)).await?;
        Ok(found.into_iter().next().ok_or(Error::Internal(
            "lookup returned an empty non-empty match set".into(),
        ))?)
    }

    /// Wait until at least `min_count` remote objects match
    pub async fn wait_for_all<F>(&mut self, min_count: usize, predicate: F) -> Result<Vec<Handle>>
    where
        F: Fn(&RemoteNode) -> bool + Send + Sync + 'static,
    {
        self.wait_for_at_least(min_count.max(1), Arc::new(predicate))
            .await
    }

    async fn wait_for_at_least(
        &mut self,
        min_count: usize,
        predicate: Predicate,
    ) -> Result<Vec<Handle>> {
        let timeout_ms = self.config.timeouts.lookup_ms;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut attempt = 0usize;

        loop {
            let found = self.mirror.find_all(Arc::clone(&predicate));
            if found.len() >= min_count {
                return Ok(found);
            }
            if Instant::now() >= deadline {
                return Err(Error::LookupTimeout(timeout_ms));
            }
            tokio::time::sleep(supervisor::backoff_delay(attempt)).await;
            attempt += 1;
            self.refresh().await?;
        }
    }

    /// Evaluate an expression against the object behind a handle.
    ///
    /// A pending reply is polled until the invoke budget runs out; a stale
    /// reply triggers exactly one reconciliation and one retry.
    pub async fn invoke(&mut self, handle: &Handle, expr: &Expr) -> Result<WrappedValue> {
        let timeout_ms = self.config.timeouts.invoke_ms;
        let response = self
            .target_request(handle, |target_id| Request::InvokeInstance {
                target_id,
                code: expr.clone(),
                timeout_ms,
            })
            .await?;
        unwrap_value("InvokeInstance", response)
    }

    /// Evaluate an expression with no instance context
    pub async fn run(&mut self, expr: &Expr) -> Result<WrappedValue> {
        let request = Request::InvokeStatic { code: expr.clone() };
        let response = self.send_polling(&request).await?;
        unwrap_value("InvokeStatic", response)
    }

    /// Assign a property on the remote object, then refresh the mirror
    pub async fn set_property(
        &mut self,
        handle: &Handle,
        name: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        self.set_property_with(handle, name, WrappedValue::wrap("", value))
            .await
    }

    /// Assign a property with an explicit remote type annotation
    pub async fn set_property_with(
        &mut self,
        handle: &Handle,
        name: &str,
        value: WrappedValue,
    ) -> Result<()> {
        let response = self
            .target_request(handle, |target_id| Request::SetProperty {
                target_id,
                property_name: name.to_string(),
                property_value: value.clone(),
            })
            .await?;
        expect_success("SetProperty", response)?;
        self.refresh_after_action().await
    }

    /// Raise an event on the remote object; `get_event_args` builds the
    /// event payload on the responder side
    pub async fn raise_event(&mut self, handle: &Handle, get_event_args: &Expr) -> Result<()> {
        let response = self
            .target_request(handle, |target_id| Request::RaiseEvent {
                target_id,
                get_event_args: get_event_args.clone(),
            })
            .await?;
        expect_success("RaiseEvent", response)?;
        self.refresh_after_action().await
    }

    /// Synthesize a pointer click on the remote object
    pub async fn click(&mut self, handle: &Handle, button: MouseButton) -> Result<()> {
        let response = self
            .target_request(handle, |target_id| Request::SynthesizeClick {
                target_id,
                button,
            })
            .await?;
        expect_success("SynthesizeClick", response)?;
        self.refresh_after_action().await
    }

    /// Capture the target (or the whole surface when `handle` is `None`).
    ///
    /// Captures repeat until two consecutive frames are identical, so
    /// in-flight animations settle, capped at a few seconds.
    pub async fn capture_image(
        &mut self,
        handle: Option<&Handle>,
        format: ImageFormat,
    ) -> Result<Vec<u8>> {
        let deadline = Instant::now() + CAPTURE_STABILIZE_CAP;
        let mut previous: Option<String> = None;

        loop {
            let response = match handle {
                Some(h) => {
                    self.target_request(h, |target_id| Request::CaptureImage {
                        target_id: Some(target_id),
                        format,
                    })
                    .await?
                }
                None => {
                    self.send(&Request::CaptureImage {
                        target_id: None,
                        format,
                    })
                    .await?
                }
            };

            let frame = match response {
                Response::Image { base64_image } => base64_image,
                other => return Err(unexpected_reply("CaptureImage", &other)),
            };

            let settled = previous.as_deref() == Some(frame.as_str());
            if settled || Instant::now() >= deadline {
                if !settled {
                    tracing::debug!("capture did not settle, returning the latest frame");
                }
                return BASE64
                    .decode(frame.as_bytes())
                    .map_err(|e| Error::Internal(format!("invalid image payload: {e}")));
            }
            previous = Some(frame);
            tokio::time::sleep(CAPTURE_PROBE_INTERVAL).await;
        }
    }

    /// A property of the remote object, from the cached snapshot.
    ///
    /// A property outside the tracked set joins it and triggers one
    /// refresh, so later dumps carry it too.
    pub async fn property(
        &mut self,
        handle: &Handle,
        name: &str,
    ) -> Result<Option<serde_json::Value>> {
        if self.prop_names.insert(name.to_string()) {
            self.refresh().await?;
        }
        Ok(handle.property(name))
    }

    /// Run a target-addressed request with the stale policy: one
    /// reconciliation attempt, then one retry, then give up.
    async fn target_request(
        &mut self,
        handle: &Handle,
        make: impl Fn(u64) -> Request,
    ) -> Result<Response> {
        match self.target_request_once(handle, &make).await {
            Err(Error::HandleNoLongerValid) => {
                tracing::debug!("stale target, reconciling once");
                self.refresh().await?;
                self.target_request_once(handle, &make).await
            }
            other => other,
        }
    }

    async fn target_request_once(
        &mut self,
        handle: &Handle,
        make: &impl Fn(u64) -> Request,
    ) -> Result<Response> {
        let target_id = handle.target_id()?;
        let response = self.send_polling(&make(target_id)).await?;
        if response.is_stale() {
            return Err(Error::HandleNoLongerValid);
        }
        Ok(response)
    }

    /// Like [`Self::send`], but keeps polling while the responder reports a
    /// pending result, up to the invoke budget.
    async fn send_polling(&mut self, request: &Request) -> Result<Response> {
        let timeout_ms = self.config.timeouts.invoke_ms;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let interval = Duration::from_millis(self.config.retry.request_interval_ms);

        loop {
            let response = self.send(request).await?;
            if !response.is_pending() {
                return Ok(response);
            }
            if Instant::now() >= deadline {
                return Err(Error::InvokeTimeout(timeout_ms));
            }
            tracing::debug!(kind = request.kind(), "responder is mid-execution, polling again");
            tokio::time::sleep(interval).await;
        }
    }

    /// One request over the wire with the transient-retry budget.
    ///
    /// Remote `{Error}` replies become hard failures here; disconnects
    /// trigger the reconnect hook and count against the budget.
    async fn send(&mut self, request: &Request) -> Result<Response> {
        let envelope = wire::pack(request)?;
        let attempts = self.config.retry.request_attempts.max(1);
        let interval = Duration::from_millis(self.config.retry.request_interval_ms);
        let mut last: Option<Error> = None;

        for attempt in 0..attempts {
            match self.client.request(&envelope).await {
                Ok(reply) => {
                    let response: Response = wire::unpack(&reply)?;
                    if let Response::Error { error } = response {
                        return Err(Error::Remote(error));
                    }
                    return Ok(response);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(Error::ResponderExited) => return Err(Error::ResponderExited),
                Err(e) => {
                    tracing::debug!(kind = request.kind(), attempt, error = %e, "request failed, retrying");
                    if matches!(e, Error::Disconnected(_)) {
                        if let Err(re) = self.client.reconnect().await {
                            tracing::debug!(error = %re, "reconnect failed");
                        }
                    }
                    last = Some(e);
                    tokio::time::sleep(interval).await;
                }
            }
        }

        Err(Error::RetriesExhausted {
            attempts,
            last: Box::new(last.unwrap_or_else(|| Error::NoResponseData)),
        })
    }

    /// Mirror refresh after a mutating action. A clean responder exit here
    /// is expected (the action may close the application) and tolerated.
    async fn refresh_after_action(&mut self) -> Result<()> {
        match self.refresh().await {
            Err(Error::ResponderExited) => {
                tracing::debug!("responder exited cleanly after action");
                Ok(())
            }
            other => other,
        }
    }
}

fn unwrap_value(kind: &str, response: Response) -> Result<WrappedValue> {
    if response.is_unserializable() {
        return Err(Error::UnserializableResult);
    }
    match response {
        Response::Value { value } => Ok(value),
        other => Err(unexpected_reply(kind, &other)),
    }
}

fn expect_success(kind: &str, response: Response) -> Result<()> {
    match response {
        Response::Success { success: true } => Ok(()),
        Response::Success { success: false } => {
            Err(Error::Remote(format!("{kind} reported failure")))
        }
        other => Err(unexpected_reply(kind, &other)),
    }
}

fn unexpected_reply(kind: &str, response: &Response) -> Error {
    Error::Internal(format!("unexpected {kind} reply: {response:?}"))
}
