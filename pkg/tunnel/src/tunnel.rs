use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_std::channel;
use async_std::future::timeout;
use async_std::sync::Mutex;
use async_trait::async_trait;
use bytes::Bytes;
use common::errors::*;
use common::task::ChildTask;
use transport::{DialOptions as TransportDialOptions, Listener, Transport};

use crate::link::Link;
use crate::model::{new_id, CloseReason, Frame, Mode, SessionState};
use crate::session::Session;

/// Default interval between `Keepalive` heartbeats on every link (§4.9
/// "Links").
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Default time `Dial` waits for an `Accept` before giving up (§4.9
/// "Session state machine").
const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a link that sent a bad token stays blacklisted (§4.9
/// "Authentication").
const DENY_BACKOFF: Duration = Duration::from_secs(30);

/// Options for `Tunnel::dial`.
#[derive(Clone)]
pub struct DialOptions {
    pub dial_timeout: Duration,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

/// Hook a `Network` wires in so that link up/down events feed the
/// embedded `Router` without `tunnel` depending on the `router` crate
/// (§9 "Router/Network/Tunnel cyclic references": held as a `Weak`
/// back-reference, mirroring the teacher's `Weak<Shared>` pattern).
#[async_trait]
pub trait RouteObserver: Send + Sync {
    async fn link_up(&self, link_id: &str);
    async fn link_down(&self, link_id: &str);
    /// An `Announce` frame arrived on some link, solicited by our own or
    /// the peer's `Discover`. The payload is an opaque JSON blob (see
    /// `Frame::Announce`); `network` knows how to decode it into routes.
    async fn announce(&self, link_id: &str, payload: serde_json::Value);
    /// Builds the payload to answer a peer's `Discover` with (§4.9
    /// "Links"). Opaque to `tunnel` the same way `Frame::Announce`'s
    /// payload is.
    async fn discover_payload(&self) -> serde_json::Value;
}

struct SessionEntry {
    mode: Mode,
    state: Mutex<SessionState>,
    link_ids: Mutex<Vec<String>>,
    inbound_tx: channel::Sender<Bytes>,
}

struct PendingOpen {
    link_id: String,
    sender: channel::Sender<Result<String>>,
}

pub(crate) struct TunnelShared {
    pub id: String,
    token: String,
    transport: Arc<dyn Transport>,
    keepalive_interval: Duration,
    links: Mutex<HashMap<String, Arc<Link>>>,
    listening: Mutex<HashMap<String, channel::Sender<Session>>>,
    sessions: Mutex<HashMap<String, Arc<SessionEntry>>>,
    pending_opens: Mutex<HashMap<String, Vec<PendingOpen>>>,
    route_observer: Mutex<Option<Weak<dyn RouteObserver>>>,
}

impl TunnelShared {
    async fn link_ids(&self) -> Vec<String> {
        self.links.lock().await.keys().cloned().collect()
    }

    async fn get_link(&self, id: &str) -> Option<Arc<Link>> {
        self.links.lock().await.get(id).cloned()
    }

    pub(crate) async fn session_state(&self, session_id: &str) -> SessionState {
        match self.sessions.lock().await.get(session_id) {
            Some(entry) => *entry.state.lock().await,
            None => SessionState::Closed,
        }
    }

    pub(crate) async fn send_on_session(&self, session_id: &str, channel: &str, body: Bytes) -> Result<()> {
        let entry = self
            .sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::new(Kind::Shutdown, "session is closed"))?;

        let link_ids = entry.link_ids.lock().await.clone();
        if link_ids.is_empty() {
            return Err(Error::new(Kind::Shutdown, "session has no live links"));
        }

        let frame = Frame::Session {
            tunnel_id: self.id.clone(),
            session_id: session_id.to_string(),
            channel: channel.to_string(),
            body,
        };

        let mut last_err = None;
        let mut any_ok = false;
        for link_id in link_ids {
            if let Some(link) = self.get_link(&link_id).await {
                match link.send(&frame).await {
                    Ok(()) => any_ok = true,
                    Err(e) => last_err = Some(e),
                }
            }
        }

        if any_ok {
            Ok(())
        } else {
            Err(last_err.unwrap_or_else(|| Error::new(Kind::Shutdown, "no reachable link for session")))
        }
    }

    pub(crate) async fn close_session(&self, session_id: &str) -> Result<()> {
        let entry = self.sessions.lock().await.remove(session_id);
        let entry = match entry {
            Some(e) => e,
            None => return Ok(()),
        };
        *entry.state.lock().await = SessionState::Closed;

        let frame = Frame::Close {
            tunnel_id: self.id.clone(),
            session_id: session_id.to_string(),
            reason: CloseReason::Normal,
        };
        for link_id in entry.link_ids.lock().await.iter() {
            if let Some(link) = self.get_link(link_id).await {
                let _ = link.send(&frame).await;
            }
        }
        Ok(())
    }
}

/// Establishes authenticated multiplexed sessions over one or more peer
/// transports (§4.9). `id`/`token` identify this tunnel instance to
/// peers; `transport` is used both to accept inbound peer connections
/// (`listen`) and to dial configured peers (`connect`).
pub struct Tunnel {
    shared: Arc<TunnelShared>,
    _keepalive: ChildTask,
    _monitor: ChildTask,
}

impl Tunnel {
    pub fn new(id: impl Into<String>, token: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let shared = Arc::new(TunnelShared {
            id: id.into(),
            token: token.into(),
            transport,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            links: Mutex::new(HashMap::new()),
            listening: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            pending_opens: Mutex::new(HashMap::new()),
            route_observer: Mutex::new(None),
        });

        let keepalive = ChildTask::spawn(Self::keepalive_loop(shared.clone()));
        let monitor = ChildTask::spawn(Self::quality_monitor_loop(shared.clone()));

        Self {
            shared,
            _keepalive: keepalive,
            _monitor: monitor,
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub async fn set_route_observer(&self, observer: Weak<dyn RouteObserver>) {
        *self.shared.route_observer.lock().await = Some(observer);
    }

    /// Accepts inbound peer connections on `addr` forever, establishing a
    /// `Link` (and its reader loop) for each one. Returns only if the
    /// underlying listener itself fails.
    pub async fn listen(&self, addr: &str) -> Result<()> {
        let listener = self.shared.transport.listen(addr).await?;
        let shared = self.shared.clone();
        common::async_std::task::spawn(Self::accept_loop(shared, listener));
        Ok(())
    }

    async fn accept_loop(shared: Arc<TunnelShared>, listener: Box<dyn Listener>) {
        loop {
            let socket = match listener.accept().await {
                Ok(s) => s,
                Err(_) => return,
            };
            let link_id = socket.remote_address();
            let link = Arc::new(Link::new(link_id.clone(), socket));
            shared.links.lock().await.insert(link_id.clone(), link.clone());
            Self::establish_link(&shared, &link).await;
            common::async_std::task::spawn(Self::reader_loop(shared.clone(), link));
        }
    }

    /// Common bookkeeping once a `Link` (inbound or outbound) is
    /// registered: notify the route observer and solicit the peer's
    /// routes (§4.9 "A `Discover` message is sent on link-up").
    async fn establish_link(shared: &Arc<TunnelShared>, link: &Arc<Link>) {
        Self::notify_link_up(shared, &link.id).await;
        let _ = link.send(&Frame::Discover { tunnel_id: shared.id.clone() }).await;
    }

    /// Proactively dials a configured peer node, establishing a `Link`
    /// the same way an inbound `accept` would (§3 "Tunnel Session" ---
    /// "a set of configured peer nodes").
    pub async fn connect(&self, peer_addr: &str) -> Result<()> {
        let socket = self
            .shared
            .transport
            .dial(peer_addr, TransportDialOptions { stream: true, timeout: None })
            .await?;
        let link_id = peer_addr.to_string();
        let link = Arc::new(Link::new(link_id.clone(), socket));
        self.shared.links.lock().await.insert(link_id.clone(), link.clone());
        Self::establish_link(&self.shared, &link).await;
        common::async_std::task::spawn(Self::reader_loop(self.shared.clone(), link));
        Ok(())
    }

    async fn notify_link_up(shared: &Arc<TunnelShared>, link_id: &str) {
        if let Some(observer) = shared.route_observer.lock().await.as_ref().and_then(Weak::upgrade) {
            observer.link_up(link_id).await;
        }
    }

    async fn notify_link_down(shared: &Arc<TunnelShared>, link_id: &str) {
        if let Some(observer) = shared.route_observer.lock().await.as_ref().and_then(Weak::upgrade) {
            observer.link_down(link_id).await;
        }
    }

    /// Registers interest in inbound sessions on `channel` (§4.9 "requires
    /// the destination to have accepted via `Listen(channel)`"). Returns
    /// a receiver of accepted `Session`s; dropping it stops accepting new
    /// ones (existing sessions are unaffected).
    pub async fn listen_channel(&self, channel: &str) -> channel::Receiver<Session> {
        let (tx, rx) = async_std::channel::unbounded();
        self.shared.listening.lock().await.insert(channel.to_string(), tx);
        rx
    }

    /// Opens a session to `channel` (§4.9 "Sessions"). `Unicast` picks one
    /// currently connected link and waits for `Accept` up to
    /// `opts.dial_timeout`; `Multicast` fans the `Open` out to every
    /// link and waits for at least one `Accept`; `Broadcast` fans out to
    /// every link without waiting (every reachable peer receives
    /// subsequent sends, whether or not it is listening).
    pub async fn dial(&self, channel: &str, mode: Mode, opts: DialOptions) -> Result<Session> {
        let shared = &self.shared;
        let link_ids = shared.link_ids().await;
        if link_ids.is_empty() {
            return Err(Error::new(Kind::NotFound, "no links established"));
        }

        let session_id = new_id("sess");
        let (inbound_tx, inbound_rx) = async_std::channel::unbounded();

        let entry = Arc::new(SessionEntry {
            mode,
            state: Mutex::new(SessionState::OpenSent),
            link_ids: Mutex::new(vec![]),
            inbound_tx,
        });
        shared.sessions.lock().await.insert(session_id.clone(), entry.clone());

        let candidate_links = match mode {
            Mode::Unicast => vec![link_ids[0].clone()],
            Mode::Multicast | Mode::Broadcast => link_ids,
        };

        let open_frame = Frame::Open {
            tunnel_id: shared.id.clone(),
            channel: channel.to_string(),
            session_id: session_id.clone(),
            mode,
            token: shared.token.clone(),
        };

        let (outcome_tx, outcome_rx) = async_std::channel::unbounded();
        {
            let mut pending = shared.pending_opens.lock().await;
            for link_id in &candidate_links {
                pending.entry(session_id.clone()).or_default().push(PendingOpen {
                    link_id: link_id.clone(),
                    sender: outcome_tx.clone(),
                });
            }
        }

        for link_id in &candidate_links {
            if let Some(link) = shared.get_link(link_id).await {
                let _ = link.send(&open_frame).await;
            }
        }

        let accepted: Vec<String> = match mode {
            Mode::Broadcast => candidate_links.clone(),
            Mode::Unicast => {
                match timeout(opts.dial_timeout, outcome_rx.recv()).await {
                    Ok(Ok(Ok(link_id))) => vec![link_id],
                    Ok(Ok(Err(e))) => {
                        shared.sessions.lock().await.remove(&session_id);
                        shared.pending_opens.lock().await.remove(&session_id);
                        return Err(e);
                    }
                    _ => {
                        shared.sessions.lock().await.remove(&session_id);
                        shared.pending_opens.lock().await.remove(&session_id);
                        return Err(Error::new(Kind::Timeout, "dial timed out waiting for accept"));
                    }
                }
            }
            Mode::Multicast => {
                // Waits out the full dial window collecting every accept
                // that arrives; links that never respond are simply left
                // out of the session's destination set.
                let deadline = Instant::now() + opts.dial_timeout;
                let mut accepted = vec![];
                while accepted.len() < candidate_links.len() {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match timeout(remaining, outcome_rx.recv()).await {
                        Ok(Ok(Ok(link_id))) => accepted.push(link_id),
                        Ok(Ok(Err(_))) | Ok(Err(_)) => continue,
                        Err(_) => break,
                    }
                }
                accepted
            }
        };

        shared.pending_opens.lock().await.remove(&session_id);

        if accepted.is_empty() {
            shared.sessions.lock().await.remove(&session_id);
            return Err(Error::new(Kind::NotFound, "no peer accepted the session"));
        }

        *entry.link_ids.lock().await = accepted;
        *entry.state.lock().await = SessionState::Established;

        Ok(Session {
            tunnel: shared.clone(),
            id: session_id,
            channel: channel.to_string(),
            mode,
            inbound: inbound_rx,
        })
    }

    async fn reader_loop(shared: Arc<TunnelShared>, link: Arc<Link>) {
        loop {
            let frame = match link.recv().await {
                Ok(Some(f)) => f,
                Ok(None) | Err(_) => break,
            };

            match frame {
                Frame::Open {
                    channel,
                    session_id,
                    mode,
                    token,
                    ..
                } => {
                    Self::handle_open(&shared, &link, channel, session_id, mode, token).await;
                }
                Frame::Accept { session_id, .. } => {
                    let link_id = link.id.clone();
                    Self::resolve_pending(&shared, &session_id, &link.id, Ok(link_id)).await;
                }
                Frame::Close { session_id, reason, .. } => {
                    let err = match reason {
                        CloseReason::Denied => Error::new(Kind::Forbidden, "session denied: token mismatch"),
                        CloseReason::Normal => Error::new(Kind::Shutdown, "peer closed session"),
                        CloseReason::LinkLost => Error::new(Kind::Shutdown, "link lost"),
                    };
                    Self::resolve_pending(&shared, &session_id, &link.id, Err(err)).await;
                    shared.sessions.lock().await.remove(&session_id);
                }
                Frame::Session { session_id, body, .. } => {
                    if let Some(entry) = shared.sessions.lock().await.get(&session_id).cloned() {
                        let _ = entry.inbound_tx.try_send(body);
                    }
                }
                Frame::Keepalive { .. } => {
                    link.touch_heartbeat().await;
                }
                Frame::Discover { .. } => {
                    let observer = shared.route_observer.lock().await.as_ref().and_then(Weak::upgrade);
                    if let Some(observer) = observer {
                        let payload = observer.discover_payload().await;
                        let _ = link
                            .send(&Frame::Announce {
                                tunnel_id: shared.id.clone(),
                                payload,
                            })
                            .await;
                    }
                }
                Frame::Announce { payload, .. } => {
                    let observer = shared.route_observer.lock().await.as_ref().and_then(Weak::upgrade);
                    if let Some(observer) = observer {
                        observer.announce(&link.id, payload).await;
                    }
                }
            }
        }

        shared.links.lock().await.remove(&link.id);
        link.mark_closed().await;
        Self::notify_link_down(&shared, &link.id).await;
    }

    async fn handle_open(
        shared: &Arc<TunnelShared>,
        link: &Arc<Link>,
        channel: String,
        session_id: String,
        mode: Mode,
        token: String,
    ) {
        if link.is_denied().await {
            let _ = link
                .send(&Frame::Close {
                    tunnel_id: shared.id.clone(),
                    session_id,
                    reason: CloseReason::Denied,
                })
                .await;
            return;
        }

        if token != shared.token {
            link.deny_for(DENY_BACKOFF).await;
            let _ = link
                .send(&Frame::Close {
                    tunnel_id: shared.id.clone(),
                    session_id,
                    reason: CloseReason::Denied,
                })
                .await;
            return;
        }

        let listener_tx = shared.listening.lock().await.get(&channel).cloned();

        let requires_listener = mode != Mode::Broadcast;
        if requires_listener && listener_tx.is_none() {
            let _ = link
                .send(&Frame::Close {
                    tunnel_id: shared.id.clone(),
                    session_id,
                    reason: CloseReason::Normal,
                })
                .await;
            return;
        }

        let (inbound_tx, inbound_rx) = async_std::channel::unbounded();
        let entry = Arc::new(SessionEntry {
            mode,
            state: Mutex::new(SessionState::Established),
            link_ids: Mutex::new(vec![link.id.clone()]),
            inbound_tx,
        });
        shared.sessions.lock().await.insert(session_id.clone(), entry);

        let _ = link
            .send(&Frame::Accept {
                tunnel_id: shared.id.clone(),
                session_id: session_id.clone(),
            })
            .await;

        if let Some(tx) = listener_tx {
            let _ = tx
                .send(Session {
                    tunnel: shared.clone(),
                    id: session_id,
                    channel,
                    mode,
                    inbound: inbound_rx,
                })
                .await;
        }
    }

    async fn resolve_pending(shared: &Arc<TunnelShared>, session_id: &str, link_id: &str, result: Result<String>) {
        let senders: Vec<channel::Sender<Result<String>>> = {
            let pending = shared.pending_opens.lock().await;
            match pending.get(session_id) {
                Some(entries) => entries
                    .iter()
                    .filter(|e| e.link_id == link_id)
                    .map(|e| e.sender.clone())
                    .collect(),
                None => vec![],
            }
        };
        for sender in senders {
            let _ = sender.send(result.clone_err()).await;
        }
    }

    async fn keepalive_loop(shared: Arc<TunnelShared>) {
        loop {
            common::async_std::task::sleep(shared.keepalive_interval).await;
            let ids = shared.link_ids().await;
            for id in ids {
                if let Some(link) = shared.get_link(&id).await {
                    let _ = link.send(&Frame::Keepalive { tunnel_id: shared.id.clone() }).await;
                }
            }
        }
    }

    async fn quality_monitor_loop(shared: Arc<TunnelShared>) {
        loop {
            common::async_std::task::sleep(shared.keepalive_interval).await;
            let stale_after = shared.keepalive_interval * 2;
            let now = Instant::now();

            let ids = shared.link_ids().await;
            for id in ids {
                let link = match shared.get_link(&id).await {
                    Some(l) => l,
                    None => continue,
                };
                let last = *link.last_heartbeat.lock().await;
                if now.duration_since(last) <= stale_after {
                    continue;
                }

                shared.links.lock().await.remove(&id);
                link.mark_closed().await;
                Self::evict_link_from_sessions(&shared, &id).await;
                Self::notify_link_down(&shared, &id).await;
            }
        }
    }

    async fn evict_link_from_sessions(shared: &Arc<TunnelShared>, link_id: &str) {
        let sessions: Vec<(String, Arc<SessionEntry>)> =
            shared.sessions.lock().await.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        for (session_id, entry) in sessions {
            let mut link_ids = entry.link_ids.lock().await;
            if !link_ids.iter().any(|l| l == link_id) {
                continue;
            }
            link_ids.retain(|l| l != link_id);

            let should_close = entry.mode == Mode::Unicast || link_ids.is_empty();
            drop(link_ids);

            if should_close {
                shared.sessions.lock().await.remove(&session_id);
            }
        }
    }
}

/// Small helper so `resolve_pending` can clone a `Result<String, Error>`
/// without requiring `Error: Clone` more broadly than this one call site
/// needs (errors carry a `failure::Error` cause which isn't `Clone`).
trait CloneErr {
    fn clone_err(&self) -> Self;
}

impl CloneErr for Result<String> {
    fn clone_err(&self) -> Self {
        match self {
            Ok(link_id) => Ok(link_id.clone()),
            Err(e) => Err(Error::new(e.kind(), e.to_string())),
        }
    }
}
