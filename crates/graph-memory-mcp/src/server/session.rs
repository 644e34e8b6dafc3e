//! Session registry and lifecycle.
//!
//! Sessions are issued on `initialize`, touched by every subsequent request,
//! and terminated explicitly, by the idle sweep, or on server shutdown.
//! Cancellation fans out through `CancellationToken` parent/child links:
//! server root -> session -> request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio_util::sync::CancellationToken;

use crate::protocol::JsonRpcNotification;

/// Capacity of the per-session server-initiated notification channel.
const NOTIFICATION_CHANNEL_SIZE: usize = 64;

/// Client descriptor captured from the `initialize` params.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
}

impl ClientInfo {
    /// Extract the descriptor from `initialize` params, tolerating absent
    /// fields.
    #[must_use]
    pub fn from_params(params: &Value) -> Self {
        let client_info = params.get("clientInfo");
        let field = |v: Option<&Value>, key: &str| {
            v.and_then(|c| c.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            name: field(client_info, "name"),
            version: field(client_info, "version"),
            protocol_version: params
                .get("protocolVersion")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// A single client-bound session.
pub struct Session {
    /// Opaque unguessable identifier.
    pub id: String,
    /// Client descriptor from the handshake.
    pub client: ClientInfo,
    /// When the session was created.
    pub created_at: Instant,
    /// Last activity timestamp, refreshed on every dispatch-path lookup.
    last_active: RwLock<Instant>,
    /// Cancellation scope for everything bound to this session.
    cancel: CancellationToken,
    /// In-flight request ids and their cancellation tokens.
    in_flight: Mutex<HashMap<String, CancellationToken>>,
    /// Channel for server-initiated notifications (`GET /mcp` stream).
    notifications: broadcast::Sender<JsonRpcNotification>,
}

impl Session {
    fn new(id: String, client: ClientInfo, parent: &CancellationToken) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_SIZE);
        Self {
            id,
            client,
            created_at: Instant::now(),
            last_active: RwLock::new(Instant::now()),
            cancel: parent.child_token(),
            in_flight: Mutex::new(HashMap::new()),
            notifications,
        }
    }

    /// Refresh the activity timestamp.
    pub async fn touch(&self) {
        *self.last_active.write().await = Instant::now();
    }

    /// Time since the last activity.
    pub async fn idle_for(&self) -> Duration {
        self.last_active.read().await.elapsed()
    }

    /// Register a request and obtain its cancellation token, a child of the
    /// session scope. Concurrent requests on one session are independent:
    /// cancelling one leaves the others running.
    pub async fn begin_request(&self, request_id: &Value) -> CancellationToken {
        let token = self.cancel.child_token();
        self.in_flight
            .lock()
            .await
            .insert(request_id.to_string(), token.clone());
        token
    }

    /// Drop the in-flight record once a terminal outcome was delivered.
    pub async fn finish_request(&self, request_id: &Value) {
        self.in_flight.lock().await.remove(&request_id.to_string());
    }

    /// Cancel one in-flight request (`notifications/cancelled`).
    pub async fn cancel_request(&self, request_id: &Value) -> bool {
        match self.in_flight.lock().await.get(&request_id.to_string()) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of requests currently in flight.
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Cancel everything bound to this session.
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    /// Whether the session scope was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Subscribe to server-initiated notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<JsonRpcNotification> {
        self.notifications.subscribe()
    }

    /// Push a server-initiated notification. Dropped when no stream is open.
    pub fn notify(&self, notification: JsonRpcNotification) {
        let _ = self.notifications.send(notification);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("client", &self.client.name)
            .finish()
    }
}

/// Process-wide session registry.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    idle_timeout: Duration,
    root: CancellationToken,
}

impl SessionRegistry {
    /// Create a registry whose sessions live under `root`.
    #[must_use]
    pub fn new(idle_timeout: Duration, root: CancellationToken) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
            root,
        }
    }

    /// Issue a new session with an unguessable id.
    pub async fn create(&self, client: ClientInfo) -> Arc<Session> {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(id.clone(), client, &self.root));
        self.sessions.write().await.insert(id, Arc::clone(&session));
        tracing::info!(session_id = %session.id, client = %session.client.name, "session created");
        session
    }

    /// Look up a session from the dispatch path, refreshing its activity
    /// timestamp.
    pub async fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.read().await.get(id).cloned()?;
        session.touch().await;
        Some(session)
    }

    /// Look up without touching (monitoring, tests).
    pub async fn peek(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Terminate a session: remove it and cancel its in-flight requests.
    pub async fn terminate(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(session) => {
                session.cancel_all();
                tracing::info!(session_id = %id, "session terminated");
                true
            }
            None => false,
        }
    }

    /// Evict every session idle longer than the configured timeout.
    pub async fn sweep(&self) -> usize {
        let mut stale = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (id, session) in sessions.iter() {
                if session.idle_for().await > self.idle_timeout {
                    stale.push(id.clone());
                }
            }
        }

        let mut evicted = 0;
        for id in stale {
            if self.terminate(&id).await {
                tracing::info!(session_id = %id, "session evicted by sweep");
                evicted += 1;
            }
        }
        evicted
    }

    /// Terminate every session (server shutdown).
    pub async fn terminate_all(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            self.terminate(&id).await;
        }
    }

    /// Number of open sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Requests currently in flight across all sessions.
    pub async fn in_flight_total(&self) -> usize {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut total = 0;
        for session in sessions {
            total += session.in_flight_count().await;
        }
        total
    }

    /// Spawn the periodic sweep task. Exits when the server root token is
    /// cancelled.
    pub fn start_sweep_task(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = registry.sweep().await;
                        if evicted > 0 {
                            tracing::debug!(count = evicted, "sweep completed");
                        }
                    }
                    () = registry.root.cancelled() => break,
                }
            }
        })
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish()
    }
}
