use crate::domain::models::{OperationKind, OperationState, PendingOperation};
use crate::infrastructure::error::BridgeError;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Resolved or expired tokens remembered for recognising replayed callbacks.
const SETTLED_CAPACITY: usize = 512;
/// Operations with no reply after this long are dropped on the next registration.
const DEFAULT_MAX_AGE_MINUTES: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackReply {
    pub outcome: OperationState,
    pub params: BTreeMap<String, String>,
}

impl CallbackReply {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Replied(CallbackReply),
    TimedOut,
    Abandoned,
}

struct PendingEntry {
    operation: PendingOperation,
    waiter: Option<oneshot::Sender<CallbackReply>>,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<String, PendingEntry>,
    settled: VecDeque<String>,
}

impl Registry {
    fn settle(&mut self, token: &str) -> Option<PendingEntry> {
        let entry = self.entries.remove(token)?;
        if self.settled.len() >= SETTLED_CAPACITY {
            self.settled.pop_front();
        }
        self.settled.push_back(token.to_string());
        Some(entry)
    }

    fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.operation.requested_at < cutoff)
            .map(|(token, _)| token.clone())
            .collect();
        for token in &stale {
            if let Some(entry) = self.settle(token) {
                log::debug!(
                    "dropping {} operation {token} for {}: no reply",
                    entry.operation.kind.as_str(),
                    entry.operation.context_date
                );
            }
        }
        stale.len()
    }
}

/// Outbound requests awaiting a callback, keyed by the `op` token embedded in
/// their callback URLs. Settled tokens are remembered (bounded) so a replayed
/// callback is told apart from one issued by another process.
pub struct PendingOperations {
    registry: Mutex<Registry>,
    now_provider: NowProvider,
    max_age: chrono::Duration,
}

impl Default for PendingOperations {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingOperations {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            now_provider: Arc::new(Utc::now),
            max_age: chrono::Duration::minutes(DEFAULT_MAX_AGE_MINUTES),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_max_age(mut self, max_age: chrono::Duration) -> Self {
        self.max_age = max_age;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Registry>, BridgeError> {
        self.registry
            .lock()
            .map_err(|error| BridgeError::Callback(format!("pending registry lock poisoned: {error}")))
    }

    pub fn register(
        &self,
        kind: OperationKind,
        context_date: &str,
        context_note_id: Option<&str>,
    ) -> Result<String, BridgeError> {
        self.insert(kind, context_date, context_note_id, None)
    }

    pub fn register_waiting(
        &self,
        kind: OperationKind,
        context_date: &str,
        context_note_id: Option<&str>,
    ) -> Result<(String, oneshot::Receiver<CallbackReply>), BridgeError> {
        let (sender, receiver) = oneshot::channel();
        let token = self.insert(kind, context_date, context_note_id, Some(sender))?;
        Ok((token, receiver))
    }

    fn insert(
        &self,
        kind: OperationKind,
        context_date: &str,
        context_note_id: Option<&str>,
        waiter: Option<oneshot::Sender<CallbackReply>>,
    ) -> Result<String, BridgeError> {
        let now = (self.now_provider)();
        let operation = PendingOperation {
            kind,
            context_date: context_date.to_string(),
            context_note_id: context_note_id.map(ToOwned::to_owned),
            state: OperationState::Requested,
            requested_at: now,
        };
        operation.validate().map_err(BridgeError::Callback)?;

        let token = Uuid::new_v4().simple().to_string();
        let mut registry = self.lock()?;
        registry.prune_before(now - self.max_age);
        registry
            .entries
            .insert(token.clone(), PendingEntry { operation, waiter });
        drop(registry);
        log::debug!("registered {} operation {token} for {context_date}", kind.as_str());
        Ok(token)
    }

    pub fn get(&self, token: &str) -> Result<Option<PendingOperation>, BridgeError> {
        Ok(self.lock()?.entries.get(token).map(|entry| entry.operation.clone()))
    }

    /// True when `token` was resolved or expired here recently.
    pub fn is_settled(&self, token: &str) -> Result<bool, BridgeError> {
        Ok(self.lock()?.settled.iter().any(|settled| settled == token))
    }

    /// Drops operations older than the configured maximum age.
    pub fn prune(&self) -> Result<usize, BridgeError> {
        let cutoff = (self.now_provider)() - self.max_age;
        Ok(self.lock()?.prune_before(cutoff))
    }

    pub fn in_flight(&self, kind: OperationKind) -> Result<usize, BridgeError> {
        Ok(self
            .lock()?
            .entries
            .values()
            .filter(|entry| entry.operation.kind == kind)
            .count())
    }

    pub fn len(&self) -> Result<usize, BridgeError> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, BridgeError> {
        Ok(self.lock()?.entries.is_empty())
    }

    /// Removes the operation and hands the reply to its waiter, if any.
    /// `None` means the token is unknown: already settled (see
    /// [`Self::is_settled`]) or issued by another process.
    pub fn resolve(
        &self,
        token: &str,
        reply: CallbackReply,
    ) -> Result<Option<PendingOperation>, BridgeError> {
        let Some(entry) = self.lock()?.settle(token) else {
            return Ok(None);
        };
        Ok(Some(Self::finish(entry, reply)))
    }

    /// Resolves the only in-flight operation of `kind`. With zero or several
    /// candidates the reply cannot be attributed and nothing is resolved.
    pub fn resolve_single_flight(
        &self,
        kind: OperationKind,
        reply: CallbackReply,
    ) -> Result<Option<PendingOperation>, BridgeError> {
        let mut registry = self.lock()?;
        let candidates: Vec<String> = registry
            .entries
            .iter()
            .filter(|(_, entry)| entry.operation.kind == kind)
            .map(|(token, _)| token.clone())
            .collect();
        let [token] = candidates.as_slice() else {
            if candidates.len() > 1 {
                log::warn!(
                    "{} callback without operation token; {} candidates in flight, not attributing",
                    kind.as_str(),
                    candidates.len()
                );
            }
            return Ok(None);
        };
        let Some(entry) = registry.settle(token) else {
            return Ok(None);
        };
        drop(registry);
        Ok(Some(Self::finish(entry, reply)))
    }

    pub fn expire(&self, token: &str) -> Result<Option<PendingOperation>, BridgeError> {
        Ok(self.lock()?.settle(token).map(|entry| {
            let mut operation = entry.operation;
            operation.state = OperationState::TimedOut;
            operation
        }))
    }

    fn finish(entry: PendingEntry, reply: CallbackReply) -> PendingOperation {
        let mut operation = entry.operation;
        operation.state = reply.outcome;
        if let Some(waiter) = entry.waiter {
            if waiter.send(reply).is_err() {
                log::debug!("{} waiter already gone", operation.kind.as_str());
            }
        }
        operation
    }

    /// Waits for the reply to `token`; on timeout the operation is expired so
    /// a late callback is treated as stale.
    pub async fn wait_for(
        &self,
        token: &str,
        receiver: oneshot::Receiver<CallbackReply>,
        timeout: Duration,
    ) -> Result<WaitOutcome, BridgeError> {
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(reply)) => Ok(WaitOutcome::Replied(reply)),
            Ok(Err(_)) => Ok(WaitOutcome::Abandoned),
            Err(_) => {
                self.expire(token)?;
                Ok(WaitOutcome::TimedOut)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn reply(outcome: OperationState, params: &[(&str, &str)]) -> CallbackReply {
        CallbackReply {
            outcome,
            params: params
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        }
    }

    #[test]
    fn resolve_removes_and_records_final_state() {
        let pending = PendingOperations::new();
        let token = pending
            .register(OperationKind::OpenDaily, "2024-06-15", None)
            .expect("register");

        let resolved = pending
            .resolve(&token, reply(OperationState::Failed, &[]))
            .expect("resolve")
            .expect("known token");
        assert_eq!(resolved.state, OperationState::Failed);
        assert_eq!(resolved.context_date, "2024-06-15");
        assert!(pending.is_empty().expect("len"));
        assert!(pending
            .resolve(&token, reply(OperationState::Failed, &[]))
            .expect("resolve")
            .is_none());
    }

    #[test]
    fn register_rejects_invalid_context() {
        let pending = PendingOperations::new();
        assert!(pending.register(OperationKind::SyncDate, "yesterday", None).is_err());
    }

    #[test]
    fn single_flight_refuses_ambiguous_attribution() {
        let pending = PendingOperations::new();
        pending
            .register(OperationKind::OpenDaily, "2024-06-15", None)
            .expect("register");
        pending
            .register(OperationKind::OpenDaily, "2024-06-16", None)
            .expect("register");
        pending
            .register(OperationKind::OpenHome, "2024-06-15", Some("HOME"))
            .expect("register");

        assert!(pending
            .resolve_single_flight(OperationKind::OpenDaily, reply(OperationState::Failed, &[]))
            .expect("resolve")
            .is_none());
        assert_eq!(pending.in_flight(OperationKind::OpenDaily).expect("count"), 2);

        let home = pending
            .resolve_single_flight(OperationKind::OpenHome, reply(OperationState::Succeeded, &[]))
            .expect("resolve")
            .expect("single home operation");
        assert_eq!(home.context_note_id.as_deref(), Some("HOME"));
    }

    #[test]
    fn settled_tokens_are_remembered() {
        let pending = PendingOperations::new();
        let resolved = pending
            .register(OperationKind::OpenDaily, "2024-06-15", None)
            .expect("register");
        let expired = pending
            .register(OperationKind::SyncDate, "2024-06-16", None)
            .expect("register");
        let open = pending
            .register(OperationKind::SyncDate, "2024-06-17", None)
            .expect("register");

        pending
            .resolve(&resolved, reply(OperationState::Failed, &[]))
            .expect("resolve");
        pending.expire(&expired).expect("expire");

        assert!(pending.is_settled(&resolved).expect("settled"));
        assert!(pending.is_settled(&expired).expect("settled"));
        assert!(!pending.is_settled(&open).expect("settled"));
        assert!(!pending.is_settled("never-issued").expect("settled"));
    }

    #[test]
    fn settled_record_is_bounded() {
        let pending = PendingOperations::new();
        let first = pending
            .register(OperationKind::SyncDate, "2024-06-15", None)
            .expect("register");
        pending.expire(&first).expect("expire");
        for _ in 0..SETTLED_CAPACITY {
            let token = pending
                .register(OperationKind::SyncDate, "2024-06-15", None)
                .expect("register");
            pending.expire(&token).expect("expire");
        }
        assert!(!pending.is_settled(&first).expect("settled"));
    }

    #[test]
    fn operations_without_reply_are_pruned_by_age() {
        let clock = Arc::new(Mutex::new(
            DateTime::parse_from_rfc3339("2024-06-15T12:00:00Z")
                .expect("valid datetime")
                .with_timezone(&Utc),
        ));
        let reader = Arc::clone(&clock);
        let pending = PendingOperations::new()
            .with_now_provider(Arc::new(move || *reader.lock().expect("clock")))
            .with_max_age(chrono::Duration::minutes(10));

        let old = pending
            .register(OperationKind::OpenHome, "2024-06-15", Some("HOME"))
            .expect("register");
        *clock.lock().expect("clock") += chrono::Duration::minutes(5);
        let recent = pending
            .register(OperationKind::OpenDaily, "2024-06-15", None)
            .expect("register");
        assert_eq!(pending.len().expect("len"), 2);

        *clock.lock().expect("clock") += chrono::Duration::minutes(6);
        assert_eq!(pending.prune().expect("prune"), 1);
        assert!(pending.get(&old).expect("get").is_none());
        assert!(pending.is_settled(&old).expect("settled"));
        assert!(pending.get(&recent).expect("get").is_some());

        *clock.lock().expect("clock") += chrono::Duration::minutes(10);
        pending
            .register(OperationKind::SyncDate, "2024-06-15", None)
            .expect("register");
        assert!(pending.get(&recent).expect("get").is_none());
        assert_eq!(pending.len().expect("len"), 1);
    }

    #[tokio::test]
    async fn waiter_receives_reply() {
        let pending = Arc::new(PendingOperations::new());
        let (token, receiver) = pending
            .register_waiting(OperationKind::Search, "2024-06-15", None)
            .expect("register");

        let resolver = Arc::clone(&pending);
        let resolver_token = token.clone();
        tokio::spawn(async move {
            resolver
                .resolve(
                    &resolver_token,
                    reply(OperationState::Succeeded, &[("notes", "[]")]),
                )
                .expect("resolve");
        });

        let outcome = pending
            .wait_for(&token, receiver, Duration::from_secs(5))
            .await
            .expect("wait");
        let WaitOutcome::Replied(reply) = outcome else {
            panic!("expected reply, got {outcome:?}");
        };
        assert_eq!(reply.param("notes"), Some("[]"));
    }

    #[tokio::test]
    async fn wait_times_out_and_expires_operation() {
        let pending = PendingOperations::new();
        let (token, receiver) = pending
            .register_waiting(OperationKind::Search, "2024-06-15", None)
            .expect("register");

        let started = Instant::now();
        let outcome = pending
            .wait_for(&token, receiver, Duration::from_millis(50))
            .await
            .expect("wait");

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(pending.get(&token).expect("get").is_none());
        assert!(pending
            .resolve(&token, reply(OperationState::Succeeded, &[]))
            .expect("late reply")
            .is_none());
    }
}
