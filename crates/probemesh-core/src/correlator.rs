//! Request/response correlation
//!
//! Every request the engine sends registers a pending entry here. The
//! entry is completed exactly once: by a matching response, by the
//! periodic timeout sweep, by a disconnect of its link, or by a newer
//! request of the same class to the same target.
//!
//! ## Correlation spaces
//!
//! ```text
//! Direct: (class, LinkId)     one slot per class per link   timeout 5 s
//! Mesh:   (class, RequestId)  random 32-bit id per request  timeout 30 s
//! ```
//!
//! Waiters hold a `oneshot::Receiver`; a dropped receiver is fine, the
//! engine still observes the response itself.

use crate::config::CorrelatorConfig;
use crate::error::RequestError;
use crate::transport::LinkId;
use crate::wire::{MessageClass, RequestId, Response};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Outcome delivered to a waiter
pub type Completion = Result<Response, RequestError>;

/// Where a response will be matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    Direct(LinkId),
    Mesh(RequestId),
}

/// An in-flight request
#[derive(Debug)]
pub struct PendingRequest {
    pub class: MessageClass,
    pub key: CorrelationKey,
    /// Link the request went out on
    pub link: LinkId,
    /// Probe the request concerns
    pub serial: u32,
    pub issued_at: Instant,
    reply: oneshot::Sender<Completion>,
}

impl PendingRequest {
    fn complete(self, result: Completion) {
        // The waiter may have given up; that is not an error
        let _ = self.reply.send(result);
    }
}

/// Summary of an entry completed without a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abandoned {
    pub class: MessageClass,
    pub key: CorrelationKey,
    pub serial: u32,
}

impl From<&PendingRequest> for Abandoned {
    fn from(pending: &PendingRequest) -> Self {
        Self {
            class: pending.class,
            key: pending.key,
            serial: pending.serial,
        }
    }
}

/// Tracks in-flight requests in both correlation spaces
#[derive(Debug)]
pub struct RequestCorrelator {
    pending: HashMap<(MessageClass, CorrelationKey), PendingRequest>,
    config: CorrelatorConfig,
}

impl RequestCorrelator {
    pub fn new(config: CorrelatorConfig) -> Self {
        Self {
            pending: HashMap::new(),
            config,
        }
    }

    /// Timeout applied to a request of `class` in the space of `key`
    pub fn timeout_for(&self, class: MessageClass, key: &CorrelationKey) -> Duration {
        let ms = match self.config.class_timeouts_ms.get(&class) {
            Some(ms) => *ms,
            None => match key {
                CorrelationKey::Direct(_) => self.config.direct_timeout_ms,
                CorrelationKey::Mesh(_) => self.config.mesh_timeout_ms,
            },
        };
        Duration::from_millis(ms)
    }

    /// Register a request and get the receiver its result will arrive on
    ///
    /// An entry already pending for the same (class, key) is replaced and
    /// its waiter receives [`RequestError::Superseded`].
    pub fn register(
        &mut self,
        class: MessageClass,
        key: CorrelationKey,
        link: LinkId,
        serial: u32,
        now: Instant,
    ) -> oneshot::Receiver<Completion> {
        let (reply, rx) = oneshot::channel();
        let entry = PendingRequest {
            class,
            key,
            link,
            serial,
            issued_at: now,
            reply,
        };
        if let Some(previous) = self.pending.insert((class, key), entry) {
            tracing::debug!(?class, ?key, "superseding pending request");
            previous.complete(Err(RequestError::Superseded));
        }
        rx
    }

    /// Deliver a result and remove the entry
    ///
    /// Returns `false` when nothing is pending for (class, key), which is
    /// the normal case for late or duplicate relayed responses.
    pub fn resolve(&mut self, class: MessageClass, key: CorrelationKey, result: Completion) -> bool {
        match self.pending.remove(&(class, key)) {
            Some(entry) => {
                entry.complete(result);
                true
            }
            None => {
                tracing::trace!(?class, ?key, "no pending request for response");
                false
            }
        }
    }

    pub fn get(&self, class: MessageClass, key: CorrelationKey) -> Option<&PendingRequest> {
        self.pending.get(&(class, key))
    }

    pub fn is_pending(&self, class: MessageClass, key: CorrelationKey) -> bool {
        self.pending.contains_key(&(class, key))
    }

    /// Fail every entry older than its timeout
    pub fn sweep(&mut self, now: Instant) -> Vec<Abandoned> {
        let expired: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, entry)| {
                now.saturating_duration_since(entry.issued_at)
                    >= self.timeout_for(entry.class, &entry.key)
            })
            .map(|(slot, _)| *slot)
            .collect();

        let mut abandoned = Vec::with_capacity(expired.len());
        for slot in expired {
            if let Some(entry) = self.pending.remove(&slot) {
                tracing::debug!(class = ?entry.class, key = ?entry.key, "request timed out");
                abandoned.push(Abandoned::from(&entry));
                entry.complete(Err(RequestError::Timeout));
            }
        }
        abandoned
    }

    /// Fail every entry that went out on `link`
    ///
    /// Direct-space entries of the link are the common case; mesh entries
    /// routed through a repeater on that link are failed as well since the
    /// repeater can no longer deliver their responses.
    pub fn purge_link(&mut self, link: LinkId) -> Vec<Abandoned> {
        let slots: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.link == link)
            .map(|(slot, _)| *slot)
            .collect();

        let mut abandoned = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(entry) = self.pending.remove(&slot) {
                abandoned.push(Abandoned::from(&entry));
                entry.complete(Err(RequestError::Disconnected));
            }
        }
        abandoned
    }

    /// Fail everything (engine shutdown)
    pub fn fail_all(&mut self, error: RequestError) {
        for (_, entry) in self.pending.drain() {
            entry.complete(Err(error.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correlator() -> RequestCorrelator {
        RequestCorrelator::new(CorrelatorConfig::default())
    }

    #[test]
    fn test_resolve_delivers_once() {
        let mut c = correlator();
        let now = Instant::now();
        let key = CorrelationKey::Direct(LinkId(1));
        let mut rx = c.register(MessageClass::ReadModelInfo, key, LinkId(1), 7, now);

        let response = Response::ModelInfo("CPT".into());
        assert!(c.resolve(MessageClass::ReadModelInfo, key, Ok(response.clone())));
        assert_eq!(rx.try_recv().unwrap(), Ok(response));
        assert!(!c.resolve(MessageClass::ReadModelInfo, key, Err(RequestError::Rejected)));
        assert!(c.is_empty());
    }

    #[test]
    fn test_direct_timeout_then_late_resolve() {
        let mut c = correlator();
        let start = Instant::now();
        let key = CorrelationKey::Direct(LinkId(1));
        let mut rx = c.register(MessageClass::ReadSessionInfo, key, LinkId(1), 7, start);

        assert!(c.sweep(start + Duration::from_millis(4_999)).is_empty());
        assert!(rx.try_recv().is_err());

        let abandoned = c.sweep(start + Duration::from_secs(5));
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].serial, 7);
        assert_eq!(rx.try_recv().unwrap(), Err(RequestError::Timeout));

        // nothing left to fire or resolve
        assert!(c.sweep(start + Duration::from_secs(60)).is_empty());
        assert!(!c.resolve(
            MessageClass::ReadSessionInfo,
            key,
            Ok(Response::Ack(MessageClass::ReadSessionInfo))
        ));
    }

    #[test]
    fn test_mesh_timeout_is_longer() {
        let mut c = correlator();
        let start = Instant::now();
        let key = CorrelationKey::Mesh(RequestId(99));
        let mut rx = c.register(MessageClass::ReadLogs, key, LinkId(2), 7, start);

        assert!(c.sweep(start + Duration::from_secs(29)).is_empty());
        assert_eq!(c.sweep(start + Duration::from_secs(30)).len(), 1);
        assert_eq!(rx.try_recv().unwrap(), Err(RequestError::Timeout));
    }

    #[test]
    fn test_class_override() {
        let mut config = CorrelatorConfig::default();
        config.class_timeouts_ms.insert(MessageClass::ReadLogs, 1_000);
        let c = RequestCorrelator::new(config);
        assert_eq!(
            c.timeout_for(MessageClass::ReadLogs, &CorrelationKey::Mesh(RequestId(1))),
            Duration::from_secs(1)
        );
        assert_eq!(
            c.timeout_for(MessageClass::ReadModelInfo, &CorrelationKey::Mesh(RequestId(1))),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_register_replaces_existing() {
        let mut c = correlator();
        let now = Instant::now();
        let key = CorrelationKey::Direct(LinkId(3));
        let mut first = c.register(MessageClass::SetProbeColor, key, LinkId(3), 7, now);
        let mut second = c.register(MessageClass::SetProbeColor, key, LinkId(3), 7, now);

        assert_eq!(first.try_recv().unwrap(), Err(RequestError::Superseded));
        assert_eq!(c.len(), 1);

        assert!(c.resolve(
            MessageClass::SetProbeColor,
            key,
            Ok(Response::Ack(MessageClass::SetProbeColor))
        ));
        assert!(second.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_classes_are_independent_slots() {
        let mut c = correlator();
        let now = Instant::now();
        let key = CorrelationKey::Direct(LinkId(3));
        c.register(MessageClass::ReadModelInfo, key, LinkId(3), 7, now);
        c.register(MessageClass::ReadFirmwareRevision, key, LinkId(3), 7, now);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_purge_link() {
        let mut c = correlator();
        let now = Instant::now();
        let mut direct = c.register(
            MessageClass::ReadLogs,
            CorrelationKey::Direct(LinkId(1)),
            LinkId(1),
            7,
            now,
        );
        let mut other = c.register(
            MessageClass::ReadLogs,
            CorrelationKey::Direct(LinkId(2)),
            LinkId(2),
            8,
            now,
        );

        let purged = c.purge_link(LinkId(1));
        assert_eq!(purged.len(), 1);
        assert_eq!(direct.try_recv().unwrap(), Err(RequestError::Disconnected));
        assert!(other.try_recv().is_err());
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_dropped_receiver_is_harmless() {
        let mut c = correlator();
        let now = Instant::now();
        let key = CorrelationKey::Mesh(RequestId(5));
        drop(c.register(MessageClass::ReadSessionInfo, key, LinkId(1), 7, now));
        assert!(c.resolve(
            MessageClass::ReadSessionInfo,
            key,
            Err(RequestError::Rejected)
        ));
    }
}
