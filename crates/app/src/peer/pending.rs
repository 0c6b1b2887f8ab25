//! Outstanding remote calls awaiting a `reply`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use shardhub_domain::error::{HubError, UnreachableError};
use shardhub_domain::id::RequestId;
use shardhub_domain::peer::Outcome;

type Slot = oneshot::Sender<Result<Outcome, HubError>>;

/// Request id → waiting caller.
#[derive(Clone, Default)]
pub struct PendingRequests {
    slots: Arc<Mutex<HashMap<RequestId, Slot>>>,
}

impl PendingRequests {
    fn slots(&self) -> MutexGuard<'_, HashMap<RequestId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a slot for a new request.
    #[must_use]
    pub fn register(&self) -> PendingReply {
        let request = RequestId::new();
        let (tx, rx) = oneshot::channel();
        self.slots().insert(request, tx);
        PendingReply {
            request,
            rx,
            owner: self.clone(),
        }
    }

    /// Hand `outcome` to the caller waiting on `request`.
    ///
    /// Returns `false` when nobody waits any more.
    pub fn resolve(&self, request: RequestId, outcome: Outcome) -> bool {
        match self.slots().remove(&request) {
            Some(slot) => slot.send(Ok(outcome)).is_ok(),
            None => false,
        }
    }

    /// Fail every waiting caller; the connection to `peer` is gone.
    pub fn fail_all(&self, peer: &str) {
        let slots: Vec<Slot> = self.slots().drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            let _ = slot.send(Err(UnreachableError::Disconnected {
                peer: peer.to_string(),
            }
            .into()));
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

/// A reserved slot; dropping it releases the slot.
pub struct PendingReply {
    request: RequestId,
    rx: oneshot::Receiver<Result<Outcome, HubError>>,
    owner: PendingRequests,
}

impl PendingReply {
    #[must_use]
    pub fn request(&self) -> RequestId {
        self.request
    }

    /// Wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`UnreachableError`] when the connection drops first.
    pub async fn recv(&mut self, peer: &str) -> Result<Outcome, HubError> {
        (&mut self.rx).await.unwrap_or_else(|_| {
            Err(UnreachableError::Disconnected {
                peer: peer.to_string(),
            }
            .into())
        })
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.owner.slots().remove(&self.request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn should_deliver_reply_to_waiting_caller() {
        let pending = PendingRequests::default();
        let mut reply = pending.register();
        assert!(pending.resolve(reply.request(), Outcome::Ok(json!(1))));
        assert_eq!(reply.recv("rpi").await.unwrap(), Outcome::Ok(json!(1)));
    }

    #[tokio::test]
    async fn should_fail_all_with_unreachable() {
        let pending = PendingRequests::default();
        let mut a = pending.register();
        let mut b = pending.register();
        pending.fail_all("rpi");
        assert!(matches!(a.recv("rpi").await, Err(HubError::Unreachable(_))));
        assert!(matches!(b.recv("rpi").await, Err(HubError::Unreachable(_))));
        assert!(pending.is_empty());
    }

    #[test]
    fn should_release_slot_when_dropped() {
        let pending = PendingRequests::default();
        let reply = pending.register();
        let request = reply.request();
        assert_eq!(pending.len(), 1);
        drop(reply);
        assert!(pending.is_empty());
        assert!(!pending.resolve(request, Outcome::Ok(json!(null))));
    }
}
