//! In-process peer network.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use shardhub_app::ports::{PeerConnection, PeerConnector, PortError};
use shardhub_app::space::Space;
use shardhub_domain::peer::PeerMessage;

use crate::error::VirtualError;

const WIRE_CAPACITY: usize = 64;

/// Routes connection targets to spaces living in the same process.
///
/// Each connection is relayed through a pair of wire tasks so that
/// [`sever`](Self::sever) can cut it like a dropped socket.
#[derive(Default)]
pub struct MemoryNetwork {
    routes: Mutex<HashMap<String, Space>>,
    offline: Mutex<HashSet<String>>,
    wires: Mutex<CancellationToken>,
}

impl MemoryNetwork {
    /// Make `space` reachable as `target`.
    pub fn listen(&self, target: impl Into<String>, space: Space) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.into(), space);
    }

    /// Refuse (or accept again) connections to `target`.
    pub fn set_offline(&self, target: &str, offline: bool) {
        let mut set = self.offline.lock().unwrap_or_else(PoisonError::into_inner);
        if offline {
            set.insert(target.to_string());
        } else {
            set.remove(target);
        }
    }

    /// Drop every connection established so far.
    pub fn sever(&self) {
        let mut wires = self.wires.lock().unwrap_or_else(PoisonError::into_inner);
        wires.cancel();
        *wires = CancellationToken::new();
    }
}

fn relay(
    mut from: mpsc::Receiver<PeerMessage>,
    to: mpsc::Sender<PeerMessage>,
    cut: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cut.cancelled() => break,
                msg = from.recv() => {
                    let Some(msg) = msg else { break };
                    if to.send(msg).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[async_trait]
impl PeerConnector for MemoryNetwork {
    async fn connect(&self, target: &str) -> Result<PeerConnection, PortError> {
        if self
            .offline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(target)
        {
            return Err(VirtualError::Offline(target.to_string()).into());
        }
        let space = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
            .ok_or_else(|| VirtualError::NoRoute(target.to_string()))?;

        let (local, local_wire) = PeerConnection::pair(WIRE_CAPACITY);
        let (remote_wire, remote) = PeerConnection::pair(WIRE_CAPACITY);
        let cut = self
            .wires
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        relay(local_wire.receiver, remote_wire.sender, cut.clone());
        relay(remote_wire.receiver, local_wire.sender, cut);
        space.accept(remote);
        tracing::debug!(%target, "virtual connection established");
        Ok(local)
    }
}
