//! In-memory port implementations for unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use shardhub_domain::peer::PeerMessage;

use crate::device::Capabilities;
use crate::ports::{
    BlobStore, Gpio, ImageCapture, PeerConnection, PeerConnector, PinEvent, PortError,
};
use crate::space::Space;

#[derive(Default)]
pub(crate) struct FakeGpio {
    levels: Mutex<BTreeMap<u8, bool>>,
    duties: Mutex<BTreeMap<u8, f64>>,
    events: Mutex<Option<broadcast::Sender<PinEvent>>>,
    pub(crate) faulty: AtomicBool,
}

impl FakeGpio {
    fn sender(&self) -> broadcast::Sender<PinEvent> {
        self.events
            .lock()
            .unwrap()
            .get_or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }

    /// Simulate an external level change on an input pin.
    pub(crate) fn set_input(&self, index: u8, level: bool) {
        self.levels.lock().unwrap().insert(index, level);
        let _ = self.sender().send(PinEvent { index, level });
    }

    pub(crate) fn level(&self, index: u8) -> bool {
        self.levels
            .lock()
            .unwrap()
            .get(&index)
            .copied()
            .unwrap_or(false)
    }

    pub(crate) fn duty(&self, index: u8) -> Option<f64> {
        self.duties.lock().unwrap().get(&index).copied()
    }

    fn check(&self) -> Result<(), PortError> {
        if self.faulty.load(Ordering::SeqCst) {
            return Err("gpio fault".into());
        }
        Ok(())
    }
}

impl Gpio for FakeGpio {
    fn read_pin(&self, index: u8) -> Result<bool, PortError> {
        self.check()?;
        Ok(self.level(index))
    }

    fn write_pin(&self, index: u8, level: bool) -> Result<(), PortError> {
        self.check()?;
        self.levels.lock().unwrap().insert(index, level);
        self.duties
            .lock()
            .unwrap()
            .insert(index, if level { 1.0 } else { 0.0 });
        Ok(())
    }

    fn write_duty(&self, index: u8, duty: f64) -> Result<(), PortError> {
        self.check()?;
        self.levels.lock().unwrap().insert(index, duty > 0.0);
        self.duties.lock().unwrap().insert(index, duty);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PinEvent> {
        self.sender().subscribe()
    }
}

#[derive(Default)]
pub(crate) struct FakeBlobs {
    pub(crate) saved: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl BlobStore for FakeBlobs {
    async fn save(&self, shard_alias: &str, blob: Vec<u8>) -> Result<String, PortError> {
        let mut saved = self.saved.lock().unwrap();
        saved.push((shard_alias.to_string(), blob));
        Ok(format!("{shard_alias}/{}", saved.len()))
    }
}

#[derive(Default)]
pub(crate) struct FakeCapture {
    pub(crate) broken: AtomicBool,
}

#[async_trait]
impl ImageCapture for FakeCapture {
    async fn still(&self, camera: u8) -> Result<Vec<u8>, PortError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(format!("camera {camera} not detected").into());
        }
        Ok(vec![0xff, 0xd8, camera])
    }
}

pub(crate) struct Fakes {
    pub(crate) gpio: Arc<FakeGpio>,
    pub(crate) blobs: Arc<FakeBlobs>,
    pub(crate) capture: Arc<FakeCapture>,
}

impl Fakes {
    pub(crate) fn new() -> Self {
        Self {
            gpio: Arc::new(FakeGpio::default()),
            blobs: Arc::new(FakeBlobs::default()),
            capture: Arc::new(FakeCapture::default()),
        }
    }

    pub(crate) fn capabilities(&self) -> Capabilities {
        Capabilities {
            gpio: self.gpio.clone(),
            capture: self.capture.clone(),
            blobs: self.blobs.clone(),
        }
    }
}

/// Connects a target name straight to [`Space::accept`] of a registered space.
#[derive(Default)]
pub(crate) struct Loopback {
    spaces: Mutex<HashMap<String, Space>>,
    offline: AtomicBool,
    wires: Mutex<CancellationToken>,
}

impl Loopback {
    pub(crate) fn register(&self, target: &str, space: Space) {
        self.spaces.lock().unwrap().insert(target.to_string(), space);
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Drop every connection made so far.
    pub(crate) fn sever(&self) {
        let mut wires = self.wires.lock().unwrap();
        wires.cancel();
        *wires = CancellationToken::new();
    }
}

fn bridge(
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
impl PeerConnector for Loopback {
    async fn connect(&self, target: &str) -> Result<PeerConnection, PortError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(format!("{target} offline").into());
        }
        let space = self
            .spaces
            .lock()
            .unwrap()
            .get(target)
            .cloned()
            .ok_or_else(|| format!("no route to {target}"))?;
        let (near, near_wire) = PeerConnection::pair(32);
        let (far_wire, far) = PeerConnection::pair(32);
        let cut = self.wires.lock().unwrap().clone();
        bridge(near_wire.receiver, far_wire.sender, cut.clone());
        bridge(far_wire.receiver, near_wire.sender, cut);
        space.accept(far);
        Ok(near)
    }
}
