// Shared fakes for the connector, capture and output seams
#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use loqa_live::audio::{AudioCapture, AudioFrame, NullOutput};
use loqa_live::transport::{Connector, LinkPeer, TransportLink};
use loqa_live::{SessionConfig, SessionController, SessionDeps, SessionInfo, SessionStatus};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Connector that hands every accepted link's far end to the test
pub struct FakeConnector {
    accept: AtomicBool,
    opens: Mutex<Vec<(Instant, String)>>,
    peers: mpsc::UnboundedSender<LinkPeer>,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<LinkPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            accept: AtomicBool::new(true),
            opens: Mutex::new(Vec::new()),
            peers: tx,
        });
        (connector, rx)
    }

    /// Refused opens fail like a failed handshake
    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    pub fn opens(&self) -> Vec<(Instant, String)> {
        self.opens.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().len()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, url: &str) -> Result<TransportLink> {
        self.opens.lock().push((Instant::now(), url.to_string()));

        if !self.accept.load(Ordering::SeqCst) {
            bail!("connection refused");
        }

        let (link, peer) = TransportLink::channel(64);
        let _ = self.peers.send(peer);
        Ok(link)
    }
}

/// Test-side view of a [`FakeCapture`]
#[derive(Clone, Default)]
pub struct CaptureProbe {
    inner: Arc<ProbeInner>,
}

#[derive(Default)]
struct ProbeInner {
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail: AtomicBool,
    tx: Mutex<Option<mpsc::Sender<AudioFrame>>>,
}

impl CaptureProbe {
    pub fn starts(&self) -> usize {
        self.inner.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.inner.stops.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.inner.fail.store(fail, Ordering::SeqCst);
    }

    pub fn is_capturing(&self) -> bool {
        self.inner.tx.lock().is_some()
    }

    /// Deliver a frame as the device would; false if capture is not running
    pub fn emit(&self, frame: AudioFrame) -> bool {
        match self.inner.tx.lock().as_ref() {
            Some(tx) => tx.try_send(frame).is_ok(),
            None => false,
        }
    }
}

pub struct FakeCapture {
    probe: CaptureProbe,
}

#[async_trait]
impl AudioCapture for FakeCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.probe.inner.fail.load(Ordering::SeqCst) {
            bail!("microphone permission denied");
        }
        let (tx, rx) = mpsc::channel(16);
        *self.probe.inner.tx.lock() = Some(tx);
        self.probe.inner.starts.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if self.probe.inner.tx.lock().take().is_some() {
            self.probe.inner.stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.probe.is_capturing()
    }

    fn name(&self) -> &str {
        "fake"
    }
}

pub struct Harness {
    pub controller: Arc<SessionController>,
    pub connector: Arc<FakeConnector>,
    pub peers: mpsc::UnboundedReceiver<LinkPeer>,
    pub capture: CaptureProbe,
    pub info: watch::Receiver<SessionInfo>,
}

pub fn test_config() -> SessionConfig {
    SessionConfig {
        termination_notice: false,
        ..SessionConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: SessionConfig) -> Harness {
    let (connector, peers) = FakeConnector::new();
    let capture = CaptureProbe::default();

    let deps = SessionDeps {
        connector: connector.clone(),
        capture: Box::new(FakeCapture {
            probe: capture.clone(),
        }),
        output: Arc::new(NullOutput::new(24000)),
    };

    let controller =
        Arc::new(SessionController::spawn(config, deps).expect("controller should start"));
    let info = controller.subscribe();

    Harness {
        controller,
        connector,
        peers,
        capture,
        info,
    }
}

pub async fn wait_for_status(info: &mut watch::Receiver<SessionInfo>, status: SessionStatus) {
    info.wait_for(|i| i.status == status)
        .await
        .expect("session task should be running");
}

pub fn frame(value: i16) -> AudioFrame {
    AudioFrame {
        samples: vec![value; 1536],
        sample_rate: 16000,
        timestamp_ms: 0,
    }
}
