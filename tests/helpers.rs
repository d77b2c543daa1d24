#![allow(dead_code)]

use std::time::Duration;

use nfc_p2p::controller::{LoopbackController, LoopbackMedium};
use nfc_p2p::{Engine, EngineBuilder, EngineEvent};
use tokio::sync::mpsc::UnboundedReceiver;

pub(crate) fn configure_tracing() {
    use std::sync::OnceLock;
    static TRACING_INIT: OnceLock<()> = OnceLock::new();
    TRACING_INIT.get_or_init(|| {
        tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::builder()
                        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                        .from_env_lossy(),
                )
                .with_test_writer()
                .with_thread_names(true)
                .finish(),
        )
        .expect("Configure tracing");
    });
}

/// Two engines on one loopback medium.
pub(crate) struct Pair {
    pub a: Engine,
    pub b: Engine,
    pub medium: LoopbackMedium,
}

impl Pair {
    pub(crate) async fn start(a: EngineBuilder, b: EngineBuilder) -> Self {
        configure_tracing();
        let (controller_a, controller_b, medium) = LoopbackController::pair();
        let a = a.start(controller_a).await.expect("start engine A");
        let b = b.start(controller_b).await.expect("start engine B");
        Self { a, b, medium }
    }

    /// Both engines with default configuration, link up.
    pub(crate) async fn linked() -> Self {
        let pair = Self::start(nfc_p2p::configure(), nfc_p2p::configure()).await;
        pair.activate().await;
        pair
    }

    /// Bring the link up and wait until both engines have seen it.
    pub(crate) async fn activate(&self) {
        self.medium.activate();
        self.settle().await;
    }

    /// Wait for every controller event queued so far on both sides.
    pub(crate) async fn settle(&self) {
        self.a.link_info().await.expect("engine A running");
        self.b.link_info().await.expect("engine B running");
    }
}

/// Next event matching `pick`, failing the test after one second.
pub(crate) async fn next_event<T>(
    events: &mut UnboundedReceiver<EngineEvent>,
    mut pick: impl FnMut(EngineEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if let Some(found) = pick(event) {
                return found;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
