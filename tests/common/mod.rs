//! Common test utilities

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use afk_rotator::auth::AuthSequencer;
use afk_rotator::config::AuthMode;
use afk_rotator::identity::IdentityProvider;
use afk_rotator::scheduler::{ReconnectPolicy, Scheduler, SchedulerConfig, SchedulerStatus};
use afk_rotator::session::SessionOptions;
use afk_rotator::storage::RotationStateStore;
use afk_rotator::transport::{ConnectParams, Endpoint, ScriptedTransport};
use afk_rotator::utils::backoff::Backoff;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Connect template pointing nowhere in particular
pub fn template() -> ConnectParams {
    ConnectParams {
        endpoint: Endpoint {
            host: "play.example.net".to_string(),
            port: 25565,
            protocol_version: None,
        },
        identity: String::new(),
        secret: None,
        auth_mode: AuthMode::Offline,
        behavior: BTreeMap::new(),
    }
}

/// Rotation every `interval_ms`, 50ms settle, reconnect backoff 100ms doubling up to 1s
pub fn rotation_config(interval_ms: u64) -> SchedulerConfig {
    SchedulerConfig {
        rotation_enabled: true,
        interval: Duration::from_millis(interval_ms),
        settle: Duration::from_millis(50),
        default_identity: Some("KeeperBot".to_string()),
        reconnect: ReconnectPolicy {
            enabled: true,
            backoff: Backoff::new(100, 1_000, 2.0),
        },
    }
}

/// In-memory pool provider
pub fn pool(names: &[&str]) -> IdentityProvider {
    IdentityProvider::pool(
        names.iter().map(|s| s.to_string()).collect(),
        RotationStateStore::in_memory(),
    )
}

/// A scheduler running on a scripted transport
pub struct Harness {
    pub transport: ScriptedTransport,
    pub status: watch::Receiver<SchedulerStatus>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<SchedulerStatus>,
}

impl Harness {
    /// Spawn a scheduler with a fresh scripted transport
    pub fn spawn(config: SchedulerConfig, provider: IdentityProvider) -> Self {
        Self::spawn_with(config, provider, ScriptedTransport::new(), None)
    }

    /// Spawn with a prepared transport and optional auth
    pub fn spawn_with(
        config: SchedulerConfig,
        provider: IdentityProvider,
        transport: ScriptedTransport,
        auth: Option<AuthSequencer>,
    ) -> Self {
        let scheduler = Scheduler::new(
            config,
            provider,
            Arc::new(transport.clone()),
            template(),
            SessionOptions {
                connect_timeout: Duration::from_secs(5),
                close_timeout: Duration::from_secs(1),
            },
        )
        .with_auth(auth);

        let status = scheduler.subscribe();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(scheduler.run(async {
            let _ = shutdown_rx.await;
        }));

        Self {
            transport,
            status,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Wait until the published status satisfies `predicate`
    pub async fn wait_for<F>(&mut self, predicate: F) -> SchedulerStatus
    where
        F: FnMut(&SchedulerStatus) -> bool,
    {
        self.status
            .wait_for(predicate)
            .await
            .expect("scheduler stopped")
            .clone()
    }

    /// Latest published status
    pub fn current(&self) -> SchedulerStatus {
        self.status.borrow().clone()
    }

    /// Request shutdown and wait for the final status
    pub async fn shutdown(mut self) -> SchedulerStatus {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await.expect("scheduler task panicked")
    }
}
