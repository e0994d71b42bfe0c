#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use pairline::{
    AppState,
    auth::JwtIdentityProvider,
    config::Config,
    relay::{Relay, ServerEvent},
    rooms::Identity,
    store::SqliteMessageStore,
    uploads::LocalObjectStore,
};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

pub const SECRET: &[u8] = b"test-secret";

pub fn id(raw: &str) -> Identity {
    Identity::parse(raw).unwrap()
}

pub async fn memory_store() -> SqliteMessageStore {
    SqliteMessageStore::connect("sqlite::memory:", 1).await.unwrap()
}

pub async fn memory_relay() -> Arc<Relay> {
    Arc::new(Relay::new(Arc::new(memory_store().await), 100))
}

/// Everything queued so far, without waiting.
pub fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub struct TestApp {
    pub state: AppState,
    pub tokens: JwtIdentityProvider,
    pub uploads: TempDir,
}

impl TestApp {
    pub async fn new(max_upload_bytes: usize) -> TestApp {
        let uploads = tempfile::tempdir().unwrap();
        let config = Config {
            upload_dir: uploads.path().to_path_buf(),
            max_upload_bytes,
            auth_timeout: Duration::from_secs(2),
            ..Config::default()
        };

        let state = AppState {
            relay: memory_relay().await,
            identity: Arc::new(JwtIdentityProvider::new(SECRET)),
            objects: Arc::new(LocalObjectStore::new(
                uploads.path(),
                &config.public_base_url,
                max_upload_bytes,
            )),
            config: Arc::new(config),
        };

        TestApp {
            state,
            tokens: JwtIdentityProvider::new(SECRET),
            uploads,
        }
    }

    pub fn token(&self, name: &str) -> String {
        self.tokens.issue(&id(name), Duration::from_secs(600)).unwrap()
    }
}
