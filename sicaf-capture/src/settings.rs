//! Explicit settings subscription.
//!
//! The kiosk owns one [`SettingsHandle`]; every session gets a
//! [`SettingsWatcher`] at construction and reads the latest value whenever it
//! needs it. Sessions never write settings.

use log::info;
use tokio::sync::watch;

use crate::config::AppSettings;

#[derive(Debug, Clone)]
pub struct SettingsHandle {
    tx: watch::Sender<AppSettings>,
}

#[derive(Debug, Clone)]
pub struct SettingsWatcher {
    rx: watch::Receiver<AppSettings>,
}

impl SettingsHandle {
    pub fn new(initial: AppSettings) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn subscribe(&self) -> SettingsWatcher {
        SettingsWatcher { rx: self.tx.subscribe() }
    }

    pub fn current(&self) -> AppSettings {
        self.tx.borrow().clone()
    }

    /// Replaces the settings and notifies every watcher. Unchanged values are
    /// not re-broadcast.
    pub fn update(&self, settings: AppSettings) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == settings {
                false
            } else {
                *current = settings;
                true
            }
        });
        if changed {
            info!("Settings updated: {:?}", self.tx.borrow());
        }
    }

    pub fn modify(&self, f: impl FnOnce(&mut AppSettings)) {
        let mut next = self.current();
        f(&mut next);
        self.update(next);
    }
}

impl SettingsWatcher {
    /// A watcher over a fixed value, for sessions that never see updates.
    pub fn fixed(settings: AppSettings) -> Self {
        let (_tx, rx) = watch::channel(settings);
        Self { rx }
    }

    pub fn current(&self) -> AppSettings {
        self.rx.borrow().clone()
    }

    /// Resolves on the next update. Errors once the handle is dropped.
    pub async fn changed(&mut self) -> Result<AppSettings, watch::error::RecvError> {
        self.rx.changed().await?;
        Ok(self.rx.borrow_and_update().clone())
    }
}
