//! A [`Binder`] that mirrors the client table to a JSON file on disk so
//! a restarted helper can restore bindings without reconfiguring every
//! client by hand.
//!
//! The file is JSON, a single flat file, human-inspectable, written via
//! a temp-file-then-rename so a crash mid-write never leaves a
//! half-written state file behind.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use kitero_core::{BindEvent, Binder, ObserverError, Router, RouterView};
use serde::{Deserialize, Serialize};

use crate::error::PersistError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedBindings(HashMap<String, (String, String)>);

/// Persists bound clients to `path` as JSON, one entry per client mapping
/// to `(interface, qos)`.
pub struct PersistentBinder {
    path: PathBuf,
    bindings: HashMap<String, (String, String)>,
}

impl PersistentBinder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            bindings: HashMap::new(),
        }
    }

    /// Loads the bindings file (if any) and replays it into `router`
    /// through the normal `bind` path, so every other registered observer
    /// rebuilds its own state. A client whose rebind fails is logged and
    /// skipped rather than aborting the whole restore.
    pub fn restore(&mut self, router: &mut Router) -> Result<(), PersistError> {
        if !self.path.exists() {
            return Ok(());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|source| PersistError::Read {
            path: self.path.clone(),
            source,
        })?;
        let persisted: PersistedBindings =
            serde_json::from_str(&data).map_err(|source| PersistError::Decode {
                path: self.path.clone(),
                source,
            })?;
        tracing::info!(path = %self.path.display(), count = persisted.0.len(), "restoring bindings");
        self.bindings = persisted.0.clone();
        for (client, err) in router.restore_clients(persisted.0) {
            tracing::warn!(client, error = %err, "unable to rebind client from persisted state");
            self.bindings.remove(&client);
        }
        Ok(())
    }

    fn save(&self) -> Result<(), PersistError> {
        atomic_write(&self.path, &PersistedBindings(self.bindings.clone()))
    }
}

fn atomic_write(path: &Path, value: &PersistedBindings) -> Result<(), PersistError> {
    let tmp_path = path.with_extension("tmp");
    let body = serde_json::to_vec_pretty(value).expect("PersistedBindings is always serializable");
    let mut file = std::fs::File::create(&tmp_path).map_err(|source| PersistError::Write {
        path: tmp_path.clone(),
        source,
    })?;
    file.write_all(&body).map_err(|source| PersistError::Write {
        path: tmp_path.clone(),
        source,
    })?;
    file.sync_all().map_err(|source| PersistError::Write {
        path: tmp_path.clone(),
        source,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|source| PersistError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

impl Binder for PersistentBinder {
    fn notify(&mut self, _view: &RouterView, event: &BindEvent) -> Result<(), ObserverError> {
        match event {
            BindEvent::Bind { client, interface, qos } => {
                self.bindings
                    .insert(client.clone(), (interface.clone(), qos.clone()));
            }
            BindEvent::Unbind { client } => {
                self.bindings.remove(client);
            }
        }
        self.save().map_err(|e| Box::new(e) as ObserverError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitero_core::{Interface, QoS};
    use std::collections::HashMap as Map;

    fn router_with_interface() -> Router {
        let qos = QoS::new("basic", "basic qos", Map::new());
        let mut qoses = Map::new();
        qoses.insert("basic".to_string(), qos);
        let mut interfaces = Map::new();
        interfaces.insert("eth1".to_string(), Interface::new("eth1", "uplink", qoses));
        Router::new(vec!["eth0".to_string()], interfaces)
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!(
            "kitero-persist-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bindings.json");

        let mut router = router_with_interface();
        router.register(Box::new(PersistentBinder::new(&path)));
        router.bind("192.168.15.2", "eth1", "basic").unwrap();

        let mut restored_router = router_with_interface();
        let mut restorer = PersistentBinder::new(&path);
        restorer.restore(&mut restored_router).unwrap();
        assert!(restored_router.clients().contains_key("192.168.15.2"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_restores_nothing() {
        let mut router = router_with_interface();
        let mut persistent = PersistentBinder::new("/nonexistent/kitero-test-path.json");
        persistent.restore(&mut router).unwrap();
        assert!(router.clients().is_empty());
    }
}
