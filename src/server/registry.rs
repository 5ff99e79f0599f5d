use std::{io::ErrorKind, path::Path, sync::Arc};

use indexmap::IndexMap;
use tokio::{
    fs,
    sync::{Mutex, RwLock, broadcast},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(feature = "downloads")]
use crate::download::DownloadCache;
use crate::{
    config::{
        RegistryOptions, ServerConfig, ServerConfigPatch, parse_server_list, stream::RegistryEvent,
    },
    error::{ConfigError, RegistryError},
    probe::ProbeSet,
};

use super::domain::ManagedServer;

const EVENT_CAPACITY: usize = 256;

/// The set of managed servers under one root directory, persisted to
/// `<root>/servers.json`.
#[derive(Debug)]
pub struct ServerRegistry {
    options: RegistryOptions,
    probes: ProbeSet,
    servers: RwLock<IndexMap<String, Arc<ManagedServer>>>,
    events: broadcast::Sender<RegistryEvent>,
    persist: Mutex<()>,
    #[cfg(feature = "downloads")]
    downloads: DownloadCache,
}

impl ServerRegistry {
    pub fn new(options: RegistryOptions, probes: ProbeSet) -> Result<Self, RegistryError> {
        Ok(Self {
            #[cfg(feature = "downloads")]
            downloads: DownloadCache::new(&options.cache_dir)?,
            options,
            probes,
            servers: RwLock::new(IndexMap::new()),
            events: broadcast::Sender::new(EVENT_CAPACITY),
            persist: Mutex::new(()),
        })
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    #[cfg(feature = "downloads")]
    pub fn downloads(&self) -> &DownloadCache {
        &self.downloads
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        _ = self.events.send(event);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ManagedServer>> {
        self.servers.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<ManagedServer>> {
        self.servers.read().await.values().cloned().collect()
    }

    /// Reconciles memory with `servers.json`.
    ///
    /// Servers still listed keep their process and probe state and only take the
    /// file's declarative fields. New ones are created and start probing. Servers
    /// no longer listed stop probing and are dropped; their processes are left
    /// alone. Nothing changes if any record is invalid.
    pub async fn load(&self) -> Result<(), RegistryError> {
        let configs = self.read_server_list().await?;

        let mut servers = self.servers.write().await;
        let mut next = IndexMap::with_capacity(configs.len());
        let mut created = Vec::new();

        for config in configs {
            let id = config.id.clone();
            let server = match servers.get(&id).cloned() {
                Some(existing) => {
                    existing.edit(ServerConfigPatch::from(config)).await?;
                    existing
                }
                None => {
                    let server = Arc::new(self.build(config)?);
                    created.push(server.clone());
                    server
                }
            };
            next.insert(id, server);
        }

        let previous = std::mem::replace(&mut *servers, next);
        let removed: Vec<_> = previous
            .into_iter()
            .filter(|(id, _)| !servers.contains_key(id))
            .collect();
        let total = servers.len();
        drop(servers);

        for (id, server) in removed {
            server.stop_probing();
            self.emit(RegistryEvent::Deleted { id });
        }
        for server in created {
            server.start_probing().await;
            self.emit(RegistryEvent::Created {
                id: server.id().to_string(),
            });
        }

        info!(root = %self.options.root.display(), servers = total, "server list loaded");
        Ok(())
    }

    /// Rewrites `servers.json` with the current set, in insertion order.
    pub async fn save(&self) -> Result<(), RegistryError> {
        let _guard = self.persist.lock().await;

        let servers = self.list().await;
        let mut configs = Vec::with_capacity(servers.len());
        for server in &servers {
            configs.push(server.config().await);
        }

        write_server_list(&self.options.servers_file(), &configs).await?;
        debug!(servers = configs.len(), "server list saved");
        Ok(())
    }

    /// Adds a server, persists the list and starts probing it.
    pub async fn create(&self, config: ServerConfig) -> Result<Arc<ManagedServer>, RegistryError> {
        let id = config.id.clone();
        let server = Arc::new(self.build(config)?);

        {
            let mut servers = self.servers.write().await;
            if servers.contains_key(&id) {
                return Err(RegistryError::DuplicateId(id));
            }
            servers.insert(id.clone(), server.clone());
        }

        if let Err(e) = self.save().await {
            self.servers.write().await.shift_remove(&id);
            return Err(e);
        }

        server.start_probing().await;
        info!(%id, "server created");
        self.emit(RegistryEvent::Created { id });
        Ok(server)
    }

    /// Removes a server and persists the list. A running process is not stopped.
    /// The server is put back at its old position if the list cannot be saved.
    pub async fn delete(&self, id: &str) -> Result<Arc<ManagedServer>, RegistryError> {
        let (index, key, server) = self
            .servers
            .write()
            .await
            .shift_remove_full(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let was_probing = server.is_probing();
        server.stop_probing();
        if let Err(e) = self.save().await {
            warn!(%id, error = %e, "delete not persisted, restoring server");
            self.servers
                .write()
                .await
                .shift_insert(index, key, server.clone());
            if was_probing {
                server.start_probing().await;
            }
            return Err(e);
        }

        info!(%id, "server deleted");
        self.emit(RegistryEvent::Deleted { id: id.to_string() });
        Ok(server)
    }

    /// Applies `patch` to one server and persists the list. The previous config
    /// is restored if the list cannot be saved.
    pub async fn edit(&self, id: &str, patch: ServerConfigPatch) -> Result<(), RegistryError> {
        let server = self
            .get(id)
            .await
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let previous = server.config().await;
        server.edit(patch).await?;
        if let Err(e) = self.save().await {
            warn!(%id, error = %e, "edit not persisted, restoring previous config");
            server.edit(ServerConfigPatch::from(previous)).await?;
            return Err(e);
        }
        Ok(())
    }

    /// Stops every schedule, then stops the servers that are not meant to
    /// outlive this process.
    pub async fn shutdown(&self) {
        for server in self.list().await {
            server.stop_probing();

            if server.config().await.persist || !server.is_running() {
                continue;
            }
            match server.stop().await {
                Ok(outcome) => debug!(id = server.id(), ?outcome, "server stopped on shutdown"),
                Err(e) => warn!(id = server.id(), error = %e, "failed to stop server on shutdown"),
            }
        }
    }

    fn build(&self, config: ServerConfig) -> Result<ManagedServer, RegistryError> {
        Ok(ManagedServer::new(
            config,
            &self.options.root,
            self.probes.clone(),
            &self.options.settings,
        )?)
    }

    /// Reads the server list, creating the root and an empty list when absent.
    async fn read_server_list(&self) -> Result<Vec<ServerConfig>, ConfigError> {
        let root = &self.options.root;
        let path = self.options.servers_file();

        fs::create_dir_all(root)
            .await
            .map_err(|source| ConfigError::Write {
                path: root.clone(),
                source,
            })?;

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "no server list, creating an empty one");
                write_server_list(&path, &[]).await?;
                return Ok(Vec::new());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        parse_server_list(&path, &data)
    }
}

/// Writes the list pretty-printed to a temporary sibling and renames it over `path`.
async fn write_server_list(path: &Path, configs: &[ServerConfig]) -> Result<(), ConfigError> {
    let json = serde_json::to_vec_pretty(configs).map_err(ConfigError::Serialize)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    fs::write(&temp, &json).await.map_err(write_err)?;
    if let Err(e) = fs::rename(&temp, path).await {
        _ = fs::remove_file(&temp).await;
        return Err(write_err(e));
    }
    Ok(())
}
