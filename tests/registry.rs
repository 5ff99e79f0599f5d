#![cfg(unix)]

mod common;

use std::{sync::Arc, time::Duration};

use common::{ScriptedProbe, Step, probe_set, server_config};
use mineguard_fleet::{
    ConfigError, RegistryError, RegistryOptions, ServerConfig, ServerConfigPatch, ServerError,
    ServerRegistry, config::stream::RegistryEvent,
};
use serde_json::Value;

fn registry(root: &std::path::Path) -> ServerRegistry {
    let options = RegistryOptions::new(root).with_probe_timeout(Duration::from_millis(500));
    ServerRegistry::new(options, probe_set(ScriptedProbe::new([Step::Refused]))).unwrap()
}

/// Makes the next save fail: a rename cannot replace a non-empty directory.
fn block_saves(root: &std::path::Path) {
    let list = root.join("servers.json");
    std::fs::remove_file(&list).unwrap();
    std::fs::create_dir(&list).unwrap();
    std::fs::write(list.join("keep"), b"").unwrap();
}

fn read_list(root: &std::path::Path) -> Vec<ServerConfig> {
    let data = std::fs::read(root.join("servers.json")).unwrap();
    serde_json::from_slice(&data).unwrap()
}

#[tokio::test]
async fn missing_root_is_created_with_an_empty_list() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("fleet/servers");
    let registry = registry(&root);

    registry.load().await.unwrap();

    let raw: Value =
        serde_json::from_slice(&std::fs::read(root.join("servers.json")).unwrap()).unwrap();
    assert_eq!(raw, Value::Array(Vec::new()));
    assert!(registry.list().await.is_empty());
}

#[tokio::test]
async fn create_and_delete_persist_and_notify() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());
    registry.load().await.unwrap();
    let mut events = registry.subscribe();

    let server = registry
        .create(server_config("lobby", "sleep 30"))
        .await
        .unwrap();
    assert_eq!(server.id(), "lobby");
    assert!(server.is_probing());
    assert_eq!(
        events.recv().await.unwrap(),
        RegistryEvent::Created {
            id: "lobby".to_string()
        }
    );
    assert_eq!(read_list(dir.path()), vec![server_config("lobby", "sleep 30")]);

    let err = registry
        .create(server_config("lobby", "sleep 10"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateId(id) if id == "lobby"));

    let removed = registry.delete("lobby").await.unwrap();
    assert!(!removed.is_probing());
    assert_eq!(
        events.recv().await.unwrap(),
        RegistryEvent::Deleted {
            id: "lobby".to_string()
        }
    );
    assert!(read_list(dir.path()).is_empty());
    assert!(registry.get("lobby").await.is_none());

    assert!(matches!(
        registry.delete("lobby").await,
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn invalid_record_aborts_the_whole_load() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());
    registry.load().await.unwrap();
    registry
        .create(server_config("lobby", "sleep 30"))
        .await
        .unwrap();

    let mut renamed = serde_json::to_value(server_config("lobby", "sleep 30")).unwrap();
    renamed["name"] = "Renamed".into();
    let mut broken = serde_json::to_value(server_config("survival", "sleep 30")).unwrap();
    broken["type"] = "forge".into();
    std::fs::write(
        dir.path().join("servers.json"),
        serde_json::to_vec(&vec![renamed, broken]).unwrap(),
    )
    .unwrap();

    let err = registry.load().await.unwrap_err();
    match err {
        RegistryError::Config(ConfigError::Validation { index, id, .. }) => {
            assert_eq!(index, 1);
            assert_eq!(id.as_deref(), Some("survival"));
        }
        other => panic!("expected a validation error, got {other:?}"),
    }

    let servers = registry.list().await;
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].config().await.name, "Server lobby");
}

#[tokio::test]
async fn id_cannot_be_edited() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());
    registry.load().await.unwrap();
    registry
        .create(server_config("lobby", "sleep 30"))
        .await
        .unwrap();

    let err = registry
        .edit(
            "lobby",
            ServerConfigPatch {
                id: Some("hub".to_string()),
                name: Some("Hub".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Server(ServerError::IdImmutable { .. })
    ));

    registry
        .edit(
            "lobby",
            ServerConfigPatch {
                id: Some("lobby".to_string()),
                name: Some("Hub".to_string()),
                ping_interval: Some(5_000),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let saved = read_list(dir.path());
    assert_eq!(saved[0].id, "lobby");
    assert_eq!(saved[0].name, "Hub");
    assert_eq!(saved[0].ping_interval, 5_000);
}

#[tokio::test]
async fn load_drops_servers_missing_from_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());
    registry.load().await.unwrap();
    registry.create(server_config("a", "sleep 30")).await.unwrap();
    registry.create(server_config("b", "sleep 30")).await.unwrap();
    let mut events = registry.subscribe();

    std::fs::write(
        dir.path().join("servers.json"),
        serde_json::to_vec(&vec![server_config("b", "sleep 30"), server_config("c", "sleep 30")])
            .unwrap(),
    )
    .unwrap();
    registry.load().await.unwrap();

    let ids: Vec<_> = registry
        .list()
        .await
        .iter()
        .map(|s| s.id().to_string())
        .collect();
    assert_eq!(ids, ["b", "c"]);

    assert_eq!(
        events.recv().await.unwrap(),
        RegistryEvent::Deleted { id: "a".to_string() }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        RegistryEvent::Created { id: "c".to_string() }
    );
}

#[tokio::test]
async fn load_keeps_a_running_process() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());
    registry.load().await.unwrap();

    let server = registry
        .create(server_config("lobby", "sleep 30"))
        .await
        .unwrap();
    let pid = server.start().await.unwrap();
    assert!(pid.is_some());

    let mut updated = server_config("lobby", "sleep 60");
    updated.name = "Lobby (edited)".to_string();
    updated.address = "127.0.0.1:25570".to_string();
    std::fs::write(
        dir.path().join("servers.json"),
        serde_json::to_vec(&vec![updated.clone()]).unwrap(),
    )
    .unwrap();

    registry.load().await.unwrap();

    let reloaded = registry.get("lobby").await.unwrap();
    assert!(Arc::ptr_eq(&server, &reloaded));
    assert!(reloaded.is_running());
    assert_eq!(reloaded.pid().await, pid);
    assert_eq!(reloaded.config().await, updated);

    registry.shutdown().await;
    assert!(!reloaded.is_running());
    assert!(!reloaded.is_probing());
}

#[tokio::test]
async fn shutdown_leaves_persistent_servers_running() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());
    registry.load().await.unwrap();

    let mut config = server_config("survival", "sleep 30");
    config.persist = true;
    let server = registry.create(config).await.unwrap();
    server.start().await.unwrap();

    registry.shutdown().await;
    assert!(server.is_running());
    assert!(!server.is_probing());

    server.kill().await.unwrap();
}

#[tokio::test]
async fn failed_delete_keeps_the_server_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());
    registry.load().await.unwrap();
    for id in ["a", "b", "c"] {
        registry.create(server_config(id, "sleep 30")).await.unwrap();
    }
    let mut events = registry.subscribe();
    block_saves(dir.path());

    let err = registry.delete("b").await.unwrap_err();
    assert!(matches!(err, RegistryError::Config(ConfigError::Write { .. })), "{err:?}");

    let ids: Vec<_> = registry
        .list()
        .await
        .iter()
        .map(|s| s.id().to_string())
        .collect();
    assert_eq!(ids, ["a", "b", "c"]);
    assert!(registry.get("b").await.unwrap().is_probing());
    assert!(events.try_recv().is_err());

    registry.shutdown().await;
}

#[tokio::test]
async fn failed_edit_restores_the_previous_config() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());
    registry.load().await.unwrap();
    let server = registry
        .create(server_config("lobby", "sleep 30"))
        .await
        .unwrap();
    block_saves(dir.path());

    let err = registry
        .edit(
            "lobby",
            ServerConfigPatch {
                name: Some("Hub".to_string()),
                address: Some("127.0.0.1:25570".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Config(ConfigError::Write { .. })), "{err:?}");

    assert_eq!(server.config().await, server_config("lobby", "sleep 30"));
    assert_eq!(server.probe().await.address, "127.0.0.1:25565");

    registry.shutdown().await;
}
