//! Host wiring: config overrides, persistent blobs, shutdown and restart exits.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use leasegrid_core::{LeasegridConfig, ManualClock, RunnerSettings};
use leasegrid_host::{BLOB_FILE, CONFIG_CONTAINER, Host, HostExit};
use leasegrid_runner::{Delivery, HandlerError};
use leasegrid_storage::{BlobStore, MemoryBlobStore, MemoryQueueStore, WritePrecondition};
use tokio::sync::watch;

const FAST_BALANCER: &str = r#"
[balancer]
idle_backoff_min = "10ms"
idle_backoff_max = "20ms"
state_refresh = "50ms"

[retry]
max_retries = 2
backoff_cap = "1s"
"#;

fn memory_host(toml: &str) -> Host {
    let config = LeasegridConfig::from_toml_str(toml).unwrap();
    let queues = Arc::new(MemoryQueueStore::new(Arc::new(ManualClock::default())));
    Host::new(config, queues, Arc::new(MemoryBlobStore::new())).unwrap()
}

async fn wait_for(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[test]
fn runner_overrides_from_config() {
    let host = memory_host(
        r#"
[runners.orders]
batch_size = 5
visibility_timeout = "2m"
max_trials = 2
auto_start = false
"#,
    );
    let settings = host.settings(RunnerSettings::new("orders")).unwrap();
    assert_eq!(settings.batch_size, 5);
    assert_eq!(settings.visibility_timeout, Duration::from_secs(120));
    assert_eq!(settings.max_trials, 2);
    assert!(!settings.auto_start);

    let untouched = host.settings(RunnerSettings::new("emails")).unwrap();
    assert_eq!(untouched, RunnerSettings::new("emails"));
}

#[test]
fn invalid_balancer_section_is_rejected() {
    let config = LeasegridConfig::from_toml_str(
        r#"
[balancer]
idle_backoff_min = "10s"
idle_backoff_max = "1s"
"#,
    )
    .unwrap();
    let queues = Arc::new(MemoryQueueStore::new(Arc::new(ManualClock::default())));
    let err = Host::new(config, queues, Arc::new(MemoryBlobStore::new()))
        .err()
        .unwrap();
    assert!(format!("{err:#}").contains("[balancer]"));
}

#[tokio::test]
async fn open_persists_blobs_under_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("state");
    let toml = format!("[storage]\ndata_dir = {:?}\n", data_dir.display().to_string());
    let config = LeasegridConfig::from_toml_str(&toml).unwrap();
    let queues = Arc::new(MemoryQueueStore::new(Arc::new(ManualClock::default())));

    let host = Host::open(config, queues).unwrap();
    host.blobs()
        .put("jobs", "marker", Bytes::from_static(b"1"), WritePrecondition::None)
        .await
        .unwrap();
    assert!(data_dir.join(BLOB_FILE).exists());
}

#[tokio::test]
async fn open_without_data_dir_uses_memory() {
    let config = LeasegridConfig::from_toml_str("").unwrap();
    let queues = Arc::new(MemoryQueueStore::new(Arc::new(ManualClock::default())));
    let host = Host::open(config, queues).unwrap();
    assert!(host.blobs().get("jobs", "marker").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_service_registration_fails() {
    let host = memory_host(FAST_BALANCER);
    let handler = |_: u32, _: Delivery| async { Ok::<(), HandlerError>(()) };
    host.register_service(RunnerSettings::new("orders"), handler)
        .await
        .unwrap();
    let err = host
        .register_service(RunnerSettings::new("orders"), handler)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("orders"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn processes_messages_then_shuts_down() {
    let host = Arc::new(memory_host(FAST_BALANCER));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let seen = seen.clone();
        move |job: u32, _: Delivery| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(job);
                Ok::<(), HandlerError>(())
            }
        }
    };
    host.register_service(RunnerSettings::new("orders"), handler)
        .await
        .unwrap();
    host.queue("orders").push(&[1u32, 2, 3]).await.unwrap();

    let (tx, rx) = watch::channel(false);
    let running = {
        let host = host.clone();
        tokio::spawn(async move { host.run_until(rx).await })
    };
    wait_for(|| seen.lock().unwrap().len() == 3).await;
    tx.send(true).unwrap();

    assert_eq!(running.await.unwrap(), HostExit::Shutdown);
    let mut jobs = seen.lock().unwrap().clone();
    jobs.sort();
    assert_eq!(jobs, vec![1, 2, 3]);
    assert_eq!(host.queue("orders").approximate_count().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn config_blob_change_restarts() {
    let host = memory_host(FAST_BALANCER).with_config_watch("leasegrid.toml");
    let blobs = host.blobs().clone();
    let host = Arc::new(host);

    let (_tx, rx) = watch::channel(false);
    let running = {
        let host = host.clone();
        tokio::spawn(async move { host.run_until(rx).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    blobs
        .put(
            CONFIG_CONTAINER,
            "leasegrid.toml",
            Bytes::from_static(b"[balancer]\n"),
            WritePrecondition::None,
        )
        .await
        .unwrap();

    let exit = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .unwrap()
        .unwrap();
    match exit {
        HostExit::Restart(restart) => assert!(restart.reason.contains("leasegrid.toml")),
        HostExit::Shutdown => panic!("expected a restart"),
    }
}
