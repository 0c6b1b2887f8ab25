//! End-to-end tests for a fully wired shardhubd instance.
//!
//! Each test starts complete daemons (real runtime, virtual pins, in-process
//! peer network) from TOML configuration; no TCP port is bound.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use shardhub_adapter_virtual::MemoryNetwork;
use shardhub_app::space::FindOptions;
use shardhub_domain::commit::Revision;
use shardhub_domain::entry::{Cache, EntryKind};
use shardhub_domain::error::ErrorClass;
use shardhub_domain::peer::ConnectionState;
use shardhub_domain::shard::EntrySeed;
use shardhub_domain::state::ShardState;
use shardhubd::config::Config;
use shardhubd::daemon::Daemon;
use shardhubd::script::{Output, Script};

const RPI_DEMO: &str = include_str!("../../../../demos/rpi.toml");

fn rpi_config() -> Config {
    let mut config: Config = toml::from_str(RPI_DEMO).expect("demo config should parse");
    config.listen.addr = None;
    config.space.peers.clear();
    config.validate().expect("demo config should validate");
    config
}

fn player_config() -> Config {
    let mut config: Config = toml::from_str(
        r#"
        [instance]
        name = "player"

        [space]
        name = "example.org"
        home = "player"
        [space.peers]
        rpi = "mem://rpi"

        [link]
        request_timeout_ms = 2000
        backoff_initial_ms = 10
        backoff_max_ms = 40

        [[shards]]
        id = 6
        alias = "rpi"
        home = "rpi"
        "#,
    )
    .expect("player config should parse");
    config.validate().expect("player config should validate");
    config
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}

async fn start_rpi(network: &Arc<MemoryNetwork>) -> Daemon {
    Daemon::start(&rpi_config(), network.clone())
        .await
        .expect("rpi instance should start")
}

fn cache(daemon: &Daemon, entry: &str) -> Cache {
    let shard = daemon
        .space()
        .shards()
        .into_iter()
        .find(|shard| shard.alias() == "rpi")
        .expect("rpi shard");
    shard.find(entry).expect("entry").cache
}

// ---------------------------------------------------------------------------
// Single instance
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_seed_rpi_shard_from_demo_config() {
    let network = Arc::new(MemoryNetwork::default());
    let rpi = start_rpi(&network).await;

    let shard = rpi.space().find_shard("rpi").await.unwrap();
    assert_eq!(shard.revision(), Revision(6));
    let mut ids: Vec<String> = shard.entries().iter().map(|e| e.id.to_string()).collect();
    ids.sort();
    assert_eq!(
        ids,
        vec!["camera1", "heater1", "highTariff", "light1", "rpi", "switch1"]
    );
    assert_eq!(shard.entries_of_kind(EntryKind::Light).len(), 1);

    let images = rpi.space().find_shard("rpiImages").await.unwrap();
    assert!(images.entries().is_empty());

    rpi.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_start_with_rejected_seeds_and_accept_corrective_commit() {
    let network = Arc::new(MemoryNetwork::default());
    let mut config = rpi_config();
    config.shards[0].entries.push(EntrySeed::new(
        "door",
        EntryKind::Din,
        json!({"master": "ghost", "pin": 22}),
    ));
    let rpi = Daemon::start(&config, network.clone())
        .await
        .expect("rpi instance should start");

    let shard = rpi
        .space()
        .shards()
        .into_iter()
        .find(|shard| shard.alias() == "rpi")
        .expect("rpi shard");
    assert_eq!(shard.state(), ShardState::Uninitialized);
    assert!(shard.entries().is_empty());
    rpi.space().find_shard("rpiImages").await.unwrap();

    let mut tx = shard.start_trans();
    tx.add("rpi", EntryKind::Rpi, json!({"name": "Raspberry Pi 1"}))
        .unwrap();
    tx.add("switch1", EntryKind::Switch, json!({"master": "rpi", "pin": 4}))
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(shard.state(), ShardState::Ready);

    let posted = tokio::time::timeout(Duration::from_secs(5), async {
        while shard
            .post("rpi", "emulatePin", json!({"index": 4, "value": 1}))
            .await
            .is_err()
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(posted.is_ok(), "timed out waiting for the rpi behavior");
    eventually("switch1 to activate", || cache(&rpi, "switch1").is_active()).await;

    rpi.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_turn_light_on_when_switch_pin_is_emulated() {
    let network = Arc::new(MemoryNetwork::default());
    let rpi = start_rpi(&network).await;

    rpi.space()
        .post("rpi", "rpi", "emulatePin", json!({"index": 4, "value": 1}))
        .await
        .unwrap();

    eventually("switch1 to activate", || cache(&rpi, "switch1").is_active()).await;
    eventually("light1 to turn on", || {
        cache(&rpi, "light1") == Cache::Light { on: true }
    })
    .await;
    eventually("pin 14 to be driven", || rpi.gpio().level(14)).await;

    rpi.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_gate_heater_by_high_tariff() {
    let network = Arc::new(MemoryNetwork::default());
    let rpi = start_rpi(&network).await;
    let space = rpi.space();

    let reply = space
        .post("rpi", "heater1", "power", json!(0.5))
        .await
        .unwrap();
    assert_eq!(reply["requested"], 0.5);
    eventually("heater duty 0.5", || rpi.gpio().duty(17) == Some(0.5)).await;

    space
        .post("rpi", "rpi", "emulatePin", json!({"pin": 15, "value": 1}))
        .await
        .unwrap();
    eventually("heater gated off", || rpi.gpio().duty(17) == Some(0.0)).await;

    space
        .post("rpi", "rpi", "emulatePin", json!({"pin": 15, "value": 0}))
        .await
        .unwrap();
    eventually("heater restored", || rpi.gpio().duty(17) == Some(0.5)).await;

    let err = space
        .post("rpi", "heater1", "power", json!(1.5))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Validation);

    rpi.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_save_camera_still_into_images_shard() {
    let network = Arc::new(MemoryNetwork::default());
    let rpi = start_rpi(&network).await;

    let reply = rpi
        .space()
        .post("rpi", "camera1", "still", Value::Null)
        .await
        .unwrap();
    assert_eq!(reply["image"], "rpiImages/img-00001.jpg");
    assert_eq!(rpi.blobs().list("rpiImages").len(), 1);
    eventually("camera cache", || {
        matches!(
            cache(&rpi, "camera1"),
            Cache::Camera { last_image: Some(_), .. }
        )
    })
    .await;

    rpi.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_run_demo_script() {
    let network = Arc::new(MemoryNetwork::default());
    let config = rpi_config();
    let rpi = Daemon::start(&config, network.clone()).await.unwrap();

    let script = Script::parse(&config.script.steps).unwrap();
    let outputs = script.run(rpi.hub()).await.unwrap();

    assert_eq!(outputs.len(), 2);
    assert!(matches!(&outputs[0], Output::Reply { result: Ok(_), .. }));
    let Output::Info(info) = &outputs[1] else {
        panic!("expected info output");
    };
    assert_eq!(info["id"], "switch1");
    assert_eq!(info["cache"], json!({"type": "input", "value": true}));

    rpi.shutdown().await;
}

// ---------------------------------------------------------------------------
// Two instances
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_replicate_and_relay_commands_to_home() {
    let network = Arc::new(MemoryNetwork::default());
    let rpi = start_rpi(&network).await;
    network.listen("mem://rpi", rpi.space().clone());
    let player = Daemon::start(&player_config(), network.clone()).await.unwrap();

    let options = FindOptions {
        wait_for_peer: true,
        timeout: Some(Duration::from_secs(5)),
    };
    let replica = player.space().find_shard_with("rpi", options).await.unwrap();
    assert!(replica.is_replica());
    assert_eq!(replica.revision(), Revision(6));
    assert!(replica.get("heater1").is_some());

    let reply = player
        .space()
        .post("rpi", "light1", "on", Value::Null)
        .await
        .unwrap();
    assert_eq!(reply, json!({"on": true}));
    eventually("replica sees light1 on", || {
        replica.get("light1").map(|e| e.cache) == Some(Cache::Light { on: true })
    })
    .await;

    player.shutdown().await;
    rpi.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_replay_missed_changes_after_reconnect() {
    let network = Arc::new(MemoryNetwork::default());
    let rpi = start_rpi(&network).await;
    network.listen("mem://rpi", rpi.space().clone());
    let player = Daemon::start(&player_config(), network.clone()).await.unwrap();

    let options = FindOptions {
        wait_for_peer: true,
        timeout: Some(Duration::from_secs(5)),
    };
    let replica = player.space().find_shard_with("rpi", options).await.unwrap();
    let link = player.space().link("rpi").unwrap();

    network.set_offline("mem://rpi", true);
    network.sever();
    eventually("link to drop", || !link.state().is_connected()).await;

    let canonical = rpi.space().find_shard("rpi").await.unwrap();
    let mut tx = canonical.start_trans();
    tx.add("din2", EntryKind::Din, json!({"master": "rpi", "pin": 22}))
        .unwrap();
    tx.add("dout2", EntryKind::Dout, json!({"master": "rpi", "pin": 23}))
        .unwrap();
    assert_eq!(tx.commit().await.unwrap(), Revision(8));
    assert_eq!(replica.revision(), Revision(6));

    network.set_offline("mem://rpi", false);
    eventually("link to come back", || {
        link.state() == ConnectionState::Connected
    })
    .await;
    eventually("replica to catch up", || replica.revision() == Revision(8)).await;

    let revisions: Vec<u64> = replica
        .changes_since(Revision::ZERO)
        .iter()
        .map(|change| change.revision.0)
        .collect();
    assert_eq!(revisions, (1..=8).collect::<Vec<_>>());
    assert!(replica.get("din2").is_some());
    assert!(replica.get("dout2").is_some());

    player.shutdown().await;
    rpi.shutdown().await;
}
