// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Loading rigs and plans through the config port.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use anyhow::Result;
use avb_dry_tests::InMemoryConfigStore;
use avb_oracle_core::{Action, PlanError, TopologyError};
use avb_rig_config::{ConfigError, ConfigService, FsConfigStore, RigConfig};

fn testdata(rel: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../testdata").join(rel)
}

#[test]
fn shipped_rig_loads_from_disk() -> Result<()> {
    let (store, key) = FsConfigStore::for_file(&testdata("rigs/four.json"))?;
    let topology = ConfigService::new(store).load_rig(&key, "ci")?;
    assert_eq!(topology.endpoint_names(), ["dc0", "dc1", "dc2", "dc3"]);
    assert_eq!(topology.stream_id("dc0", 0).as_deref(), Some("0022970000010000"));
    assert!(topology.analyzer("relay2").is_some());
    assert!(!topology.endpoint("dc0").unwrap().descriptors.is_empty());
    Ok(())
}

#[test]
fn shipped_plan_resolves() -> Result<()> {
    let (store, key) = FsConfigStore::for_file(&testdata("plans/basics.json"))?;
    let service = ConfigService::new(store);
    let plan = service.load_plan(&key)?;
    assert_eq!(plan.seed, Some(7));
    let steps = service.resolve_plan(&key, None)?;
    assert_eq!(steps[0].action, Action::Discover);
    assert!(steps.iter().any(|s| matches!(s.action, Action::LinkDownUp { .. })));
    Ok(())
}

#[test]
fn bad_verb_fails_the_plan() {
    let (store, key) = FsConfigStore::for_file(&testdata("plans/bad_verb.json")).unwrap();
    let err = ConfigService::new(store).resolve_plan(&key, None).unwrap_err();
    assert!(matches!(err, ConfigError::Plan(PlanError::UnknownVerb(v)) if v == "teleport"));
}

#[test]
fn store_rooted_at_a_directory_reads_by_key() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::copy(testdata("rigs/four.json"), dir.path().join("bench.json"))?;
    std::fs::write(dir.path().join("blank.json"), "")?;
    std::fs::create_dir(dir.path().join("folder.json"))?;

    let service = ConfigService::new(FsConfigStore::new(dir.path()));
    assert_eq!(service.load_rig("bench", "ci")?.controller(), "ctl");
    assert!(service.load::<RigConfig>("bench.json")?.is_some());
    assert!(service.load::<RigConfig>("blank")?.is_none());
    assert!(matches!(service.load_rig("blank", "ci"), Err(ConfigError::NotFound)));
    assert!(matches!(service.load_plan("folder"), Err(ConfigError::Io(_))));
    Ok(())
}

#[test]
fn missing_keys_and_users_are_reported() {
    let service = ConfigService::new(InMemoryConfigStore::new());
    assert!(matches!(service.load_rig("rig", "ci"), Err(ConfigError::NotFound)));
    assert!(service.load::<RigConfig>("rig").unwrap().is_none());

    let rig = std::fs::read_to_string(testdata("rigs/four.json")).unwrap();
    let store = InMemoryConfigStore::new().with_text("rig", &rig);
    let service = ConfigService::new(store.clone());
    assert!(matches!(
        service.load_rig("rig", "nobody"),
        Err(ConfigError::Topology(TopologyError::MissingUser { .. }))
    ));
    assert_eq!(store.load_count(), 1);
}

#[test]
fn store_failures_propagate() {
    let store = InMemoryConfigStore::new();
    store.set_fail_on_load(true);
    let service = ConfigService::new(store);
    assert!(matches!(service.load_plan("plan"), Err(ConfigError::Other(_))));
}

#[test]
fn malformed_json_is_a_serde_error() {
    let store = InMemoryConfigStore::new().with_text("plan", "{\"steps\": 3}");
    let service = ConfigService::new(store);
    assert!(matches!(service.load_plan("plan"), Err(ConfigError::Serde(_))));
}
