//! Concurrent admission integration tests.
//!
//! These tests race real tasks against a shared coordinator to check the
//! guarantees that matter under contention: one writer per file, complete
//! release, and a sweeper that runs alongside foreground traffic.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use corral::{
    Admission, AgentId, Coordinator, CoordinationConfig, LockMode, ManualClock, StaticDescriptors,
    StaticOracle, TaskDescriptor,
};
use tempfile::TempDir;

fn writing_task(paths: &[&str]) -> TaskDescriptor {
    let mut d = TaskDescriptor::new("backend", 2);
    d.modifies_files = paths.iter().map(PathBuf::from).collect();
    d
}

async fn open_coordinator(temp: &TempDir, descriptors: StaticDescriptors) -> (Arc<ManualClock>, Arc<Coordinator>) {
    let config = CoordinationConfig {
        data_dir: temp.path().join("coordination"),
        sweep_interval_secs: 1,
        ..Default::default()
    };
    let clock = Arc::new(ManualClock::starting_now());
    let coordinator = Coordinator::open(
        config,
        clock.clone(),
        Arc::new(StaticOracle::new()),
        Arc::new(descriptors),
    )
    .await
    .unwrap();
    (clock, Arc::new(coordinator))
}

/// Two tasks that both write `f.txt` race their admissions: exactly one may
/// win, and every loser must cite the contended file.
#[tokio::test]
async fn test_concurrent_admission_single_winner() {
    let temp = TempDir::new().unwrap();

    let mut descriptors = StaticDescriptors::new();
    for i in 0..10 {
        descriptors.insert(format!("tasks/t{}.md", i), writing_task(&["f.txt"]));
    }
    let (_clock, coordinator) = open_coordinator(&temp, descriptors).await;

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .admit(
                        &AgentId(format!("agent-{}", i)),
                        "backend",
                        Path::new(&format!("tasks/t{}.md", i)),
                    )
                    .await
                    .unwrap()
            })
        })
        .collect();

    let outcomes: Vec<Admission> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let admitted = outcomes.iter().filter(|o| o.is_admitted()).count();
    assert_eq!(admitted, 1, "exactly one writer may win");

    for outcome in &outcomes {
        if let Admission::Rejected { reasons } = outcome {
            assert!(
                reasons.iter().any(|r| r.contains("f.txt")),
                "rejection must cite the contended file, got {:?}",
                reasons
            );
        }
    }

    // At most one write lock on the contended file
    let report = coordinator.status().await.unwrap();
    let writers = report
        .locks
        .iter()
        .filter(|l| l.mode == LockMode::Write)
        .count();
    assert_eq!(writers, 1);
}

/// Admissions over disjoint footprints all succeed concurrently.
#[tokio::test]
async fn test_concurrent_disjoint_admissions() {
    let temp = TempDir::new().unwrap();

    let mut descriptors = StaticDescriptors::new();
    for i in 0..8 {
        descriptors.insert(format!("tasks/t{}.md", i), writing_task(&[&format!("file-{}.txt", i)]));
    }
    let (_clock, coordinator) = open_coordinator(&temp, descriptors).await;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .admit(
                        &AgentId(format!("agent-{}", i)),
                        "backend",
                        Path::new(&format!("tasks/t{}.md", i)),
                    )
                    .await
                    .unwrap()
            })
        })
        .collect();

    let outcomes = futures::future::join_all(handles).await;
    assert!(outcomes.into_iter().all(|r| r.unwrap().is_admitted()));

    let report = coordinator.status().await.unwrap();
    assert_eq!(report.active_agents, 8);
    assert_eq!(report.active_locks, 8);
}

/// Releasing under concurrent re-admission pressure: the freed file is
/// reacquirable exactly once.
#[tokio::test]
async fn test_release_then_contended_readmission() {
    let temp = TempDir::new().unwrap();

    let mut descriptors = StaticDescriptors::new();
    descriptors.insert("tasks/hold.md", writing_task(&["f.txt"]));
    for i in 0..5 {
        descriptors.insert(format!("tasks/t{}.md", i), writing_task(&["f.txt"]));
    }
    let (_clock, coordinator) = open_coordinator(&temp, descriptors).await;

    let holder = AgentId::from("holder");
    assert!(coordinator
        .admit(&holder, "backend", Path::new("tasks/hold.md"))
        .await
        .unwrap()
        .is_admitted());
    assert!(coordinator.release(&holder).await.unwrap());

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .admit(
                        &AgentId(format!("agent-{}", i)),
                        "backend",
                        Path::new(&format!("tasks/t{}.md", i)),
                    )
                    .await
                    .unwrap()
            })
        })
        .collect();

    let outcomes = futures::future::join_all(handles).await;
    let admitted = outcomes.into_iter().filter(|r| r.as_ref().unwrap().is_admitted()).count();
    assert_eq!(admitted, 1);
}

/// The background sweeper reclaims a stale agent while admissions continue.
#[tokio::test]
async fn test_sweeper_runs_alongside_admissions() {
    let temp = TempDir::new().unwrap();

    let descriptors = StaticDescriptors::new()
        .with("tasks/stale.md", writing_task(&["x.txt"]))
        .with("tasks/live.md", writing_task(&["y.txt"]));
    let (clock, coordinator) = open_coordinator(&temp, descriptors).await;

    let stale = AgentId::from("stale-agent");
    coordinator
        .admit(&stale, "backend", Path::new("tasks/stale.md"))
        .await
        .unwrap();

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let sweeper = tokio::spawn(coordinator.clone().run_sweeper(shutdown_tx.subscribe()));

    // Push the stale agent past its heartbeat deadline, then keep admitting.
    clock.advance(chrono::Duration::minutes(16));
    let live = AgentId::from("live-agent");
    assert!(coordinator
        .admit(&live, "backend", Path::new("tasks/live.md"))
        .await
        .unwrap()
        .is_admitted());

    // Wait for a sweep tick to pick up the stale agent, watching the
    // persisted document rather than status() (which reclaims on its own).
    let agents_file = temp.path().join("coordination").join("agents.json");
    let mut reclaimed = false;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let raw = std::fs::read_to_string(&agents_file).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let ids: Vec<&str> = doc["agents"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|a| a["id"].as_str())
            .collect();
        if !ids.contains(&"stale-agent") {
            reclaimed = true;
            break;
        }
    }
    assert!(reclaimed, "sweeper should have reclaimed the stale agent");

    let report = coordinator.status().await.unwrap();
    assert!(report.locks.iter().all(|l| l.holder != stale));
    assert!(report.agents.iter().any(|a| a.id == live));

    shutdown_tx.send(()).unwrap();
    sweeper.await.unwrap();
}

/// Coordination state persists across coordinator instances: a lock taken
/// before a crash still blocks after reopening from disk.
#[tokio::test]
async fn test_persisted_state_blocks_after_reopen() {
    let temp = TempDir::new().unwrap();
    let data_dir = temp.path().join("coordination");

    {
        let config = CoordinationConfig {
            data_dir: data_dir.clone(),
            ..Default::default()
        };
        let descriptors = StaticDescriptors::new().with("tasks/t1.md", writing_task(&["f.txt"]));
        let coordinator = Coordinator::open(
            config,
            Arc::new(ManualClock::starting_now()),
            Arc::new(StaticOracle::new()),
            Arc::new(descriptors),
        )
        .await
        .unwrap();
        coordinator
            .admit(&AgentId::from("A1"), "backend", Path::new("tasks/t1.md"))
            .await
            .unwrap();
        // Dropped without release, as a crashed process would be.
    }

    let config = CoordinationConfig {
        data_dir,
        ..Default::default()
    };
    let descriptors = StaticDescriptors::new().with("tasks/t2.md", writing_task(&["f.txt"]));
    let reopened = Coordinator::open(
        config,
        Arc::new(ManualClock::starting_now()),
        Arc::new(StaticOracle::new()),
        Arc::new(descriptors),
    )
    .await
    .unwrap();

    let outcome = reopened
        .admit(&AgentId::from("A2"), "backend", Path::new("tasks/t2.md"))
        .await
        .unwrap();
    match outcome {
        Admission::Rejected { reasons } => {
            assert_eq!(reasons, vec!["file locked: f.txt by A1".to_string()]);
        }
        Admission::Admitted => panic!("persisted lock must still block"),
    }
}
