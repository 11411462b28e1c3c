//! Activation/deactivation step ordering with recording collaborators

use minicluster::cluster::{
    CacheControl, ClusterNodeProperties, DirectorySyncBarrier, LifecycleEvent, LifecycleListener,
    MailQueueControl, MemoryClusterStore, Node, NodeState, NodeStateManager, NodeTable,
    SchedulerControl, Subsystems, TaskManagerControl,
};
use minicluster::{Error, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every call in order; stands in for all collaborators at once
#[derive(Default)]
struct Recorder {
    steps: Mutex<Vec<String>>,
    store: MemoryClusterStore,
    fail_cache_flush: bool,
    tasks_time_out: bool,
}

impl Recorder {
    fn record(&self, step: impl Into<String>) {
        self.steps.lock().unwrap().push(step.into());
    }

    fn steps(&self) -> Vec<String> {
        self.steps.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.steps.lock().unwrap().clear();
    }
}

impl LifecycleListener for Recorder {
    fn on_event(&self, event: LifecycleEvent) {
        self.record(format!("event {:?}", event));
    }
}

impl CacheControl for Recorder {
    fn flush(&self) -> Result<()> {
        self.record("cache flush");
        if self.fail_cache_flush {
            return Err(Error::subsystem("cache", "flush refused"));
        }
        Ok(())
    }
}

impl SchedulerControl for Recorder {
    fn start(&self) -> Result<()> {
        self.record("scheduler start");
        Ok(())
    }

    fn standby(&self) -> Result<()> {
        self.record("scheduler standby");
        Ok(())
    }
}

impl TaskManagerControl for Recorder {
    fn start(&self) -> Result<()> {
        self.record("tasks start");
        Ok(())
    }

    fn shutdown_and_wait(&self, timeout: Duration) -> Result<bool> {
        self.record(format!("tasks shutdown {}s", timeout.as_secs()));
        Ok(!self.tasks_time_out)
    }
}

impl MailQueueControl for Recorder {
    fn flush(&self) -> Result<()> {
        self.record("mail flush");
        Ok(())
    }
}

impl DirectorySyncBarrier for Recorder {
    fn await_barrier(&self, timeout: Duration) -> Result<bool> {
        self.record(format!("directory sync {}s", timeout.as_secs()));
        Ok(true)
    }
}

impl NodeTable for Recorder {
    fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        self.store.get_node(node_id)
    }

    fn put_node(&self, node: &Node) -> Result<()> {
        self.record(format!(
            "persist {} {}:{}",
            node.state(),
            node.hostname().unwrap_or("-"),
            node.cache_listener_port().unwrap_or(0)
        ));
        self.store.put_node(node)
    }

    fn list_nodes(&self) -> Result<Vec<Node>> {
        self.store.list_nodes()
    }
}

fn manager_with(recorder: Arc<Recorder>) -> NodeStateManager {
    let subsystems = Subsystems {
        cache: recorder.clone(),
        scheduler: recorder.clone(),
        tasks: recorder.clone(),
        mail: recorder.clone(),
        directory_sync: recorder.clone(),
    };
    NodeStateManager::new(
        ClusterNodeProperties::new(Some("node1".into()), "alpha.example", 40001),
        recorder.clone(),
        subsystems,
    )
    .with_listener(recorder)
}

fn seed_state(recorder: &Recorder, state: NodeState) {
    recorder
        .store
        .put_node(&Node::new("node1", state).unwrap())
        .unwrap();
}

#[test]
fn test_activate_step_order() {
    let recorder = Arc::new(Recorder::default());
    seed_state(&recorder, NodeState::Passive);
    let manager = manager_with(recorder.clone());

    let node = manager.activate().unwrap();
    assert_eq!(node.state(), NodeState::Active);
    assert_eq!(
        recorder.steps(),
        vec![
            "persist ACTIVATING alpha.example:40001",
            "event NodeActivating",
            "event ClearCache",
            "cache flush",
            "scheduler start",
            "tasks start",
            "persist ACTIVE alpha.example:40001",
            "event NodeActivated",
        ]
    );
    assert_eq!(
        recorder.store.get_node("node1").unwrap().unwrap().state(),
        NodeState::Active
    );
}

#[test]
fn test_deactivate_step_order() {
    let recorder = Arc::new(Recorder::default());
    seed_state(&recorder, NodeState::Active);
    let manager = manager_with(recorder.clone());

    let node = manager.deactivate().unwrap();
    assert_eq!(node.state(), NodeState::Passive);
    assert_eq!(
        recorder.steps(),
        vec![
            "event NodePassivating",
            "scheduler standby",
            "tasks shutdown 20s",
            "directory sync 20s",
            "mail flush",
            "persist PASSIVATING alpha.example:40001",
            "persist PASSIVE alpha.example:40001",
            "event NodePassivated",
        ]
    );
}

#[test]
fn test_expired_wait_does_not_abort_deactivation() {
    let recorder = Arc::new(Recorder {
        tasks_time_out: true,
        ..Default::default()
    });
    seed_state(&recorder, NodeState::Active);
    let manager = manager_with(recorder.clone());

    assert_eq!(manager.deactivate().unwrap().state(), NodeState::Passive);
    assert_eq!(manager.metrics().bounded_wait_timeouts.get(), 1);
    assert!(recorder.steps().contains(&"mail flush".to_string()));
}

#[test]
fn test_failed_step_leaves_activating() {
    let recorder = Arc::new(Recorder {
        fail_cache_flush: true,
        ..Default::default()
    });
    seed_state(&recorder, NodeState::Passive);
    let manager = manager_with(recorder.clone());

    let err = manager.activate().unwrap_err();
    assert!(matches!(err, Error::Subsystem { .. }));
    assert_eq!(
        recorder.store.get_node("node1").unwrap().unwrap().state(),
        NodeState::Activating
    );
    assert!(!recorder.steps().contains(&"scheduler start".to_string()));
    assert_eq!(manager.metrics().lifecycle_failures.get(), 1);
}

#[test]
fn test_activating_node_reruns_activation() {
    let recorder = Arc::new(Recorder::default());
    seed_state(&recorder, NodeState::Activating);
    let manager = manager_with(recorder.clone());

    assert_eq!(manager.activate().unwrap().state(), NodeState::Active);
    assert_eq!(recorder.steps()[0], "persist ACTIVATING alpha.example:40001");
}

#[test]
fn test_repeat_calls_are_noops() {
    let recorder = Arc::new(Recorder::default());
    seed_state(&recorder, NodeState::Active);
    let manager = manager_with(recorder.clone());

    manager.activate().unwrap();
    assert!(recorder.steps().is_empty());

    manager.deactivate().unwrap();
    recorder.clear();
    manager.deactivate().unwrap();
    assert!(recorder.steps().is_empty());
}

#[test]
fn test_not_clustered_lifecycle_fails() {
    let recorder = Arc::new(Recorder::default());
    let manager = NodeStateManager::new(
        ClusterNodeProperties::not_clustered(),
        recorder.clone(),
        Subsystems::detached(),
    )
    .with_listener(recorder.clone());

    assert!(matches!(manager.activate(), Err(Error::NotClustered)));
    assert!(matches!(manager.deactivate(), Err(Error::NotClustered)));
    assert_eq!(
        manager.activate().unwrap_err().to_string(),
        minicluster::common::error::NOT_CLUSTERED_MESSAGE
    );
    assert!(recorder.steps().is_empty());
}
