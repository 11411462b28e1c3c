//! Mailbox routing and claiming against every store implementation

use minicluster::cluster::{
    ClusterMessageStore, Destination, MemoryClusterStore, Message, Node, NodeState,
    RocksClusterStore, SqliteClusterStore,
};
use std::sync::Arc;
use tempfile::TempDir;

fn node(id: &str) -> Node {
    Node::new(id, NodeState::Active).unwrap()
}

fn ids(messages: &[minicluster::cluster::ClusterMessage]) -> Vec<u64> {
    messages.iter().map(|m| m.id).collect()
}

/// Rows 1..=12 in send order
fn seed(store: &dyn ClusterMessageStore) {
    let (n1, n2) = (node("node1"), node("node2"));
    let to1 = Destination::node("node1").unwrap();
    let to2 = Destination::node("node2").unwrap();
    let rows: [(&Node, &Destination); 12] = [
        (&n1, &to2),                   // 1
        (&n2, &to1),                   // 2
        (&n2, &to1),                   // 3
        (&n1, &Destination::AllNodes), // 4
        (&n2, &Destination::AllNodes), // 5
        (&n1, &Destination::AllNodes), // 6
        (&n1, &to2),                   // 7
        (&n1, &Destination::AnyNode),  // 8
        (&n1, &Destination::AnyNode),  // 9
        (&n1, &to2),                   // 10
        (&n2, &Destination::AnyNode),  // 11
        (&n1, &Destination::AnyNode),  // 12
    ];
    for (i, (source, destination)) in rows.iter().enumerate() {
        let sent = store
            .send(source, destination, &Message::new("test", Some(format!("row {}", i + 1))).unwrap())
            .unwrap();
        assert_eq!(sent.id, i as u64 + 1);
    }
}

fn twelve_message_scenario(store: &dyn ClusterMessageStore) {
    seed(store);
    let (n1, n2, n3) = (node("node1"), node("node2"), node("node3"));

    let first = store.get_messages(&n1, &n2, None).unwrap();
    assert_eq!(ids(&first), vec![1, 4, 6, 7, 8, 9, 10, 12]);
    for m in first.iter().filter(|m| m.destination() == Destination::AnyNode) {
        assert_eq!(m.claimed_by_node_id.as_deref(), Some("node2"));
    }

    // node3 only gets node2's broadcast and node2's unclaimed ANY_NODE row
    let third = store.get_messages(&n2, &n3, None).unwrap();
    assert_eq!(ids(&third), vec![5, 11]);
    assert_eq!(third[1].claimed_by_node_id.as_deref(), Some("node3"));

    let back = store.get_messages(&n2, &n1, None).unwrap();
    assert_eq!(ids(&back), vec![2, 3, 5]);

    // claimed rows are gone, broadcasts are not
    assert_eq!(
        ids(&store.get_messages(&n1, &n2, Some(1)).unwrap()),
        vec![4, 6, 7, 10]
    );
    assert_eq!(
        ids(&store.get_messages(&n1, &n2, Some(5)).unwrap()),
        vec![6, 7, 10]
    );
    assert!(store.get_messages(&n1, &n2, Some(12)).unwrap().is_empty());
    assert_eq!(store.latest_message_id().unwrap(), Some(12));
}

#[test]
fn test_twelve_messages_memory() {
    twelve_message_scenario(&MemoryClusterStore::new());
}

#[test]
fn test_twelve_messages_rocksdb() {
    let dir = TempDir::new().unwrap();
    let store = RocksClusterStore::open(dir.path()).unwrap();
    twelve_message_scenario(&store);
}

#[test]
fn test_twelve_messages_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = SqliteClusterStore::open(dir.path().join("cluster.sqlite3")).unwrap();
    twelve_message_scenario(&store);
}

#[test]
fn test_payload_survives_storage() {
    let store = MemoryClusterStore::new();
    let message = Message::new("Backup Index", Some("snapshot~2024".into())).unwrap();
    store
        .send(&node("node1"), &Destination::node("node2").unwrap(), &message)
        .unwrap();
    let received = store.get_messages(&node("node1"), &node("node2"), None).unwrap();
    assert_eq!(received[0].message, message);
    assert_eq!(received[0].source_node_id, "node1");
}

fn concurrent_claims(store: Arc<dyn ClusterMessageStore>) {
    let sender = node("node1");
    for i in 0..50 {
        store
            .send(&sender, &Destination::AnyNode, &Message::new("work", Some(i.to_string())).unwrap())
            .unwrap();
    }

    let handles: Vec<_> = (2..=5)
        .map(|n| {
            let store = store.clone();
            std::thread::spawn(move || {
                let me = node(&format!("node{}", n));
                let mut seen = Vec::new();
                for _ in 0..10 {
                    seen.extend(ids(&store.get_messages(&node("node1"), &me, None).unwrap()));
                }
                seen
            })
        })
        .collect();

    let mut all: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();
    assert_eq!(all, (1..=50).collect::<Vec<_>>());
}

#[test]
fn test_any_node_claimed_exactly_once_under_contention_memory() {
    concurrent_claims(Arc::new(MemoryClusterStore::new()));
}

#[test]
fn test_any_node_claimed_exactly_once_under_contention_rocksdb() {
    let dir = TempDir::new().unwrap();
    concurrent_claims(Arc::new(RocksClusterStore::open(dir.path()).unwrap()));
}

#[test]
fn test_any_node_claimed_exactly_once_under_contention_sqlite() {
    let dir = TempDir::new().unwrap();
    concurrent_claims(Arc::new(
        SqliteClusterStore::open(dir.path().join("cluster.sqlite3")).unwrap(),
    ));
}

/// Each claimant holds its own connection, the way separate node processes do
#[test]
fn test_any_node_claimed_once_across_sqlite_connections() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cluster.sqlite3");
    let sender = SqliteClusterStore::open(&path).unwrap();
    for i in 0..30 {
        sender
            .send(
                &node("node1"),
                &Destination::AnyNode,
                &Message::new("work", Some(i.to_string())).unwrap(),
            )
            .unwrap();
    }

    let handles: Vec<_> = (2..=4)
        .map(|n| {
            let path = path.clone();
            std::thread::spawn(move || {
                let store = SqliteClusterStore::open(&path).unwrap();
                let me = node(&format!("node{}", n));
                let mut seen = Vec::new();
                for _ in 0..5 {
                    let got = store.get_messages(&node("node1"), &me, None).unwrap();
                    for m in &got {
                        assert_eq!(m.claimed_by_node_id.as_deref(), me.node_id());
                    }
                    seen.extend(ids(&got));
                }
                seen
            })
        })
        .collect();

    let mut all: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();
    assert_eq!(all, (1..=30).collect::<Vec<_>>());
}

#[test]
fn test_purge_keeps_recent_rows() {
    let dir = TempDir::new().unwrap();
    let store = RocksClusterStore::open(dir.path()).unwrap();
    seed(&store);
    assert_eq!(store.purge_before(0).unwrap(), 0);
    assert_eq!(store.purge_before(u64::MAX).unwrap(), 12);
    assert!(store
        .get_messages(&node("node1"), &node("node2"), None)
        .unwrap()
        .is_empty());
    // ids keep increasing after a purge
    let next = store
        .send(&node("node1"), &Destination::AllNodes, &Message::new("c", None).unwrap())
        .unwrap();
    assert_eq!(next.id, 13);
}
