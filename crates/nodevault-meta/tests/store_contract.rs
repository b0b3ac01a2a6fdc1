//! Both store backends must honour the same contract.

use nodevault_config::StoreConfig;
use nodevault_meta::{FindOptions, LmdbNodeStore, MemoryNodeStore, Node, NodeStore, Query};
use tempfile::TempDir;

fn check_contract(store: &dyn NodeStore) {
    let mut whole = Node::with_id("ffffff0001");
    whole.file.is_virtual = true;
    whole.file.virtual_parts = vec!["aaaaaa0001".into(), "bbbbbb0001".into()];
    store.upsert(&whole).unwrap();
    store.upsert(&Node::with_id("aaaaaa0001")).unwrap();
    store.upsert(&Node::with_id("bbbbbb0001")).unwrap();

    // referencing lookup used by delete integrity checks
    let refs = store
        .find(&Query::VirtualPart("aaaaaa0001".into()), FindOptions::default())
        .unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].id, "ffffff0001");

    // id lists resolve by key: duplicates collapse, misses are skipped
    let wanted = Query::IdIn(vec![
        "bbbbbb0001".into(),
        "zzzzzz0001".into(),
        "aaaaaa0001".into(),
        "bbbbbb0001".into(),
    ]);
    let ids: Vec<String> = store
        .find(&wanted, FindOptions::default())
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(ids, vec!["aaaaaa0001", "bbbbbb0001"]);
    assert_eq!(
        store.find(&wanted, FindOptions::page(1, 1)).unwrap()[0].id,
        "bbbbbb0001"
    );

    // pagination only with both bounds
    let half = FindOptions {
        limit: Some(1),
        offset: None,
    };
    assert_eq!(store.find(&Query::All, half).unwrap().len(), 3);
    assert_eq!(
        store.find(&Query::All, FindOptions::page(1, 2)).unwrap()[0].id,
        "ffffff0001"
    );

    // replace keeps a single record per id
    let mut again = Node::with_id("aaaaaa0001");
    again.file.name = "renamed".into();
    store.upsert(&again).unwrap();
    assert_eq!(store.find(&Query::All, FindOptions::default()).unwrap().len(), 3);
    assert_eq!(store.get("aaaaaa0001").unwrap().unwrap().file.name, "renamed");

    assert_eq!(store.delete(&Query::Id("aaaaaa0001".into())).unwrap(), 1);
    assert!(store.get("aaaaaa0001").unwrap().is_none());
}

#[test]
fn memory_store_contract() {
    check_contract(&MemoryNodeStore::new());
}

#[test]
fn lmdb_store_contract() {
    let temp = TempDir::new().unwrap();
    let store = LmdbNodeStore::connect(&StoreConfig {
        address: temp.path().join("meta"),
        dial_timeout_ms: 5000,
        map_size: 16 * 1024 * 1024,
    })
    .unwrap();
    check_contract(&store);
}
