//! LMDB-backed node store.
//!
//! Two named databases share one environment:
//! - `nodes`: node id → descriptor (JSON)
//! - `preauth`: token id → [`PreAuth`] (JSON)
//!
//! Keys are node identifiers, so the identifier-uniqueness constraint is the
//! key constraint itself and store-native order is identifier order.

use std::path::Path;
use std::time::Duration;

use crossbeam_channel::bounded;
use heed::types::{SerdeJson, Str};
use heed::{Database, Env, EnvOpenOptions};

use nodevault_config::{log_store_debug, log_store_error, log_store_warn, StoreConfig};

use crate::query::{FindOptions, Query};
use crate::store::NodeStore;
use crate::{Node, PreAuth, StoreError, StoreResult};

type NodesDb = Database<Str, SerdeJson<Node>>;
type PreAuthDb = Database<Str, SerdeJson<PreAuth>>;

/// Persistent node store on an LMDB environment
pub struct LmdbNodeStore {
    env: Env,
    nodes: NodesDb,
    preauth: PreAuthDb,
}

impl LmdbNodeStore {
    /// Maximum readers
    const MAX_READERS: u32 = 128;

    /// Open the store described by `config`.
    ///
    /// Opening runs on a helper thread; if it has not finished within
    /// `dial_timeout_ms` the call fails with [`StoreError::Unreachable`].
    /// Once open, the identifier-keyed databases are created; failure there
    /// is reported as [`StoreError::IndexInit`].
    pub fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let timeout = Duration::from_millis(config.dial_timeout_ms);
        let address = config.address.clone();
        let map_size = config.map_size;

        let open_path = address.clone();
        let env = dial(&address, timeout, move || Self::open_env(&open_path, map_size))?;

        let (nodes, preauth) = Self::ensure_indexes(&env)?;
        log_store_debug!("Opened node store", address = tracing::field::debug(&address));

        Ok(Self {
            env,
            nodes,
            preauth,
        })
    }

    /// Open with defaults for everything but the location.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let config = StoreConfig {
            address: path.as_ref().to_path_buf(),
            ..StoreConfig::default()
        };
        Self::connect(&config)
    }

    fn open_env(path: &Path, map_size: usize) -> StoreResult<Env> {
        std::fs::create_dir_all(path)?;
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_readers(Self::MAX_READERS)
                .max_dbs(2)
                .open(path)?
        };
        Ok(env)
    }

    fn ensure_indexes(env: &Env) -> StoreResult<(NodesDb, PreAuthDb)> {
        let init = || -> heed::Result<(NodesDb, PreAuthDb)> {
            let mut wtxn = env.write_txn()?;
            let nodes = env.create_database(&mut wtxn, Some("nodes"))?;
            let preauth = env.create_database(&mut wtxn, Some("preauth"))?;
            wtxn.commit()?;
            Ok((nodes, preauth))
        };
        init().map_err(|e| {
            log_store_error!(
                "fatal store initialization error",
                error = tracing::field::display(&e)
            );
            StoreError::IndexInit(e.to_string())
        })
    }

    /// Flush the environment to disk
    pub fn sync(&self) -> StoreResult<()> {
        self.env.force_sync()?;
        Ok(())
    }

    /// Number of node descriptors
    pub fn len(&self) -> StoreResult<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.nodes.len(&rtxn)?)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Run `open` on a helper thread and wait at most `timeout` for it.
fn dial<T, F>(address: &Path, timeout: Duration, open: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StoreResult<T> + Send + 'static,
{
    let (tx, rx) = bounded(1);
    std::thread::spawn(move || {
        // Receiver may have given up already.
        let _ = tx.send(open());
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => {
            log_store_error!(
                "no reachable metadata store",
                address = tracing::field::debug(address),
                timeout_ms = timeout.as_millis() as u64
            );
            Err(StoreError::Unreachable {
                address: address.to_path_buf(),
                timeout,
            })
        }
    }
}

impl NodeStore for LmdbNodeStore {
    fn upsert(&self, node: &Node) -> StoreResult<()> {
        let mut wtxn = self.env.write_txn()?;
        self.nodes
            .put(&mut wtxn, &node.id, node)
            .and_then(|_| wtxn.commit())
            .map_err(|e| {
                if matches!(e, heed::Error::Mdb(heed::MdbError::MapFull)) {
                    log_store_warn!(
                        "node store map is full, raise store.map_size",
                        id = node.id.as_str()
                    );
                }
                e
            })?;
        Ok(())
    }

    fn find(&self, query: &Query, options: FindOptions) -> StoreResult<Vec<Node>> {
        let rtxn = self.env.read_txn()?;

        if let Some(keys) = query.keys() {
            let mut found = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(node) = self.nodes.get(&rtxn, key)? {
                    found.push(node);
                }
            }
            return Ok(options.apply(found.into_iter()));
        }

        let mut matches = Vec::new();
        for item in self.nodes.iter(&rtxn)? {
            let (_, node) = item?;
            if query.matches(&node) {
                matches.push(node);
            }
        }
        Ok(options.apply(matches.into_iter()))
    }

    fn find_one(&self, query: &Query) -> StoreResult<Option<Node>> {
        let rtxn = self.env.read_txn()?;

        if let Some(id) = query.exact_id() {
            return Ok(self.nodes.get(&rtxn, id)?);
        }

        for item in self.nodes.iter(&rtxn)? {
            let (_, node) = item?;
            if query.matches(&node) {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    fn delete(&self, query: &Query) -> StoreResult<usize> {
        let mut wtxn = self.env.write_txn()?;

        let keys: Vec<String> = if let Some(id) = query.exact_id() {
            vec![id.to_string()]
        } else {
            let mut keys = Vec::new();
            for item in self.nodes.iter(&wtxn)? {
                let (key, node) = item?;
                if query.matches(&node) {
                    keys.push(key.to_string());
                }
            }
            keys
        };

        let mut removed = 0;
        for key in &keys {
            if self.nodes.delete(&mut wtxn, key)? {
                removed += 1;
            }
        }
        wtxn.commit()?;
        log_store_debug!("Deleted nodes", removed = removed);
        Ok(removed)
    }

    fn drop_nodes(&self) -> StoreResult<()> {
        let mut wtxn = self.env.write_txn()?;
        self.nodes.clear(&mut wtxn)?;
        wtxn.commit()?;
        Ok(())
    }

    fn upsert_preauth(&self, preauth: &PreAuth) -> StoreResult<()> {
        let mut wtxn = self.env.write_txn()?;
        self.preauth.put(&mut wtxn, &preauth.id, preauth)?;
        wtxn.commit()?;
        Ok(())
    }

    fn find_preauth(&self, id: &str) -> StoreResult<Option<PreAuth>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.preauth.get(&rtxn, id)?)
    }

    fn delete_preauth(&self, id: &str) -> StoreResult<()> {
        let mut wtxn = self.env.write_txn()?;
        self.preauth.delete(&mut wtxn, id)?;
        wtxn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> LmdbNodeStore {
        let config = StoreConfig {
            address: temp.path().join("meta"),
            dial_timeout_ms: 5000,
            map_size: 16 * 1024 * 1024,
        };
        LmdbNodeStore::connect(&config).unwrap()
    }

    #[test]
    fn test_upsert_and_get() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let mut node = Node::with_id("abcdef0001");
        node.file.name = "a.txt".into();
        store.upsert(&node).unwrap();

        let back = store.get("abcdef0001").unwrap().unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let mut node = Node::with_id("abcdef0001");
        store.upsert(&node).unwrap();
        node.tags.push("second".into());
        store.upsert(&node).unwrap();

        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.get("abcdef0001").unwrap().unwrap().tags, vec!["second"]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let store = store(&temp);
            store.upsert(&Node::with_id("abcdef0001")).unwrap();
            store.sync().unwrap();
        }
        let store = store(&temp);
        assert!(store.get("abcdef0001").unwrap().is_some());
    }

    #[test]
    fn test_find_paginates_in_id_order() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        for i in 0..5 {
            store.upsert(&Node::with_id(format!("abcdef000{}", i))).unwrap();
        }

        let page = store.find(&Query::All, FindOptions::page(2, 1)).unwrap();
        let ids: Vec<_> = page.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["abcdef0001", "abcdef0002"]);

        let all = store.find(&Query::All, FindOptions::default()).unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_delete_by_predicate() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        for (i, tag) in ["keep", "drop", "drop"].iter().enumerate() {
            let mut n = Node::with_id(format!("abcdef000{}", i));
            n.tags.push(tag.to_string());
            store.upsert(&n).unwrap();
        }

        assert_eq!(store.delete(&Query::Tag("drop".into())).unwrap(), 2);
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.delete(&Query::Id("missing".into())).unwrap(), 0);
    }

    #[test]
    fn test_preauth_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let token = PreAuth {
            id: "tok1".into(),
            kind: "download".into(),
            node_id: "abcdef0001".into(),
            options: Default::default(),
        };
        store.upsert_preauth(&token).unwrap();
        assert_eq!(store.find_preauth("tok1").unwrap(), Some(token));
        store.delete_preauth("tok1").unwrap();
        assert!(store.find_preauth("tok1").unwrap().is_none());
    }

    #[test]
    fn test_upsert_reports_full_map() {
        let temp = TempDir::new().unwrap();
        let store = LmdbNodeStore::connect(&StoreConfig {
            address: temp.path().join("meta"),
            dial_timeout_ms: 5000,
            map_size: 64 * 1024,
        })
        .unwrap();

        let mut node = Node::with_id("abcdef0001");
        node.attributes = serde_json::json!({ "blob": "x".repeat(256 * 1024) });
        assert!(matches!(
            store.upsert(&node),
            Err(StoreError::Heed(heed::Error::Mdb(heed::MdbError::MapFull)))
        ));
        assert!(store.get("abcdef0001").unwrap().is_none());
    }

    #[test]
    fn test_connect_fails_when_path_is_a_file() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let config = StoreConfig {
            address: blocker,
            dial_timeout_ms: 5000,
            map_size: 16 * 1024 * 1024,
        };
        assert!(matches!(
            LmdbNodeStore::connect(&config),
            Err(StoreError::Io(_))
        ));
    }

    #[test]
    fn test_dial_times_out_on_slow_open() {
        let address = Path::new("/stalled/store");
        let result: StoreResult<()> = dial(address, Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        });
        match result {
            Err(StoreError::Unreachable { address: a, timeout }) => {
                assert_eq!(a, address);
                assert_eq!(timeout, Duration::from_millis(20));
            }
            other => panic!("expected Unreachable, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_dial_passes_open_error_through() {
        let result: StoreResult<()> = dial(Path::new("/x"), Duration::from_secs(5), || {
            Err(StoreError::NotFound("gone".into()))
        });
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_index_init_error_when_databases_cannot_be_created() {
        let temp = TempDir::new().unwrap();
        // No room for named databases
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(1024 * 1024)
                .max_dbs(0)
                .open(temp.path())
                .unwrap()
        };
        assert!(matches!(
            LmdbNodeStore::ensure_indexes(&env),
            Err(StoreError::IndexInit(_))
        ));
    }
}
