//! MST behaviour against a plain ordered map
//!
//! Random edit sequences are applied to both an MST and a `BTreeMap`; the two
//! must always agree, and the tree's root must depend only on its contents.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cid::Cid;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera_common::types::cid::cbor_cid;
use tessera_repo::mst::{EMPTY_NODE, Mst, WriteOp, empty_root};
use tessera_repo::storage::{BlockStore, MemoryBlockStore};

fn value(n: u64) -> Cid {
    cbor_cid(&n.to_be_bytes())
}

fn key(n: u64) -> String {
    format!("com.example.record/{:06}", n)
}

async fn from_pairs(
    storage: &Arc<MemoryBlockStore>,
    pairs: impl IntoIterator<Item = (String, Cid)>,
) -> Mst<MemoryBlockStore> {
    let mut mst = Mst::new(storage.clone());
    for (k, v) in pairs {
        mst = mst.add(&k, v).await.unwrap().0;
    }
    mst
}

#[test]
fn empty_tree_matches_known_encoding() {
    assert_eq!(hex::encode(EMPTY_NODE), "a2616580616cf6");
    assert_eq!(
        empty_root().to_string(),
        "bafyreie5737gdxlw5i64vzichcalba3z2v5n6icifvx5xytvske7mr3hpm"
    );
}

#[tokio::test]
async fn insertion_order_does_not_matter() {
    let storage = Arc::new(MemoryBlockStore::new());
    let cid = value(1);
    let orders = [
        ["a/1", "a/2", "a/3"],
        ["a/3", "a/1", "a/2"],
        ["a/2", "a/3", "a/1"],
    ];

    let mut roots = BTreeSet::new();
    for order in orders {
        let mst = from_pairs(&storage, order.iter().map(|k| (k.to_string(), cid))).await;
        roots.insert(mst.root());
    }
    assert_eq!(roots.len(), 1);
}

#[tokio::test]
async fn random_edits_track_model() {
    let mut rng = StdRng::seed_from_u64(0x7e55e7a);
    let storage = Arc::new(MemoryBlockStore::new());
    let mut mst = Mst::new(storage.clone());
    let mut model: BTreeMap<String, Cid> = BTreeMap::new();

    for round in 0..600u64 {
        let k = key(rng.gen_range(0..400));
        match (model.contains_key(&k), rng.gen_range(0..3)) {
            (false, _) => {
                mst = mst.add(&k, value(round)).await.unwrap().0;
                model.insert(k, value(round));
            }
            (true, 0) => {
                mst = mst.update(&k, value(round)).await.unwrap().0;
                model.insert(k, value(round));
            }
            (true, _) => {
                mst = mst.delete(&k).await.unwrap().0;
                model.remove(&k);
            }
        }
    }

    let leaves: Vec<(String, Cid)> = mst
        .leaves()
        .await
        .unwrap()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    let expected: Vec<(String, Cid)> = model.clone().into_iter().collect();
    assert_eq!(leaves, expected);
    assert_eq!(mst.verify_structure().await.unwrap(), model.len());

    // Same contents built fresh give the same root
    let fresh = from_pairs(&storage, model.into_iter()).await;
    assert_eq!(fresh.root(), mst.root());
}

#[tokio::test]
async fn persisted_tree_reloads() {
    let storage = Arc::new(MemoryBlockStore::new());
    let mst = from_pairs(&storage, (0..150).map(|i| (key(i), value(i)))).await;
    let persisted = mst.persist().await.unwrap();
    assert!(persisted.pending_blocks().is_empty());

    let reloaded = Mst::load_checked(storage.clone(), mst.root()).await.unwrap();
    assert_eq!(reloaded.get(&key(42)).await.unwrap(), Some(value(42)));
    assert_eq!(reloaded.len().await.unwrap(), 150);
    assert!(storage.has(&mst.root()).await.unwrap());
}

#[tokio::test]
async fn single_update_touches_one_path() {
    let storage = Arc::new(MemoryBlockStore::new());
    let old = from_pairs(&storage, (0..1000).map(|i| (key(i), value(i))))
        .await
        .persist()
        .await
        .unwrap();
    let (new, _) = old.update(&key(517), value(9999)).await.unwrap();

    let diff = old.diff(&new).await.unwrap();
    let depth = new.cids_for_path(&key(517)).await.unwrap().len() - 1;
    assert_eq!(diff.updates.len(), 1);
    assert_eq!(diff.new_mst_blocks.len(), depth);
    assert_eq!(diff.removed_mst_blocks.len(), depth);
}

#[tokio::test]
async fn batch_equals_sequential_edits() {
    let storage = Arc::new(MemoryBlockStore::new());
    let base = from_pairs(&storage, (0..80).map(|i| (key(i), value(i)))).await;

    let ops = vec![
        WriteOp::Create {
            key: key(500).into(),
            cid: value(500),
        },
        WriteOp::Update {
            key: key(10).into(),
            cid: value(1010),
            prev: Some(value(10)),
        },
        WriteOp::Delete {
            key: key(20).into(),
            prev: None,
        },
    ];
    let (batched, _) = base.batch(&ops).await.unwrap();

    let (step, _) = base.add(&key(500), value(500)).await.unwrap();
    let (step, _) = step.update(&key(10), value(1010)).await.unwrap();
    let (step, _) = step.delete(&key(20)).await.unwrap();
    assert_eq!(batched.root(), step.root());
}

#[tokio::test]
async fn keys_sharing_long_prefixes() {
    let storage = Arc::new(MemoryBlockStore::new());
    let stem = format!("com.example.record/{}", "x".repeat(300));
    let pairs: Vec<(String, Cid)> = (0..64)
        .map(|i| (format!("{stem}{:03}", i), value(i)))
        .collect();

    let forward = from_pairs(&storage, pairs.clone()).await;
    for (k, v) in &pairs {
        assert_eq!(forward.get(k).await.unwrap(), Some(*v));
    }
    forward.verify_structure().await.unwrap();

    let backward = from_pairs(&storage, pairs.iter().rev().cloned()).await;
    assert_eq!(forward.root(), backward.root());

    let persisted = forward.persist().await.unwrap();
    let reloaded = Mst::load(storage.clone(), persisted.root());
    assert_eq!(reloaded.leaves().await.unwrap().len(), pairs.len());
}
