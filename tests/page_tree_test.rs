mod test_utils;

use std::collections::BTreeMap;

use rand::prelude::*;
use small_innodb::{
    btree::{PageTree, PersistentCursor},
    ErrorKind,
};

use crate::test_utils::{crash, new_storage, open_storage, TEST_SPACE};

fn key(i: usize) -> Vec<u8> {
    format!("key{:05}", i).into_bytes()
}

fn collect(tree: &PageTree) -> Vec<Vec<u8>> {
    tree.scan().unwrap().into_iter().map(|(k, _)| k).collect()
}

#[test]
fn test_insert_search_replace() {
    let storage = new_storage(64);
    let tree = storage.create_tree(1, 4);

    assert!(!tree.insert(b"b", b"2").unwrap());
    assert!(!tree.insert(b"a", b"1").unwrap());
    assert!(!tree.insert(b"c", b"3").unwrap());
    assert_eq!(tree.search(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(tree.search(b"d").unwrap(), None);

    assert!(tree.insert(b"b", b"2b").unwrap());
    assert_eq!(tree.search(b"b").unwrap(), Some(b"2b".to_vec()));
    assert_eq!(tree.size(), 3);
    tree.validate().unwrap();
}

#[test]
fn test_split_keeps_order() {
    let storage = new_storage(64);
    let tree = storage.create_tree(1, 4);

    // insert in a scrambled order
    let mut ids: Vec<usize> = (0..200).collect();
    ids.shuffle(&mut StdRng::seed_from_u64(7));
    for i in &ids {
        tree.insert(&key(*i), &i.to_be_bytes()).unwrap();
    }

    assert_eq!(tree.size(), 200);
    assert!(tree.height().unwrap() >= 3);
    tree.validate().unwrap();
    let expected: Vec<Vec<u8>> = (0..200).map(key).collect();
    assert_eq!(collect(&tree), expected);

    // forward cursor over the leaf chain
    let mut cur = tree.first().unwrap();
    let mut n = 0;
    while cur.is_valid() {
        assert_eq!(cur.key(), key(n).as_slice());
        n += 1;
        cur.next().unwrap();
    }
    assert_eq!(n, 200);

    // backward
    let mut cur = tree.last().unwrap();
    let mut n = 200;
    while cur.is_valid() {
        n -= 1;
        assert_eq!(cur.key(), key(n).as_slice());
        cur.prev().unwrap();
    }
    assert_eq!(n, 0);
}

#[test]
fn test_delete_merges_leaves() {
    let storage = new_storage(64);
    let tree = storage.create_tree(1, 4);
    for i in 0..100 {
        tree.insert(&key(i), b"v").unwrap();
    }
    let height = tree.height().unwrap();

    for i in (0..100).filter(|i| i % 2 == 0) {
        assert_eq!(tree.delete(&key(i)).unwrap(), Some(b"v".to_vec()));
    }
    assert_eq!(tree.delete(&key(0)).unwrap(), None);
    assert_eq!(tree.size(), 50);
    tree.validate().unwrap();
    let expected: Vec<Vec<u8>> = (0..100).filter(|i| i % 2 == 1).map(key).collect();
    assert_eq!(collect(&tree), expected);

    for i in (0..100).filter(|i| i % 2 == 1) {
        tree.delete(&key(i)).unwrap();
    }
    assert_eq!(tree.size(), 0);
    tree.validate().unwrap();
    assert!(tree.height().unwrap() <= height);
    assert!(!tree.first().unwrap().is_valid());
}

#[test]
fn test_delete_if() {
    let storage = new_storage(64);
    let tree = storage.create_tree(1, 4);
    tree.insert(b"k", b"old").unwrap();

    assert_eq!(tree.delete_if(b"k", |v| v == b"new").unwrap(), None);
    assert_eq!(tree.search(b"k").unwrap(), Some(b"old".to_vec()));
    assert_eq!(tree.delete_if(b"k", |v| v == b"old").unwrap(), Some(b"old".to_vec()));
    assert_eq!(tree.search(b"k").unwrap(), None);
}

#[test]
fn test_seek() {
    let storage = new_storage(64);
    let tree = storage.create_tree(1, 4);
    for i in (0..60).step_by(3) {
        tree.insert(&key(i), b"").unwrap();
    }

    assert_eq!(tree.seek(&key(4)).unwrap().key(), key(6).as_slice());
    assert_eq!(tree.seek(&key(6)).unwrap().key(), key(6).as_slice());
    assert_eq!(tree.seek_le(&key(5)).unwrap().key(), key(3).as_slice());
    assert!(!tree.seek(&key(58)).unwrap().is_valid());
    assert_eq!(tree.seek_le(&key(99)).unwrap().key(), key(57).as_slice());
}

#[test]
fn test_persistent_cursor_survives_splits() {
    let storage = new_storage(64);
    let tree = storage.create_tree(1, 4);
    for i in (0..40).step_by(2) {
        tree.insert(&key(i), b"").unwrap();
    }

    let mut pcur = PersistentCursor::new();
    pcur.store(&tree.seek(&key(20)).unwrap());

    // force splits around the stored record
    for i in (1..40).step_by(2) {
        tree.insert(&key(i), b"").unwrap();
    }
    let (cur, exact) = pcur.restore(&tree).unwrap();
    assert!(exact);
    assert_eq!(cur.key(), key(20).as_slice());

    tree.delete(&key(20)).unwrap();
    let (cur, exact) = pcur.restore(&tree).unwrap();
    assert!(!exact);
    assert_eq!(cur.key(), key(19).as_slice());
}

#[test]
fn test_random_workload_matches_model() {
    let storage = new_storage(32);
    let tree = storage.create_tree(1, 6);
    let mut model = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(42);

    for round in 0..2000 {
        let k = key(rng.gen_range(0, 300));
        if rng.gen_bool(0.65) {
            let v = format!("value{}", round).into_bytes();
            assert_eq!(tree.insert(&k, &v).unwrap(), model.insert(k, v).is_some());
        } else {
            assert_eq!(tree.delete(&k).unwrap(), model.remove(&k));
        }
    }

    tree.validate().unwrap();
    assert_eq!(tree.size(), model.len());
    let expected: Vec<(Vec<u8>, Vec<u8>)> = model.into_iter().collect();
    assert_eq!(tree.scan().unwrap(), expected);
}

#[test]
fn test_reopen_after_flush() {
    let storage = new_storage(64);
    let root_ptr = {
        let tree = storage.create_tree(9, 4);
        for i in 0..50 {
            tree.insert(&key(i), &[i as u8]).unwrap();
        }
        tree.root_ptr()
    };
    storage.pools.flush_all().unwrap();
    storage.log.shutdown().unwrap();
    storage.fil.sync_all().unwrap();

    let config = storage.config.clone();
    let dir = storage.dir;
    let storage = open_storage(dir, config);
    let tree = PageTree::open(
        storage.pools.clone(),
        storage.log.clone(),
        TEST_SPACE,
        root_ptr,
        4,
    )
    .unwrap();
    assert_eq!(tree.index_id(), 9);
    assert_eq!(tree.size(), 50);
    assert_eq!(tree.search(&key(33)).unwrap(), Some(vec![33]));
    tree.validate().unwrap();
}

#[test]
fn test_destroy_frees_pages() {
    let storage = new_storage(64);
    let tree = storage.create_tree(1, 4);
    for i in 0..40 {
        tree.insert(&key(i), b"").unwrap();
    }
    let space = storage.fil.space(TEST_SPACE).unwrap();
    let root_ptr = tree.root_ptr();
    assert!(space.is_allocated(root_ptr));

    tree.destroy().unwrap();
    assert!(!space.is_allocated(root_ptr));
    assert_eq!(tree.size(), 0);
}

#[test]
fn test_split_without_free_frame_keeps_tree() {
    for frames in [2, 4] {
        let storage = new_storage(frames);
        let tree = storage.create_tree(1, 4);
        let space = storage.fil.space(TEST_SPACE).unwrap();
        let pages_before = (0..space.size()).filter(|p| space.is_allocated(*p)).count();

        let mut inserted = 0;
        let mut failure = None;
        for i in 0..500 {
            match tree.insert(&key(i), &[i as u8]) {
                Ok(_) => inserted += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        let err = failure.expect("the pool is too small for the tree");
        assert!(err.is(ErrorKind::NoFreeFrame), "{}", err);

        // the failed insert left nothing behind
        assert_eq!(tree.size(), inserted);
        tree.validate().unwrap();
        let expected: Vec<Vec<u8>> = (0..inserted).map(key).collect();
        assert_eq!(collect(&tree), expected);
        assert_eq!(tree.search(&key(inserted)).unwrap(), None);
        if frames == 2 {
            // no split ever committed: only the root pointer and root
            let pages = (0..space.size()).filter(|p| space.is_allocated(*p)).count();
            assert_eq!(pages, pages_before);
        }

        let root_ptr = tree.root_ptr();
        storage.pools.flush_all().unwrap();
        storage.log.flush_up_to(storage.log.lsn()).unwrap();
        let (dir, config) = crash(storage);
        let storage = open_storage(dir, config);
        let tree = PageTree::open(storage.pools.clone(), storage.log.clone(), TEST_SPACE, root_ptr, 4).unwrap();
        assert_eq!(tree.size(), inserted);
        assert_eq!(collect(&tree), expected);
    }
}

#[test]
fn test_deleting_smallest_key_raises_separator() {
    let storage = new_storage(64);
    let tree = storage.create_tree(1, 4);
    for i in 0..8 {
        tree.insert(&key(i), b"v").unwrap();
    }
    let ptrs = tree.node_pointers(tree.root()).unwrap();
    assert!(ptrs.len() >= 2);
    assert!(ptrs[0].0.is_empty());
    let (sep, child) = ptrs[1].clone();
    assert_eq!(sep, key(2));

    tree.delete(&key(2)).unwrap();
    let ptrs = tree.node_pointers(tree.root()).unwrap();
    assert_eq!(ptrs[1], (key(3), child));
    tree.validate().unwrap();

    // the freed key now belongs to the left neighbour
    tree.insert(&key(2), b"again").unwrap();
    let ptrs = tree.node_pointers(tree.root()).unwrap();
    assert_eq!(ptrs[1], (key(3), child));
    assert_eq!(tree.search(&key(2)).unwrap(), Some(b"again".to_vec()));
    tree.validate().unwrap();

    // a key that is not the smallest of its page leaves the parent alone
    tree.delete(&key(6)).unwrap();
    let ptrs = tree.node_pointers(tree.root()).unwrap();
    assert_eq!(ptrs[1].0, key(3));
    assert_eq!(ptrs[2].0, key(4));
    tree.validate().unwrap();
}

#[test]
fn test_separator_change_walks_up_first_pointers() {
    let storage = new_storage(64);
    let tree = storage.create_tree(1, 4);
    for i in 0..200 {
        tree.insert(&key(i), b"v").unwrap();
    }
    assert!(tree.height().unwrap() >= 3);

    let (sep, inner) = tree.node_pointers(tree.root()).unwrap()[1].clone();
    let inner_ptrs = tree.node_pointers(inner).unwrap();
    assert_eq!(inner_ptrs[0].0, sep);
    let mut leaf = inner_ptrs[0].1;
    while !tree.node_pointers(leaf).unwrap().is_empty() {
        leaf = tree.node_pointers(leaf).unwrap()[0].1;
    }
    assert_eq!(tree.search_leaf(&sep).unwrap().0, leaf);

    tree.delete(&sep).unwrap();
    let next = collect(&tree).into_iter().find(|k| *k > sep).unwrap();
    assert_eq!(tree.node_pointers(tree.root()).unwrap()[1], (next.clone(), inner));
    assert_eq!(tree.node_pointers(inner).unwrap()[0].0, next);
    assert_eq!(tree.size(), 199);
    tree.validate().unwrap();
}
