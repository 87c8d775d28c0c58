mod test_utils;

use std::collections::BTreeMap;

use rand::prelude::*;
use small_innodb::{
    btree::{BTree, PersistentCursor, RelPos},
    ErrorKind,
};

use crate::test_utils::setup;

fn two_digit_keys(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("{:02}", i).into_bytes()).collect()
}

fn collect_keys(tree: &BTree) -> Vec<Vec<u8>> {
    tree.iter()
        .unwrap()
        .map(|r| r.map(|(k, _)| k.to_vec()))
        .collect::<Result<_, _>>()
        .unwrap()
}

#[test]
fn test_insert_search_replace() {
    setup();

    let mut tree = BTree::new(4).unwrap();
    assert!(!tree.insert(b"b", b"2").unwrap());
    assert!(!tree.insert(b"a", b"1").unwrap());
    assert!(!tree.insert(b"c", b"3").unwrap());

    assert_eq!(tree.search(b"b").unwrap(), Some(&b"2"[..]));
    assert_eq!(tree.search(b"d").unwrap(), None);

    assert!(tree.insert(b"b", b"2b").unwrap());
    assert_eq!(tree.search(b"b").unwrap(), Some(&b"2b"[..]));
    assert_eq!(tree.size(), 3);
    tree.validate().unwrap();
}

#[test]
fn test_order_too_small() {
    setup();

    let err = BTree::new(2).unwrap_err();
    assert!(err.is(ErrorKind::InvalidInput));
}

#[test]
fn test_split_and_iterate() {
    setup();

    let mut tree = BTree::new(4).unwrap();
    let keys = two_digit_keys(20);
    for k in &keys {
        tree.insert(k, k).unwrap();
    }

    assert_eq!(tree.size(), 20);
    assert!(tree.height().unwrap() > 1);
    tree.validate().unwrap();
    tree.check_node_ptrs().unwrap();

    let mut cursor = tree.first().unwrap();
    let mut seen = Vec::new();
    while cursor.is_valid() {
        seen.push(cursor.key().to_vec());
        cursor.next().unwrap();
    }
    assert_eq!(seen, keys);

    // backwards from the last key
    let mut cursor = tree.last().unwrap();
    let mut reversed = Vec::new();
    while cursor.is_valid() {
        reversed.push(cursor.key().to_vec());
        cursor.prev().unwrap();
    }
    reversed.reverse();
    assert_eq!(reversed, keys);
}

#[test]
fn test_delete_and_rebalance() {
    setup();

    let mut tree = BTree::new(4).unwrap();
    for k in two_digit_keys(20) {
        tree.insert(&k, &k).unwrap();
    }

    for i in (0..20).step_by(2) {
        let key = format!("{:02}", i).into_bytes();
        assert_eq!(tree.delete(&key).unwrap(), Some(key.clone()));
    }
    assert_eq!(tree.delete(b"00").unwrap(), None);

    assert_eq!(tree.size(), 10);
    let expected: Vec<Vec<u8>> = (1..20)
        .step_by(2)
        .map(|i| format!("{:02}", i).into_bytes())
        .collect();
    assert_eq!(collect_keys(&tree), expected);
    tree.check_node_ptrs().unwrap();
    tree.validate().unwrap();
}

#[test]
fn test_delete_everything() {
    setup();

    let mut tree = BTree::new(5).unwrap();
    let keys = two_digit_keys(50);
    for k in &keys {
        tree.insert(k, b"v").unwrap();
    }
    for k in keys.iter().rev() {
        assert!(tree.delete(k).unwrap().is_some());
        tree.validate().unwrap();
    }
    assert!(tree.is_empty());
    assert_eq!(tree.height().unwrap(), 1);
    assert!(!tree.first().unwrap().is_valid());
    assert!(!tree.last().unwrap().is_valid());
}

#[test]
fn test_seek() {
    setup();

    let mut tree = BTree::new(4).unwrap();
    for i in (0..40).step_by(2) {
        let k = format!("{:02}", i).into_bytes();
        tree.insert(&k, &k).unwrap();
    }

    assert_eq!(tree.seek(b"07").unwrap().key(), b"08");
    assert_eq!(tree.seek(b"08").unwrap().key(), b"08");
    assert_eq!(tree.seek_le(b"07").unwrap().key(), b"06");
    assert_eq!(tree.seek_le(b"99").unwrap().key(), b"38");
    assert!(!tree.seek(b"39").unwrap().is_valid());
    assert!(!tree.seek_le(b"").unwrap().is_valid());
}

#[test]
fn test_random_workload_matches_model() {
    setup();

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut tree = BTree::new(6).unwrap();
    let mut model = BTreeMap::new();

    for round in 0..3000 {
        let key = format!("k{:04}", rng.gen_range(0, 500)).into_bytes();
        if rng.gen_bool(0.6) {
            let value = format!("v{}", round).into_bytes();
            let replaced = tree.insert(&key, &value).unwrap();
            assert_eq!(replaced, model.insert(key, value).is_some());
        } else {
            assert_eq!(tree.delete(&key).unwrap(), model.remove(&key));
        }
    }

    tree.validate().unwrap();
    tree.check_node_ptrs().unwrap();
    assert_eq!(tree.size(), model.len());
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = tree
        .iter()
        .unwrap()
        .map(|r| r.map(|(k, v)| (k.to_vec(), v.to_vec())))
        .collect::<Result<_, _>>()
        .unwrap();
    let expected: Vec<(Vec<u8>, Vec<u8>)> = model.into_iter().collect();
    assert_eq!(pairs, expected);
}

#[test]
fn test_height_bound() {
    setup();

    let mut tree = BTree::new(4).unwrap();
    for k in two_digit_keys(100) {
        tree.insert(&k, b"").unwrap();
    }
    tree.validate().unwrap();

    // a root with two children over half-full nodes needs at least this
    // many keys for the height it has
    let h = tree.height().unwrap() as u32;
    assert!(h >= 2);
    let min_children = tree.min_internal_keys() + 1;
    let least = 2 * min_children.pow(h - 2) * tree.min_leaf_keys();
    assert!(least <= tree.size(), "{:?}: {}", tree, tree.print_size());
}

#[test]
fn test_persistent_cursor() {
    setup();

    let mut tree = BTree::new(4).unwrap();
    for k in two_digit_keys(20) {
        tree.insert(&k, &k).unwrap();
    }

    let mut pcur = PersistentCursor::new();
    pcur.store(&tree.seek(b"10").unwrap());
    assert_eq!(pcur.rel_pos(), RelPos::On);
    assert_eq!(pcur.stored_key(), Some(&b"10"[..]));

    // the stored record survives
    tree.insert(b"10a", b"x").unwrap();
    {
        let (cur, exact) = pcur.restore(&tree).unwrap();
        assert!(exact);
        assert_eq!(cur.key(), b"10");
    }

    // the stored record is gone: land on its predecessor
    tree.delete(b"10").unwrap();
    {
        let (cur, exact) = pcur.restore(&tree).unwrap();
        assert!(!exact);
        assert_eq!(cur.key(), b"09");
    }

    pcur.store_relative(b"15", RelPos::After);
    {
        let (cur, exact) = pcur.restore(&tree).unwrap();
        assert!(!exact);
        assert_eq!(cur.key(), b"16");
    }

    pcur.store_relative(b"15", RelPos::Before);
    {
        let (cur, _) = pcur.restore(&tree).unwrap();
        assert_eq!(cur.key(), b"14");
    }
}

#[test]
fn test_positions_after_nodes_are_freed() {
    setup();

    let mut tree = BTree::new(4).unwrap();
    let keys = two_digit_keys(40);
    for k in &keys {
        tree.insert(k, k).unwrap();
    }
    let (node, index) = tree.search_position(b"39").unwrap().unwrap();
    assert_eq!(tree.record_at(node, index), Some((&b"39"[..], &b"39"[..])));

    // shrink to a single leaf: the remembered node is freed
    for k in &keys[2..] {
        tree.delete(k).unwrap();
    }
    assert_eq!(tree.height().unwrap(), 1);
    assert_eq!(tree.record_at(node, index), None);
    assert_eq!(tree.record_at(usize::MAX, 0), None);

    // freed ids are handed out again without breaking any link
    for k in &keys[2..] {
        assert!(!tree.insert(k, b"again").unwrap());
    }
    tree.validate().unwrap();
    tree.check_node_ptrs().unwrap();
    assert_eq!(collect_keys(&tree), keys);
    let mut cursor = tree.last().unwrap();
    let mut n = 0;
    while cursor.is_valid() {
        n += 1;
        cursor.prev().unwrap();
    }
    assert_eq!(n, keys.len());
}
