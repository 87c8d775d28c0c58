mod test_utils;

use small_innodb::{
    page::{FilHeader, PageType},
    tablespace::{Fil, SpaceAllocator, EXTENT_SIZE},
    types::PageID,
    ErrorKind,
};

use crate::test_utils::setup;

const PAGE_SIZE: usize = 4096;

#[test]
fn test_create_and_reopen() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    {
        let fil = Fil::new(dir.path(), PAGE_SIZE);
        let space = fil.space_create("t1", 5).unwrap();
        assert_eq!(space.size(), EXTENT_SIZE);
        assert!(space.is_allocated(0));

        let p1 = fil.alloc_page(5).unwrap();
        let p2 = fil.alloc_page(5).unwrap();
        assert_eq!((p1, p2), (1, 2));

        let mut page = vec![7u8; PAGE_SIZE];
        page[0] = 1;
        fil.space_write_page(PageID::new(5, p2), &page).unwrap();
        fil.sync_all().unwrap();

        let err = fil.space_create("t1", 6).unwrap_err();
        assert!(err.is(ErrorKind::Duplicate));
        let err = fil.space_create("other", 5).unwrap_err();
        assert!(err.is(ErrorKind::Duplicate));
    }

    let fil = Fil::new(dir.path(), PAGE_SIZE);
    // the data file exists, a create must not clobber it
    assert!(fil.space_create("t1", 5).unwrap_err().is(ErrorKind::Duplicate));
    let space = fil.space_open("t1", 5).unwrap();
    assert!(space.is_allocated(1));
    assert!(space.is_allocated(2));
    assert!(!space.is_allocated(3));
    let page = fil.space_read_page(PageID::new(5, 2)).unwrap();
    assert_eq!(page[0], 1);
    assert_eq!(page[PAGE_SIZE - 1], 7);

    let header = fil.space_read_page(PageID::new(5, 0)).unwrap();
    assert_eq!(FilHeader::new(header.as_slice()).page_type().unwrap(), PageType::FspHdr);
    assert_eq!(fil.space_by_name("t1").unwrap().id(), 5);
}

#[test]
fn test_free_and_reuse() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let fil = Fil::new(dir.path(), PAGE_SIZE);
    fil.space_create("t", 1).unwrap();
    let pages: Vec<u32> = (0..5).map(|_| fil.alloc_page(1).unwrap()).collect();
    assert_eq!(pages, vec![1, 2, 3, 4, 5]);

    fil.free_page(1, 3).unwrap();
    assert!(fil.free_page(1, 3).unwrap_err().is(ErrorKind::InvalidState));
    assert!(fil.free_page(1, 0).unwrap_err().is(ErrorKind::InvalidState));
    assert_eq!(fil.alloc_page(1).unwrap(), 3);
}

#[test]
fn test_grow_by_extent() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let fil = Fil::new(dir.path(), PAGE_SIZE);
    fil.space_create("t", 1).unwrap();
    for _ in 1..EXTENT_SIZE {
        fil.alloc_page(1).unwrap();
    }
    assert_eq!(fil.space_size(1).unwrap(), EXTENT_SIZE);
    assert_eq!(fil.alloc_page(1).unwrap(), EXTENT_SIZE);
    assert_eq!(fil.space_size(1).unwrap(), 2 * EXTENT_SIZE);

    // a tiny header page runs out of bitmap quickly
    let mut alloc = SpaceAllocator::new(2, 128);
    let max = SpaceAllocator::max_pages(128);
    let mut err = None;
    for _ in 0..max + 1 {
        if let Err(e) = alloc.alloc() {
            err = Some(e);
            break;
        }
    }
    assert!(err.unwrap().is(ErrorKind::NoSpace));
}

#[test]
fn test_write_wrong_size() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let fil = Fil::new(dir.path(), PAGE_SIZE);
    fil.space_create("t", 1).unwrap();
    let err = fil.space_write_page(PageID::new(1, 1), &[0u8; 10]).unwrap_err();
    assert!(err.is(ErrorKind::InvalidInput));
}

#[test]
fn test_delete_space() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let fil = Fil::new(dir.path(), PAGE_SIZE);
    let space = fil.space_create("gone", 3).unwrap();
    space.ext().put(b"blob").unwrap();
    let path = fil.space_path("gone");
    drop(space);

    fil.space_delete(3).unwrap();
    assert!(!path.exists());
    assert!(fil.space(3).unwrap_err().is(ErrorKind::NotFound));
    assert!(fil.space_by_name("gone").unwrap_err().is(ErrorKind::NotFound));
}
