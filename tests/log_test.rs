mod test_utils;

use std::{sync::Arc, thread};

use small_innodb::{
    config::LogConfig,
    tx_log::{decode_record, encode_record, LogManager, LogRecord, LOG_HEADER_SIZE},
    ErrorKind,
};

use crate::test_utils::setup;

fn config() -> LogConfig {
    LogConfig {
        enabled: true,
        file_size: 1 << 20,
        buffer_size: 1 << 16,
    }
}

#[test]
fn test_flush_survives_reopen() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ib_logfile0");
    {
        let log = LogManager::open(&path, &config()).unwrap();
        assert_eq!(log.lsn(), 0);
        assert_eq!(log.reserve_and_write_fast(b"abc").unwrap(), 3);
        log.flush_up_to(3).unwrap();
        assert_eq!(log.flushed_lsn(), 3);
        log.close().unwrap();
    }
    {
        let log = LogManager::open(&path, &config()).unwrap();
        assert_eq!(log.lsn(), 3);
        assert_eq!(log.flushed_lsn(), 3);
        assert_eq!(log.checkpoint_lsn(), 0);
        assert!(log.header_at_open().needs_recovery());
        assert_eq!(log.read_range(0, 3).unwrap(), b"abc".to_vec());

        assert_eq!(log.checkpoint().unwrap(), 3);
        log.close().unwrap();
    }
    let log = LogManager::open(&path, &config()).unwrap();
    assert_eq!(log.checkpoint_lsn(), 3);
    assert!(!log.header_at_open().needs_recovery());
}

#[test]
fn test_flush_up_to_beyond_current() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let log = LogManager::open(dir.path().join("log"), &config()).unwrap();
    log.reserve_and_write_fast(b"12345").unwrap();
    // capped at the current lsn
    log.flush_up_to(1000).unwrap();
    assert_eq!(log.flushed_lsn(), 5);
    let counters = log.counters();
    assert_eq!(counters.lsn, 5);
    assert!(counters.n_log_ios >= 1);
    assert_eq!(counters.n_pending_log_flushes, 0);
}

#[test]
fn test_streamed_write() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let log = LogManager::open(dir.path().join("log"), &config()).unwrap();
    let mut handle = log.reserve_and_open(6).unwrap();
    assert_eq!(handle.start_lsn(), 0);
    handle.write_low(b"abc").unwrap();
    handle.write_low(b"def").unwrap();
    assert_eq!(handle.close().unwrap(), 6);

    let mut handle = log.reserve_and_open(2).unwrap();
    let err = handle.write_low(b"too long").unwrap_err();
    assert!(err.is(ErrorKind::InvalidState));
    handle.write_low(b"gh").unwrap();
    handle.close().unwrap();

    log.flush_up_to(8).unwrap();
    assert_eq!(log.read_range(2, 8).unwrap(), b"cdefgh".to_vec());
}

#[test]
fn test_checkpoint_bounded_by_limit() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let log = LogManager::open(dir.path().join("log"), &config()).unwrap();
    log.reserve_and_write_fast(&[1u8; 100]).unwrap();
    // nothing flushed yet, the checkpoint cannot pass the flushed lsn
    assert_eq!(log.checkpoint_up_to(50).unwrap(), 0);
    log.flush_up_to(100).unwrap();
    assert_eq!(log.checkpoint_up_to(50).unwrap(), 50);
    // never moves back
    assert_eq!(log.checkpoint_up_to(10).unwrap(), 50);
    assert_eq!(log.checkpoint().unwrap(), 100);
}

#[test]
fn test_full_file_restarts_after_checkpoint() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let small = LogConfig {
        enabled: true,
        file_size: (LOG_HEADER_SIZE + 1000) as u64,
        buffer_size: 1 << 16,
    };
    let log = LogManager::open(dir.path().join("log"), &small).unwrap();
    log.reserve_and_write_fast(&[7u8; 900]).unwrap();
    assert!(log.fill_ratio() > 0.8);

    let err = log.reserve_and_write_fast(&[7u8; 200]).unwrap_err();
    assert!(err.is(ErrorKind::NoSpace));

    log.flush_up_to(900).unwrap();
    log.checkpoint().unwrap();
    assert_eq!(log.fill_ratio(), 0.0);
    assert_eq!(log.reserve_and_write_fast(&[8u8; 200]).unwrap(), 1100);
    log.flush_up_to(1100).unwrap();
    assert_eq!(log.read_range(900, 1100).unwrap(), vec![8u8; 200]);
    assert!(log.read_range(0, 10).unwrap_err().is(ErrorKind::CorruptLog));
}

#[test]
fn test_disabled_log() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log");
    let log = LogManager::open(
        &path,
        &LogConfig {
            enabled: false,
            ..config()
        },
    )
    .unwrap();
    assert!(!log.is_enabled());
    assert_eq!(log.reserve_and_write_fast(b"xyz").unwrap(), 3);
    log.flush_up_to(3).unwrap();
    assert_eq!(log.flushed_lsn(), 3);
    assert_eq!(log.fill_ratio(), 0.0);
    assert!(!path.exists());
}

#[test]
fn test_concurrent_appends() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(LogManager::open(dir.path().join("log"), &config()).unwrap());
    let handles: Vec<_> = (0..4u8)
        .map(|t| {
            let log = log.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    let rec = LogRecord::new(t, 0, 0, vec![t; 10]);
                    let end = log.reserve_and_write_fast(&encode_record(&rec)).unwrap();
                    log.flush_up_to(end).unwrap();
                    assert!(log.flushed_lsn() >= end);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let end = log.lsn();
    let bytes = log.read_range(0, end).unwrap();
    let mut pos = 0;
    let mut per_thread = [0; 4];
    while pos < bytes.len() {
        let (rec, used) = decode_record(&bytes[pos..]).unwrap();
        assert_eq!(rec.payload, vec![rec.rec_type; 10]);
        per_thread[rec.rec_type as usize] += 1;
        pos += used;
    }
    assert_eq!(per_thread, [100; 4]);
}

#[test]
fn test_header_tracks_flushes_racing_checkpoints() {
    setup();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ib_logfile0");
    let acked = {
        let log = Arc::new(LogManager::open(&path, &config()).unwrap());
        let writer = {
            let log = log.clone();
            thread::spawn(move || {
                let mut end = 0;
                for i in 0..200u32 {
                    end = log.reserve_and_write_fast(&i.to_le_bytes()).unwrap();
                    log.flush_up_to(end).unwrap();
                }
                end
            })
        };
        let checkpointer = {
            let log = log.clone();
            thread::spawn(move || {
                let mut last = 0;
                for _ in 0..200 {
                    let lsn = log.checkpoint_up_to(log.flushed_lsn() / 2).unwrap();
                    assert!(lsn >= last);
                    last = lsn;
                }
            })
        };
        let acked = writer.join().unwrap();
        checkpointer.join().unwrap();
        // dropped without close: only what the writer persisted remains
        acked
    };

    let log = LogManager::open(&path, &config()).unwrap();
    let header = log.header_at_open();
    assert_eq!(header.flushed_lsn, acked);
    assert_eq!(header.current_lsn, acked);
    assert!(header.checkpoint_lsn <= acked);
    assert_eq!(log.read_range(acked - 4, acked).unwrap(), 199u32.to_le_bytes().to_vec());
}
