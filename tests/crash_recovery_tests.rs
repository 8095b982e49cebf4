// Crash Recovery Tests for VersaDB
// These tests verify data consistency after simulated crashes

mod common;

use common::{init_logger, key, simulate_crash, table_files, test_options, value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use versadb::{Error, RecoveryMode, DB};

/// Write-ahead logs in `dir`, ascending by number.
fn log_files(dir: &Path) -> Vec<PathBuf> {
    let mut logs: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
        .collect();
    logs.sort();
    logs
}

/// Test recovery after crash during write operations
#[test]
fn test_recovery_after_write_crash() {
    init_logger();
    let dir = TempDir::new().unwrap();

    // First session: write data and simulate crash
    {
        let db = DB::open(dir.path(), test_options()).unwrap();
        for i in 0..100 {
            db.put(&key(i), &value(i)).unwrap();
        }
        simulate_crash(db);
    }

    // Second session: recover and verify
    let db = DB::open(dir.path(), test_options()).unwrap();
    for i in 0..100 {
        assert_eq!(db.get(&key(i)).unwrap(), Some(value(i)), "key {} should be recovered", i);
    }
    assert_eq!(db.latest_sequence_number(), 100);

    // The replayed memtable was flushed and its log deleted
    assert_eq!(db.num_files_at_level(None, 0).unwrap(), 1);
    assert_eq!(log_files(dir.path()).len(), 1);
}

/// Test recovery with flushed and unflushed data
#[test]
fn test_recovery_partial_writes() {
    let dir = TempDir::new().unwrap();
    {
        let db = DB::open(dir.path(), test_options()).unwrap();
        for i in 0..50 {
            db.put(format!("stable_{}", i).as_bytes(), b"stable_value").unwrap();
        }
        db.flush().unwrap();
        for i in 0..50 {
            db.put(format!("partial_{}", i).as_bytes(), b"partial_value").unwrap();
        }
        simulate_crash(db);
    }

    let db = DB::open(dir.path(), test_options()).unwrap();
    for i in 0..50 {
        assert_eq!(db.get(format!("stable_{}", i).as_bytes()).unwrap(), Some(b"stable_value".to_vec()));
        assert_eq!(db.get(format!("partial_{}", i).as_bytes()).unwrap(), Some(b"partial_value".to_vec()));
    }
}

#[test]
fn test_recovery_with_deletes() {
    let dir = TempDir::new().unwrap();
    {
        let db = DB::open(dir.path(), test_options()).unwrap();
        for i in 0..100 {
            db.put(&key(i), &value(i)).unwrap();
        }
        db.flush().unwrap();
        for i in (0..100).filter(|i| i % 2 == 0) {
            db.delete(&key(i)).unwrap();
        }
        simulate_crash(db);
    }

    let db = DB::open(dir.path(), test_options()).unwrap();
    for i in 0..100 {
        let expected = if i % 2 == 0 { None } else { Some(value(i)) };
        assert_eq!(db.get(&key(i)).unwrap(), expected, "key {}", i);
    }
}

#[test]
fn test_multiple_crash_recovery_cycles() {
    let dir = TempDir::new().unwrap();
    for cycle in 0..5 {
        let db = DB::open(dir.path(), test_options()).unwrap();
        for i in 0..20 {
            db.put(format!("cycle_{}_key_{}", cycle, i).as_bytes(), b"v").unwrap();
        }
        if cycle % 2 == 0 {
            db.flush().unwrap();
        }
        simulate_crash(db);
    }

    let db = DB::open(dir.path(), test_options()).unwrap();
    for cycle in 0..5 {
        for i in 0..20 {
            assert!(db.get(format!("cycle_{}_key_{}", cycle, i).as_bytes()).unwrap().is_some());
        }
    }
    assert_eq!(db.latest_sequence_number(), 100);
}

#[test]
fn test_torn_wal_tail_is_tolerated() {
    let dir = TempDir::new().unwrap();
    {
        let db = DB::open(dir.path(), test_options()).unwrap();
        for i in 0..10 {
            db.put(&key(i), &value(i)).unwrap();
        }
        simulate_crash(db);
    }

    // Cut the last record in half
    let log = log_files(dir.path()).pop().unwrap();
    let len = fs::metadata(&log).unwrap().len();
    let file = fs::OpenOptions::new().write(true).open(&log).unwrap();
    file.set_len(len - 10).unwrap();
    drop(file);

    let db = DB::open(dir.path(), test_options()).unwrap();
    for i in 0..9 {
        assert_eq!(db.get(&key(i)).unwrap(), Some(value(i)));
    }
    assert_eq!(db.get(&key(9)).unwrap(), None);
}

#[test]
fn test_corrupt_wal_record_by_mode() {
    init_logger();
    let dir = TempDir::new().unwrap();
    {
        let db = DB::open(dir.path(), test_options()).unwrap();
        for i in 0..3 {
            db.put(&key(i), &vec![b'0' + i as u8; 1000]).unwrap();
        }
        simulate_crash(db);
    }

    // Damage the payload of the middle record
    let log = log_files(dir.path()).pop().unwrap();
    let mut data = fs::read(&log).unwrap();
    let mid = data.len() / 2;
    data[mid] ^= 0xff;
    fs::write(&log, &data).unwrap();

    let err = DB::open(dir.path(), test_options()).unwrap_err();
    assert!(err.is_corruption(), "{:?}", err);

    let db = DB::open(dir.path(), test_options().recovery_mode(RecoveryMode::BestEfforts)).unwrap();
    assert_eq!(db.get(&key(0)).unwrap(), Some(vec![b'0'; 1000]));
    assert_eq!(db.get(&key(1)).unwrap(), None);
    assert_eq!(db.get(&key(2)).unwrap(), None);
}

#[test]
fn test_best_efforts_after_losing_last_tables() {
    init_logger();
    let dir = TempDir::new().unwrap();
    {
        let db = DB::open(dir.path(), test_options()).unwrap();
        let users = db.create_column_family("users").unwrap();
        db.put(b"a1", b"1").unwrap();
        db.flush().unwrap();
        db.put(b"a2", b"2").unwrap();
        db.flush().unwrap();
        db.put_cf(&users, b"u1", b"1").unwrap();
        db.flush_cf(&users).unwrap();
        db.put_cf(&users, b"u2", b"2").unwrap();
        db.flush_cf(&users).unwrap();
        db.close().unwrap();
    }

    // Tables in creation order: default a1, default a2, users u1, users u2
    let tables = table_files(dir.path());
    assert_eq!(tables.len(), 4);
    fs::remove_file(&tables[1]).unwrap();
    fs::remove_file(&tables[3]).unwrap();

    let names = ["default", "users"];
    let err = DB::open_cf(dir.path(), test_options(), &names).unwrap_err();
    assert!(err.is_corruption(), "{:?}", err);

    let db = DB::open_cf(dir.path(), test_options().recovery_mode(RecoveryMode::BestEfforts), &names).unwrap();
    let users = db.cf_handle("users").unwrap();
    assert_eq!(db.get(b"a1").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get(b"a2").unwrap(), None);
    assert_eq!(db.get_cf(&users, b"u1").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get_cf(&users, b"u2").unwrap(), None);
    db.verify_file_checksums().unwrap();
    db.close().unwrap();

    // The recovered state is now the strict state
    let db = DB::open_cf(dir.path(), test_options(), &names).unwrap();
    assert_eq!(db.get(b"a1").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn test_missing_current_file() {
    let dir = TempDir::new().unwrap();
    {
        let db = DB::open(dir.path(), test_options()).unwrap();
        db.put(b"k", b"v").unwrap();
        db.flush().unwrap();
    }
    fs::remove_file(dir.path().join("CURRENT")).unwrap();

    assert!(DB::open(dir.path(), test_options()).unwrap_err().is_corruption());
    let db = DB::open(dir.path(), test_options().recovery_mode(RecoveryMode::BestEfforts)).unwrap();
    assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
    assert!(dir.path().join("CURRENT").exists());
}

#[test]
fn test_orphan_tables_deleted_and_numbers_not_reused() {
    let dir = TempDir::new().unwrap();
    DB::open(dir.path(), test_options()).unwrap().close().unwrap();
    let orphan = dir.path().join("000999.sst");
    fs::write(&orphan, b"not a table").unwrap();

    let db = DB::open(dir.path(), test_options()).unwrap();
    assert!(!orphan.exists());
    db.put(b"k", b"v").unwrap();
    db.flush().unwrap();

    let tables = table_files(dir.path());
    assert_eq!(tables.len(), 1);
    let number: u64 = tables[0].file_stem().unwrap().to_str().unwrap().parse().unwrap();
    assert!(number > 999);
}

#[test]
fn test_open_without_database() {
    let dir = TempDir::new().unwrap();
    let err = DB::open(dir.path(), test_options().create_if_missing(false)).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_recovery_after_proper_shutdown() {
    let dir = TempDir::new().unwrap();
    {
        let db = DB::open(dir.path(), test_options()).unwrap();
        for i in 0..100 {
            db.put(&key(i), &value(i)).unwrap();
        }
        db.close().unwrap();
    }

    let db = DB::open(dir.path(), test_options()).unwrap();
    for i in 0..100 {
        assert_eq!(db.get(&key(i)).unwrap(), Some(value(i)));
    }
}

#[test]
fn test_disabled_wal_flushes_on_close() {
    let dir = TempDir::new().unwrap();
    {
        let db = DB::open(dir.path(), test_options().use_wal(false)).unwrap();
        db.put(b"k", b"v").unwrap();
        db.close().unwrap();
    }
    let db = DB::open(dir.path(), test_options().use_wal(false)).unwrap();
    assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
}
