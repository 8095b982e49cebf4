// Integration tests for the public DB API

mod common;

use common::{init_logger, key, test_options, value};
use std::sync::Arc;
use tempfile::TempDir;
use versadb::properties::{
    CUR_SIZE_ACTIVE_MEM_TABLE, CURRENT_SUPER_VERSION_NUMBER, NUM_IMMUTABLE_MEM_TABLE, NUM_SNAPSHOTS,
    OLDEST_SNAPSHOT_SEQUENCE,
};
use versadb::{
    CompactRangeOptions, Error, Options, ReadOptions, UInt64AddOperator, ValueType, WriteBatch, WriteOptions, DB,
};

/// Test operations on completely empty database
#[test]
fn test_empty_database_operations() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();

    assert_eq!(db.get(b"nonexistent").unwrap(), None);
    assert!(db.delete(b"nonexistent").is_ok());
    assert!(db.flush().is_ok());
    assert!(db.compact_range(None, None).is_ok());
    assert_eq!(db.get(b"nonexistent").unwrap(), None);
    assert_eq!(db.latest_sequence_number(), 1);
}

#[test]
fn test_put_get_across_flush_and_reopen() {
    init_logger();
    let dir = TempDir::new().unwrap();
    {
        let db = DB::open(dir.path(), test_options()).unwrap();
        for i in 0..200 {
            db.put(&key(i), &value(i)).unwrap();
        }
        db.flush().unwrap();
        for i in 200..300 {
            db.put(&key(i), &value(i)).unwrap();
        }
        assert_eq!(db.num_files_at_level(None, 0).unwrap(), 1);
        db.close().unwrap();
    }

    let db = DB::open(dir.path(), test_options()).unwrap();
    for i in 0..300 {
        assert_eq!(db.get(&key(i)).unwrap(), Some(value(i)), "key {}", i);
    }
    assert_eq!(db.latest_sequence_number(), 300);
}

#[test]
fn test_zero_byte_value_and_binary_keys() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();

    db.put(b"empty", b"").unwrap();
    let binary: Vec<u8> = (0..=255u8).collect();
    db.put(&binary, b"bin").unwrap();
    db.put(b"", b"empty key").unwrap();
    db.flush().unwrap();

    assert_eq!(db.get(b"empty").unwrap(), Some(Vec::new()));
    assert_eq!(db.get(&binary).unwrap(), Some(b"bin".to_vec()));
    assert_eq!(db.get(b"").unwrap(), Some(b"empty key".to_vec()));
}

#[test]
fn test_large_value() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();

    let large_value = vec![b'v'; 2 * 1024 * 1024];
    db.put(b"large_key", &large_value).unwrap();
    assert_eq!(db.get(b"large_key").unwrap().unwrap().len(), large_value.len());

    db.flush().unwrap();
    assert_eq!(db.get(b"large_key").unwrap(), Some(large_value));
}

#[test]
fn test_write_batch_is_atomic_and_contiguous() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    db.put(b"a", b"old").unwrap();

    let mut batch = WriteBatch::new();
    batch.put(b"a", b"new");
    batch.put(b"b", b"1");
    batch.delete(b"c");
    batch.merge(b"d", b"x");
    db.write_opt(&WriteOptions { sync: true, disable_wal: false }, &batch).unwrap();

    assert_eq!(db.latest_sequence_number(), 5);
    assert_eq!(db.get(b"a").unwrap(), Some(b"new".to_vec()));
    assert_eq!(db.get(b"b").unwrap(), Some(b"1".to_vec()));

    // An empty batch consumes no sequence
    db.write(&WriteBatch::new()).unwrap();
    assert_eq!(db.latest_sequence_number(), 5);
}

#[test]
fn test_merge_survives_flushes() {
    let dir = TempDir::new().unwrap();
    let opts = test_options().merge_operator(Arc::new(versadb::StringAppendOperator::new(b',')));
    let db = DB::open(dir.path(), opts).unwrap();

    db.merge(b"k", b"v1").unwrap();
    db.flush().unwrap();
    db.merge(b"k", b"v2").unwrap();
    db.flush().unwrap();

    assert_eq!(db.num_files_at_level(None, 0).unwrap(), 2);
    assert_eq!(db.get(b"k").unwrap(), Some(b"v1,v2".to_vec()));

    db.compact_range(None, None).unwrap();
    assert_eq!(db.get(b"k").unwrap(), Some(b"v1,v2".to_vec()));
}

#[test]
fn test_merge_counter() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), test_options().merge_operator(Arc::new(UInt64AddOperator))).unwrap();
    for _ in 0..10 {
        db.merge(b"hits", &3u64.to_le_bytes()).unwrap();
    }
    assert_eq!(db.get(b"hits").unwrap(), Some(30u64.to_le_bytes().to_vec()));
}

#[test]
fn test_column_families() {
    init_logger();
    let dir = TempDir::new().unwrap();
    {
        let db = DB::open(dir.path(), test_options()).unwrap();
        let users = db.create_column_family("users").unwrap();
        assert!(matches!(db.create_column_family("users").unwrap_err(), Error::AlreadyExists(_)));

        db.put(b"shared", b"default").unwrap();
        db.put_cf(&users, b"shared", b"users").unwrap();
        assert_eq!(db.get(b"shared").unwrap(), Some(b"default".to_vec()));
        assert_eq!(db.get_cf(&users, b"shared").unwrap(), Some(b"users".to_vec()));

        db.flush_cf(&users).unwrap();
        assert_eq!(db.num_files_at_level(Some(&users), 0).unwrap(), 1);
        assert_eq!(db.num_files_at_level(None, 0).unwrap(), 0);
        db.close().unwrap();
    }

    // Every existing family must be opened
    let err = DB::open(dir.path(), test_options()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let db = DB::open_cf(dir.path(), test_options(), &["default", "users"]).unwrap();
    let users = db.cf_handle("users").unwrap();
    assert_eq!(db.get_cf(&users, b"shared").unwrap(), Some(b"users".to_vec()));
    assert_eq!(db.get(b"shared").unwrap(), Some(b"default".to_vec()));
    assert_eq!(db.column_families().len(), 2);
}

#[test]
fn test_open_cf_creates_missing() {
    let dir = TempDir::new().unwrap();
    let err = DB::open_cf(dir.path(), test_options(), &["default", "logs"]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let db = DB::open_cf(dir.path(), test_options().create_missing_column_families(true), &["default", "logs"]).unwrap();
    let logs = db.cf_handle("logs").unwrap();
    db.put_cf(&logs, b"k", b"v").unwrap();
    assert_eq!(db.get_cf(&logs, b"k").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_drop_column_family() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    let tmp = db.create_column_family("tmp").unwrap();
    db.put_cf(&tmp, b"k", b"v").unwrap();
    db.flush_cf(&tmp).unwrap();
    assert_eq!(common::table_files(dir.path()).len(), 1);

    db.drop_column_family(&tmp).unwrap();
    assert!(db.cf_handle("tmp").is_none());
    assert!(db.put_cf(&tmp, b"k", b"v2").is_err());
    assert!(common::table_files(dir.path()).is_empty());

    let default = db.cf_handle("default").unwrap();
    assert!(db.drop_column_family(&default).is_err());
    db.close().unwrap();

    // The dropped family stays gone
    let db = DB::open(dir.path(), test_options()).unwrap();
    assert!(db.cf_handle("tmp").is_none());
}

#[test]
fn test_write_batch_across_column_families() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    let meta = db.create_column_family("meta").unwrap();

    let mut batch = WriteBatch::new();
    batch.put(b"doc", b"body");
    batch.put_cf(meta.id(), b"doc", b"headers");
    db.write(&batch).unwrap();
    drop(db);

    let db = DB::open_cf(dir.path(), test_options(), &["default", "meta"]).unwrap();
    let meta = db.cf_handle("meta").unwrap();
    assert_eq!(db.get(b"doc").unwrap(), Some(b"body".to_vec()));
    assert_eq!(db.get_cf(&meta, b"doc").unwrap(), Some(b"headers".to_vec()));
}

#[test]
fn test_read_only_open() {
    let dir = TempDir::new().unwrap();
    {
        let db = DB::open(dir.path(), test_options()).unwrap();
        db.put(b"flushed", b"1").unwrap();
        db.flush().unwrap();
        db.put(b"in_wal", b"2").unwrap();
        common::simulate_crash(db);
    }
    let before: Vec<_> = common::table_files(dir.path());

    let db = DB::open_for_read_only(dir.path(), test_options()).unwrap();
    assert_eq!(db.get(b"flushed").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get(b"in_wal").unwrap(), Some(b"2".to_vec()));
    assert!(matches!(db.put(b"x", b"y").unwrap_err(), Error::NotSupported(_)));
    assert!(matches!(db.flush().unwrap_err(), Error::NotSupported(_)));
    assert!(matches!(db.compact_range(None, None).unwrap_err(), Error::NotSupported(_)));
    db.close().unwrap();

    // Nothing was written
    assert_eq!(common::table_files(dir.path()), before);
}

#[test]
fn test_open_locks_directory() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    db.put(b"k", b"v").unwrap();
    db.flush().unwrap();
    assert!(dir.path().join("LOCK").exists());

    let err = DB::open(dir.path(), test_options()).unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{:?}", err);
    assert!(err.to_string().contains("lock"), "{}", err);

    // Readers do not take the lock
    let reader = DB::open_for_read_only(dir.path(), test_options()).unwrap();
    assert_eq!(reader.get(b"k").unwrap(), Some(b"v".to_vec()));
    drop(reader);

    drop(db);
    let db = DB::open(dir.path(), test_options()).unwrap();
    assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
    db.close().unwrap();

    // Released by close, before the handle is dropped
    let again = DB::open(dir.path(), test_options()).unwrap();
    again.close().unwrap();
    drop(db);
}

#[test]
fn test_read_only_requires_existing_database() {
    let dir = TempDir::new().unwrap();
    let err = DB::open_for_read_only(dir.path().join("missing"), test_options()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_properties() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    assert_eq!(db.get_property(NUM_SNAPSHOTS).as_deref(), Some("0"));
    assert_eq!(db.get_property(NUM_IMMUTABLE_MEM_TABLE).as_deref(), Some("0"));

    db.put(b"a", b"1").unwrap();
    let snapshot = db.get_snapshot();
    assert_eq!(db.get_property(NUM_SNAPSHOTS).as_deref(), Some("1"));
    assert_eq!(db.get_property(OLDEST_SNAPSHOT_SEQUENCE).as_deref(), Some("1"));
    let size: u64 = db.get_property(CUR_SIZE_ACTIVE_MEM_TABLE).unwrap().parse().unwrap();
    assert!(size > 0);

    let sv_before: u64 = db.get_property(CURRENT_SUPER_VERSION_NUMBER).unwrap().parse().unwrap();
    db.flush().unwrap();
    let sv_after: u64 = db.get_property(CURRENT_SUPER_VERSION_NUMBER).unwrap().parse().unwrap();
    assert!(sv_after > sv_before);
    assert_eq!(db.get_property("versadb.num-files-at-level0").as_deref(), Some("1"));
    assert_eq!(db.get_property("versadb.num-files-at-level99"), None);
    assert_eq!(db.get_property("versadb.no-such-property"), None);

    db.release_snapshot(&snapshot);
    assert_eq!(db.get_property(NUM_SNAPSHOTS).as_deref(), Some("0"));
}

#[test]
fn test_get_all_key_versions() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    let snapshot = db.get_snapshot();
    db.put(b"a", b"1").unwrap();
    let s2 = db.get_snapshot();
    db.put(b"a", b"2").unwrap();
    db.flush().unwrap();
    db.delete(b"a").unwrap();
    db.put(b"b", b"x").unwrap();
    db.put(b"c", b"y").unwrap();

    let versions = db.get_all_key_versions(None, Some(b"a"), Some(b"b"), usize::MAX).unwrap();
    let summary: Vec<(&[u8], u64, ValueType)> =
        versions.iter().map(|v| (v.user_key.as_slice(), v.sequence, v.value_type)).collect();
    assert_eq!(
        summary,
        vec![
            (b"a".as_slice(), 3, ValueType::Deletion),
            (b"a".as_slice(), 2, ValueType::Value),
            (b"a".as_slice(), 1, ValueType::Value),
            (b"b".as_slice(), 4, ValueType::Value),
        ]
    );
    assert_eq!(db.get_all_key_versions(None, None, None, 2).unwrap().len(), 2);
    db.release_snapshot(&snapshot);
    db.release_snapshot(&s2);
}

#[test]
fn test_verify_file_checksums() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    for i in 0..100 {
        db.put(&key(i), &value(i)).unwrap();
    }
    db.flush().unwrap();
    db.verify_file_checksums().unwrap();

    // Flip one byte in the middle of the table
    let table = common::table_files(dir.path()).pop().unwrap();
    let mut data = std::fs::read(&table).unwrap();
    let mid = data.len() / 2;
    data[mid] ^= 0xff;
    std::fs::write(&table, &data).unwrap();

    assert!(db.verify_file_checksums().unwrap_err().is_corruption());
}

#[test]
fn test_identity_persists() {
    let dir = TempDir::new().unwrap();
    let id = {
        let db = DB::open(dir.path(), test_options().write_dbid_to_manifest(true)).unwrap();
        db.get_db_identity().to_string()
    };
    assert_eq!(id.len(), 36);

    // Without IDENTITY the id comes back from the manifest
    std::fs::remove_file(dir.path().join("IDENTITY")).unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    assert_eq!(db.get_db_identity(), id);
    assert!(dir.path().join("IDENTITY").exists());
}

#[test]
fn test_options_file_written() {
    let dir = TempDir::new().unwrap();
    DB::open(dir.path(), test_options()).unwrap().close().unwrap();
    DB::open(dir.path(), test_options()).unwrap().close().unwrap();

    let options: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("OPTIONS-"))
        .collect();
    assert_eq!(options.len(), 1);
    let json: serde_json::Value = serde_json::from_slice(&std::fs::read(options[0].path()).unwrap()).unwrap();
    assert_eq!(json["column_families"][0], "default");
}

#[test]
fn test_compact_range_change_level() {
    init_logger();
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    for round in 0..3 {
        for i in 0..50 {
            db.put(&key(i), format!("r{}_{}", round, i).as_bytes()).unwrap();
        }
        db.flush().unwrap();
    }
    assert_eq!(db.num_files_at_level(None, 0).unwrap(), 3);

    db.compact_range(None, None).unwrap();
    assert_eq!(db.num_files_at_level(None, 0).unwrap(), 0);
    assert_eq!(db.num_files_at_level(None, 1).unwrap(), 1);

    let opts = CompactRangeOptions { change_level: true, target_level: 4 };
    db.compact_range_opt(&opts, None, None, None).unwrap();
    assert_eq!(db.num_files_at_level(None, 1).unwrap(), 0);
    assert_eq!(db.num_files_at_level(None, 4).unwrap(), 1);

    // Back up to level 2
    let opts = CompactRangeOptions { change_level: true, target_level: 2 };
    db.compact_range_opt(&opts, None, None, None).unwrap();
    assert_eq!(db.num_files_at_level(None, 4).unwrap(), 0);
    assert_eq!(db.num_files_at_level(None, 2).unwrap(), 1);

    for i in 0..50 {
        assert_eq!(db.get(&key(i)).unwrap(), Some(format!("r2_{}", i).into_bytes()));
    }

    let bad = CompactRangeOptions { change_level: true, target_level: 0 };
    assert!(matches!(db.compact_range_opt(&bad, None, None, None).unwrap_err(), Error::InvalidArgument(_)));
    let bad = CompactRangeOptions { change_level: true, target_level: 7 };
    assert!(matches!(db.compact_range_opt(&bad, None, None, None).unwrap_err(), Error::InvalidArgument(_)));
}

#[test]
fn test_cache_stats() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), test_options().row_cache_size(1024 * 1024)).unwrap();
    for i in 0..20 {
        db.put(&key(i), &value(i)).unwrap();
    }
    db.flush().unwrap();

    for _ in 0..3 {
        assert_eq!(db.get(&key(5)).unwrap(), Some(value(5)));
    }
    let row = db.row_cache_stats().unwrap();
    assert!(row.hits >= 1, "row cache stats: {:?}", row);
    assert!(db.block_cache_stats().is_some());

    let no_cache = TempDir::new().unwrap();
    let db = DB::open(no_cache.path(), test_options().block_cache_size(0)).unwrap();
    assert!(db.block_cache_stats().is_none());
    assert!(db.row_cache_stats().is_none());
}

#[test]
fn test_unsynced_write_options() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), Options::default()).unwrap();
    let mut batch = WriteBatch::new();
    batch.put(b"k", b"v");
    db.write_opt(&WriteOptions { sync: false, disable_wal: true }, &batch).unwrap();
    assert_eq!(db.get_opt(&ReadOptions::default(), None, b"k").unwrap(), Some(b"v".to_vec()));
}
