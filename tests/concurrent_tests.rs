// Concurrent Access Tests for VersaDB
// These tests verify thread-safety and concurrent access patterns

mod common;

use common::{key, test_options, value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;
use versadb::{ReadOptions, DB};

/// Test concurrent writes from multiple threads
#[test]
fn test_concurrent_writes() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(DB::open(dir.path(), test_options()).unwrap());

    let num_threads = 10;
    let writes_per_thread = 100;

    let mut handles = vec![];
    for thread_id in 0..num_threads {
        let db_clone = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for i in 0..writes_per_thread {
                let key = format!("thread_{}_key_{}", thread_id, i);
                let value = format!("thread_{}_value_{}", thread_id, i);
                db_clone.put(key.as_bytes(), value.as_bytes()).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Every write got its own sequence number
    assert_eq!(db.latest_sequence_number(), (num_threads * writes_per_thread) as u64);
    for thread_id in 0..num_threads {
        for i in 0..writes_per_thread {
            let key = format!("thread_{}_key_{}", thread_id, i);
            let expected = format!("thread_{}_value_{}", thread_id, i);
            assert_eq!(db.get(key.as_bytes()).unwrap(), Some(expected.into_bytes()));
        }
    }
}

/// Test concurrent reads from multiple threads
#[test]
fn test_concurrent_reads() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(DB::open(dir.path(), test_options()).unwrap());

    for i in 0..1000 {
        db.put(&key(i), &value(i)).unwrap();
        if i % 250 == 249 {
            db.flush().unwrap();
        }
    }

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for i in (t..1000).step_by(8) {
                    assert_eq!(db.get(&key(i)).unwrap(), Some(value(i)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

/// Readers never observe a value that was not written
#[test]
fn test_concurrent_reads_and_writes() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(DB::open(dir.path(), test_options().memtable_size(32 * 1024)).unwrap());
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let db = Arc::clone(&db);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for round in 0..20 {
                for i in 0..100 {
                    db.put(&key(i), format!("round_{}", round).as_bytes()).unwrap();
                }
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let db = Arc::clone(&db);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut reads = 0;
                while !done.load(Ordering::SeqCst) || reads == 0 {
                    for i in 0..100 {
                        if let Some(v) = db.get(&key(i)).unwrap() {
                            assert!(v.starts_with(b"round_"), "unexpected value {:?}", v);
                        }
                        reads += 1;
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    for i in 0..100 {
        assert_eq!(db.get(&key(i)).unwrap(), Some(b"round_19".to_vec()));
    }
}

/// The last write to a key wins, whoever wrote it
#[test]
fn test_concurrent_writes_same_key() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(DB::open(dir.path(), test_options()).unwrap());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..50 {
                    db.put(b"contended", format!("{}:{}", t, i).as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let latest = db.get(b"contended").unwrap().unwrap();
    let versions = db.get_all_key_versions(None, Some(b"contended"), Some(b"contended"), usize::MAX).unwrap();
    assert_eq!(versions.len(), 400);
    assert_eq!(versions[0].value, latest);
    assert!(versions.windows(2).all(|w| w[0].sequence > w[1].sequence));
}

#[test]
fn test_concurrent_deletes() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(DB::open(dir.path(), test_options()).unwrap());
    for i in 0..400 {
        db.put(&key(i), &value(i)).unwrap();
    }
    db.flush().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for i in (t..400).step_by(4).filter(|i| i % 2 == 0) {
                    db.delete(&key(i)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..400 {
        let expected = if i % 2 == 0 { None } else { Some(value(i)) };
        assert_eq!(db.get(&key(i)).unwrap(), expected);
    }
}

#[test]
fn test_concurrent_writes_during_flush() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(DB::open(dir.path(), test_options()).unwrap());
    let flushes = Arc::new(AtomicUsize::new(0));

    let flusher = {
        let db = Arc::clone(&db);
        let flushes = Arc::clone(&flushes);
        thread::spawn(move || {
            for _ in 0..10 {
                db.flush().unwrap();
                flushes.fetch_add(1, Ordering::SeqCst);
                thread::yield_now();
            }
        })
    };
    let writers: Vec<_> = (0..4)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for i in 0..250 {
                    db.put(&key(t * 250 + i), &value(t * 250 + i)).unwrap();
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    flusher.join().unwrap();
    assert_eq!(flushes.load(Ordering::SeqCst), 10);

    db.flush().unwrap();
    for i in 0..1000 {
        assert_eq!(db.get(&key(i)).unwrap(), Some(value(i)), "key {}", i);
    }
}

/// MultiGet against a snapshot stays stable while writers move on
#[test]
fn test_multi_get_during_writes() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(DB::open(dir.path(), test_options().memtable_size(16 * 1024)).unwrap());
    for i in 0..200 {
        db.put(&key(i), b"base").unwrap();
    }
    db.flush().unwrap();

    let writer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for round in 0..10 {
                for i in 0..200 {
                    db.put(&key(i), format!("round_{}", round).as_bytes()).unwrap();
                }
            }
        })
    };

    let keys: Vec<Vec<u8>> = (0..200).map(key).collect();
    let key_refs: Vec<&[u8]> = keys.iter().map(Vec::as_slice).collect();
    for _ in 0..20 {
        let snapshot = db.get_snapshot();
        let opts = ReadOptions::new().snapshot(&snapshot);
        let batched = db.multi_get(&opts, &key_refs);
        for (k, result) in key_refs.iter().zip(batched) {
            assert_eq!(result.unwrap(), db.get_opt(&opts, None, k).unwrap());
        }
        db.release_snapshot(&snapshot);
    }
    writer.join().unwrap();
}

/// Each thread's snapshot keeps seeing what it saw first
#[test]
fn test_consistency_under_contention() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(DB::open(dir.path(), test_options().disable_auto_compactions(false)).unwrap());
    db.put(b"counter", b"0").unwrap();
    let barrier = Arc::new(Barrier::new(5));

    let writer = {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for i in 1..=200 {
                db.put(b"counter", i.to_string().as_bytes()).unwrap();
                if i % 50 == 0 {
                    db.flush().unwrap();
                }
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let snapshot = db.get_snapshot();
                let opts = ReadOptions::new().snapshot(&snapshot);
                let first = db.get_opt(&opts, None, b"counter").unwrap();
                for _ in 0..100 {
                    assert_eq!(db.get_opt(&opts, None, b"counter").unwrap(), first);
                }
                db.release_snapshot(&snapshot);
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(db.get(b"counter").unwrap(), Some(b"200".to_vec()));
}

#[test]
fn test_concurrent_flush_calls() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(DB::open(dir.path(), test_options()).unwrap());
    for i in 0..100 {
        db.put(&key(i), &value(i)).unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || db.flush().unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(db.num_files_at_level(None, 0).unwrap(), 1);
    for i in 0..100 {
        assert_eq!(db.get(&key(i)).unwrap(), Some(value(i)));
    }
}

#[test]
fn test_concurrent_column_family_writes() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(DB::open(dir.path(), test_options()).unwrap());
    let names: Vec<String> = (0..4).map(|i| format!("cf{}", i)).collect();
    for name in &names {
        db.create_column_family(name).unwrap();
    }

    let handles: Vec<_> = names
        .iter()
        .cloned()
        .map(|name| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let cf = db.cf_handle(&name).unwrap();
                for i in 0..200 {
                    db.put_cf(&cf, &key(i), name.as_bytes()).unwrap();
                }
                db.flush_cf(&cf).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for name in &names {
        let cf = db.cf_handle(name).unwrap();
        assert_eq!(db.num_files_at_level(Some(&cf), 0).unwrap(), 1);
        assert_eq!(db.get_cf(&cf, &key(199)).unwrap(), Some(name.clone().into_bytes()));
    }
}
