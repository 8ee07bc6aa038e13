//! Concurrent access tests for write_atomic locking
//!
//! Verifies that the fs2-based locking prevents torn records when many
//! writers target the same file.

use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use tempfile::tempdir;
use upm_fs::io;

#[test]
fn test_concurrent_writes_no_corruption() {
    let dir = tempdir().unwrap();
    let file_path = Arc::new(dir.path().join("concurrent.txt"));

    let num_threads = 10;
    let writes_per_thread = 20;
    let barrier = Arc::new(Barrier::new(num_threads));

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let path = Arc::clone(&file_path);
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                barrier.wait();
                for i in 0..writes_per_thread {
                    let content = format!("thread{}:write{}\n", thread_id, i);
                    io::write_atomic(&path, content.as_bytes()).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread should not panic");
    }

    let content = std::fs::read_to_string(file_path.as_ref()).unwrap();
    assert!(content.starts_with("thread"), "got: {content}");
    assert_eq!(content.matches("thread").count(), 1, "interleaved: {content}");
}

#[test]
fn test_lock_serializes_read_modify_write() {
    let dir = tempdir().unwrap();
    let file_path = Arc::new(dir.path().join("counter.txt"));
    io::write_atomic(&file_path, b"0").unwrap();

    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));
    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let path = Arc::clone(&file_path);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..10 {
                    let _guard = io::lock_exclusive(&path).unwrap();
                    let current: u32 = io::read_text(&path).unwrap().trim().parse().unwrap();
                    io::replace_file(&path, (current + 1).to_string().as_bytes()).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let total: u32 = io::read_text(&file_path).unwrap().trim().parse().unwrap();
    assert_eq!(total, 80);
}

#[test]
fn test_concurrent_writes_to_different_files_all_succeed() {
    let dir = tempdir().unwrap();
    let num_threads = 5;
    let barrier = Arc::new(Barrier::new(num_threads));
    let results = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let dir_path = dir.path().to_path_buf();
            let barrier = Arc::clone(&barrier);
            let results = Arc::clone(&results);
            thread::spawn(move || {
                barrier.wait();
                let file_path = dir_path.join(format!("file_{}.txt", thread_id));
                let outcome = io::write_atomic(&file_path, format!("{thread_id}").as_bytes());
                results.lock().unwrap().push(outcome.is_ok());
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let results = results.lock().unwrap();
    assert_eq!(results.len(), num_threads);
    assert!(results.iter().all(|ok| *ok));
}
