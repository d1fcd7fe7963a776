use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::{tempdir, TempDir};

use crate::core::Timeout;
use crate::queue::Queue;
use crate::QueueError;

const WRITERS: usize = 4;
const READERS: usize = 3;
const PER_WRITER: usize = 250;
const CAPACITY: usize = 8;

fn setup_stress_queue() -> (TempDir, PathBuf, Queue) {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("stress_queue.bin");
    let queue = Queue::create(&path, CAPACITY).unwrap();
    (temp_dir, path, queue)
}

/// Fits in a slot for every writer/sequence pair used here.
fn stress_message(writer: usize, seq: usize) -> String {
    format!("w{}-{}", writer, seq)
}

fn parse_stress_message(message: &str) -> Option<(usize, usize)> {
    let rest = message.strip_prefix('w')?;
    let (writer, seq) = rest.split_once('-')?;
    Some((writer.parse().ok()?, seq.parse().ok()?))
}

#[test]
fn test_stress_message_format() {
    let longest = stress_message(WRITERS - 1, PER_WRITER - 1);
    assert!(crate::check_message(&longest).is_ok());
    assert_eq!(parse_stress_message(&longest), Some((WRITERS - 1, PER_WRITER - 1)));
    assert_eq!(parse_stress_message("garbage"), None);
}

/// Independent attachments, one per thread, as separate processes would
/// hold them. Every message written is read exactly once and each
/// writer's messages come out in the order it wrote them.
#[test]
fn test_concurrent_writers_and_readers_lose_nothing() {
    let (_temp_dir, path, queue) = setup_stress_queue();
    let total = WRITERS * PER_WRITER;
    let consumed = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(WRITERS + READERS));

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer_id| {
            let path = path.clone();
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let queue = Queue::attach(&path).expect("writer attach");
                start.wait();
                for seq in 0..PER_WRITER {
                    loop {
                        match queue.write(&stress_message(writer_id, seq), Timeout::Val(Duration::from_millis(50))) {
                            Ok(()) => break,
                            Err(e) if e.is_recoverable() => continue,
                            Err(e) => panic!("writer {}: {:?}", writer_id, e),
                        }
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let path = path.clone();
            let start = Arc::clone(&start);
            let consumed = Arc::clone(&consumed);
            thread::spawn(move || {
                let queue = Queue::attach(&path).expect("reader attach");
                start.wait();
                let mut received = Vec::new();
                while consumed.load(Ordering::SeqCst) < total {
                    if let Some(message) = queue.read(Timeout::Val(Duration::from_millis(20))).unwrap() {
                        consumed.fetch_add(1, Ordering::SeqCst);
                        received.push(message);
                    }
                    let status = queue.status().expect("bound invariant");
                    assert!(status.count <= status.capacity);
                }
                received
            })
        })
        .collect();

    for writer in writers {
        writer.join().expect("writer panicked");
    }
    let per_reader: Vec<Vec<String>> = readers
        .into_iter()
        .map(|r| r.join().expect("reader panicked"))
        .collect();

    let all: Vec<&String> = per_reader.iter().flatten().collect();
    assert_eq!(all.len(), total, "messages lost or duplicated");
    let unique: HashSet<&String> = all.iter().copied().collect();
    assert_eq!(unique.len(), total, "duplicate delivery");

    // Within one reader, a given writer's sequence numbers only increase.
    for received in per_reader.iter() {
        let mut last_seq = vec![None; WRITERS];
        for message in received {
            let (writer, seq) = parse_stress_message(message).expect("torn message");
            if let Some(prev) = last_seq[writer] {
                assert!(seq > prev, "writer {} out of order: {} after {}", writer, seq, prev);
            }
            last_seq[writer] = Some(seq);
        }
    }

    assert!(queue.is_empty().unwrap());
    assert_eq!(queue.consistency_violations(), 0);
}

/// One handle shared by many threads.
#[test]
fn test_shared_handle_across_threads() {
    let (_temp_dir, _path, queue) = setup_stress_queue();
    let queue = Arc::new(queue);
    let stop = Arc::new(AtomicBool::new(false));

    let reader = {
        let queue = Arc::clone(&queue);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut count = 0usize;
            while !stop.load(Ordering::SeqCst) || !queue.is_empty().unwrap() {
                if queue.read(Timeout::Val(Duration::from_millis(10))).unwrap().is_some() {
                    count += 1;
                }
            }
            count
        })
    };

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer_id| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for seq in 0..50 {
                    queue.write(&stress_message(writer_id, seq), Timeout::Infinite).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    stop.store(true, Ordering::SeqCst);

    assert_eq!(reader.join().unwrap(), WRITERS * 50);
}

/// A writer blocked on a full queue resumes as soon as a reader frees a
/// slot, well before its timeout.
#[test]
fn test_full_queue_applies_backpressure() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("backpressure.bin");
    let queue = Queue::create(&path, 1).unwrap();
    queue.write("occupying", Timeout::NONE).unwrap();

    let blocked = thread::spawn(move || {
        let producer = Queue::attach(&path).unwrap();
        let started = Instant::now();
        producer.write("waiting", Timeout::Val(Duration::from_secs(5))).unwrap();
        started.elapsed()
    });

    thread::sleep(Duration::from_millis(50));
    assert_eq!(queue.read(Timeout::NONE).unwrap().as_deref(), Some("occupying"));
    let waited = blocked.join().unwrap();
    assert!(waited >= Duration::from_millis(30));
    assert!(waited < Duration::from_secs(5));
    assert_eq!(queue.read(Timeout::Val(Duration::from_secs(1))).unwrap().as_deref(), Some("waiting"));
}

#[test]
fn test_timed_out_write_leaves_state_untouched() {
    let temp_dir = tempdir().unwrap();
    let queue = Queue::create(temp_dir.path().join("full.bin"), 2).unwrap();
    queue.write("one", Timeout::NONE).unwrap();
    queue.write("two", Timeout::NONE).unwrap();

    for _ in 0..3 {
        assert!(matches!(queue.write("extra", Timeout::NONE), Err(QueueError::WouldBlock)));
    }
    let status = queue.status().unwrap();
    assert_eq!(status.count, 2);
    assert!(status.is_full);
    assert_eq!(queue.read(Timeout::NONE).unwrap().as_deref(), Some("one"));
    assert_eq!(queue.read(Timeout::NONE).unwrap().as_deref(), Some("two"));
    assert_eq!(queue.read(Timeout::NONE).unwrap(), None);
}
