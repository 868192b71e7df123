use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;

use contentrepo::store::NodeSession;
use contentrepo::RepoError;

use crate::support::{local_repo, relational_repo, store_plain, TestRepo};

const SHUTDOWN_THREADS: usize = 3;

/// Race several shutdowns against a logout and a stream drop that are already in flight.
fn shutdown_races_open_sessions(repo: &TestRepo) {
    let stored = store_plain(repo, "/docs", "a.txt", b"streamed content");
    let session = repo.service.login().unwrap();
    let mut stream = repo.service.retrieve_file_stream(&stored, None).unwrap();
    let mut head = [0u8; 8];
    stream.read_exact(&mut head).unwrap();
    assert_eq!(&head, b"streamed");

    let performed = AtomicUsize::new(0);
    let barrier = Barrier::new(SHUTDOWN_THREADS + 2);
    thread::scope(|scope| {
        let barrier = &barrier;
        let performed = &performed;
        let logout = scope.spawn(move || {
            barrier.wait();
            session.logout()
        });
        scope.spawn(move || {
            barrier.wait();
            drop(stream);
        });
        for _ in 0..SHUTDOWN_THREADS {
            scope.spawn(move || {
                barrier.wait();
                if repo.service.shutdown() {
                    performed.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        logout.join().unwrap().unwrap();
    });

    assert_eq!(performed.load(Ordering::SeqCst), 1);
    assert!(!repo.service.shutdown());
    assert!(matches!(
        repo.service.login().err().unwrap(),
        RepoError::BackendUnavailable(_)
    ));
    assert!(matches!(
        repo.service.node_exists("/docs"),
        Err(RepoError::BackendUnavailable(_))
    ));
}

#[test]
fn local_shutdown_races_logout_and_stream_drop() {
    let repo = local_repo();
    shutdown_races_open_sessions(&repo);
}

#[test]
fn relational_shutdown_races_logout_and_stream_drop() {
    let repo = relational_repo();
    shutdown_races_open_sessions(&repo);
}
