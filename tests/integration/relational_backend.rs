use std::io::{Cursor, Read};

use contentrepo::{
    FileInfoChange, FileRecord, RepoError, RepositoryConfig, RepositoryService, SanityCheckJob,
    StoreOptions,
};
use tempfile::TempDir;

use crate::support::{relational_repo, sample_bytes, store_plain};

#[test]
fn selects_relational_store_for_database_url() {
    let repo = relational_repo();
    assert_eq!(repo.service.backend_kind().unwrap(), "relational");
    assert_eq!(repo.service.top_node().unwrap(), "repository");
}

#[test]
fn file_lifecycle_on_sqlite() {
    let repo = relational_repo();
    let content = sample_bytes(1024);
    let stored = store_plain(&repo, "/2024/03", "invoice.pdf", &content);
    assert_eq!(repo.service.retrieve_file(&stored, None).unwrap(), content);

    let secret = repo
        .service
        .store_file(
            &FileRecord::new("/2024/03", "secret.txt"),
            Cursor::new(b"hidden".to_vec()),
            &StoreOptions::new("alice").with_password("pw"),
        )
        .unwrap();
    assert!(matches!(
        repo.service.retrieve_file(&secret, Some("nope")),
        Err(RepoError::WrongPassword(_))
    ));

    let renamed = repo
        .service
        .change_file_info(&stored, &FileInfoChange::new("bob").rename("paid.pdf"))
        .unwrap();
    assert_eq!(renamed.checksum, stored.checksum);

    let names: Vec<_> = repo
        .service
        .list_files("/2024/03")
        .unwrap()
        .into_iter()
        .map(|f| f.file_name)
        .collect();
    assert_eq!(names, vec!["paid.pdf", "secret.txt"]);

    repo.service.delete_node("/2024").unwrap();
    assert!(!repo.service.node_exists("/2024/03").unwrap());
    assert!(SanityCheckJob::new(&repo.service).run().unwrap().is_ok());
}

#[test]
fn deleting_a_node_does_not_touch_prefix_siblings() {
    let repo = relational_repo();
    store_plain(&repo, "/a", "a.txt", b"a");
    let sibling = store_plain(&repo, "/ab", "ab.txt", b"ab");

    repo.service.delete_node("/a").unwrap();

    assert!(repo.service.node_exists("/ab").unwrap());
    assert_eq!(repo.service.retrieve_file(&sibling, None).unwrap(), b"ab");
}

#[test]
fn abandoned_streams_return_their_connections() {
    let repo = relational_repo();
    let stored = store_plain(&repo, "/media", "clip.bin", &sample_bytes(512));

    for _ in 0..20 {
        let mut stream = repo.service.retrieve_file_stream(&stored, None).unwrap();
        let mut head = [0u8; 8];
        stream.read_exact(&mut head).unwrap();
    }
    assert_eq!(repo.service.list_files("/media").unwrap().len(), 1);
}

#[test]
fn data_survives_reopening() {
    let dir = TempDir::new().unwrap();
    let url = format!("jdbc:sqlite:{}", dir.path().join("repo.db").display());

    let first = RepositoryService::open(RepositoryConfig::relational(url.clone())).unwrap();
    let stored = first
        .store_file(
            &FileRecord::new("/docs", "kept.txt"),
            Cursor::new(b"persisted".to_vec()),
            &StoreOptions::new("tester"),
        )
        .unwrap();
    first.shutdown();

    let second = RepositoryService::open(RepositoryConfig::relational(url)).unwrap();
    assert_eq!(second.retrieve_file(&stored, None).unwrap(), b"persisted");
    second.shutdown();
}

#[test]
fn operations_fail_after_shutdown() {
    let repo = relational_repo();
    store_plain(&repo, "/docs", "a.txt", b"a");
    repo.service.shutdown();
    repo.service.shutdown();
    assert!(matches!(
        repo.service.node_exists("/docs"),
        Err(RepoError::BackendUnavailable(_))
    ));
}

#[test]
fn unsupported_database_url_is_rejected() {
    let result = RepositoryService::open(RepositoryConfig::relational("postgres://db/repo"));
    assert!(matches!(result, Err(RepoError::BackendUnavailable(_))));
}
