use std::fs::File;
use std::io::{Cursor, Read, Write};

use contentrepo::{
    backup, restore, BackupJob, FileInfoChange, FileRecord, Property, RepoError, StoreOptions,
    ZipMode, RESTORE_CONFIRMATION,
};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::support::{local_repo, relational_repo, sample_bytes, store_plain, TestRepo};

fn backup_bytes(repo: &TestRepo, root: &str, stem: &str, ignored: &[String]) -> Vec<u8> {
    let (_, cursor) = backup(&repo.service, root, stem, ignored, Cursor::new(Vec::new())).unwrap();
    cursor.into_inner()
}

fn entry_names(archive: &[u8]) -> Vec<String> {
    let zip = ZipArchive::new(Cursor::new(archive)).unwrap();
    zip.file_names().map(str::to_string).collect::<Vec<_>>()
}

fn ordered_entry_names(archive: &[u8]) -> Vec<String> {
    let mut zip = ZipArchive::new(Cursor::new(archive)).unwrap();
    (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Rewrite an archive with the entries in the given order.
fn reorder(archive: &[u8], order: &[String]) -> Vec<u8> {
    let mut source = ZipArchive::new(Cursor::new(archive)).unwrap();
    let mut out = ZipWriter::new(Cursor::new(Vec::new()));
    for name in order {
        let mut bytes = Vec::new();
        source.by_name(name).unwrap().read_to_end(&mut bytes).unwrap();
        out.start_file(name.as_str(), SimpleFileOptions::default())
            .unwrap();
        out.write_all(&bytes).unwrap();
    }
    out.finish().unwrap().into_inner()
}

#[test]
fn subtree_backup_restores_into_empty_repository() {
    let source = local_repo();
    let content = sample_bytes(1024);
    let invoice = store_plain(&source, "/2024/03", "invoice.pdf", &content);
    source
        .service
        .store_property("/2024", "year", Property::long(2024))
        .unwrap();

    let archive = backup_bytes(&source, "/2024", "bk", &[]);

    let target = local_repo();
    let report = restore(&target.service, Cursor::new(archive), RESTORE_CONFIRMATION).unwrap();
    assert_eq!(report.root, "/2024");
    assert_eq!(report.files_restored, 1);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert!(report.sanity.is_ok(), "{:?}", report.sanity.errors);

    let restored = target
        .service
        .get_file_info("/2024/03", &invoice.file_id)
        .unwrap();
    assert_eq!(restored.file_name, "invoice.pdf");
    assert_eq!(restored.size_bytes, Some(1024));
    assert_eq!(restored.checksum, invoice.checksum);
    assert_eq!(restored.created_at, invoice.created_at);
    assert_eq!(
        target.service.retrieve_file(&restored, None).unwrap(),
        content
    );
    assert_eq!(
        target.service.get_property("/2024", "year").unwrap(),
        Some(Property::long(2024))
    );
}

#[test]
fn archive_layout_puts_tree_before_content() {
    let repo = local_repo();
    let stored = store_plain(&repo, "/2024/03", "invoice.pdf", b"pdf bytes");
    let archive = backup_bytes(&repo, "/", "bk", &[]);

    let names = ordered_entry_names(&archive);
    assert_eq!(names[0], "bk/README.TXT");
    assert_eq!(names[1], "bk/repository.json");

    let content_entry = format!("bk/2024/03/{}.pdf", stored.file_id);
    let content_pos = names.iter().position(|n| *n == content_entry).unwrap();
    let manifest_pos = names
        .iter()
        .position(|n| n == "bk/2024/03/files.json")
        .unwrap();
    assert!(manifest_pos < content_pos);
    assert!(names.contains(&"bk/2024/03/files.txt".to_string()));
    assert!(names.contains(&"bk/2024/03/node.json".to_string()));

    let mut zip = ZipArchive::new(Cursor::new(archive)).unwrap();
    let mut tree = String::new();
    zip.by_name("bk/repository.json")
        .unwrap()
        .read_to_string(&mut tree)
        .unwrap();
    let tree: serde_json::Value = serde_json::from_str(&tree).unwrap();
    assert_eq!(tree["path"], "/");
}

#[test]
fn encrypted_files_stay_encrypted_in_the_archive() {
    let source = local_repo();
    let content = sample_bytes(2048);
    let stored = source
        .service
        .store_file(
            &FileRecord::new("/vault", "keys.txt"),
            Cursor::new(content.clone()),
            &StoreOptions::new("alice").with_password("pw"),
        )
        .unwrap();
    let archive = backup_bytes(&source, "/", "bk", &[]);

    let mut zip = ZipArchive::new(Cursor::new(archive.clone())).unwrap();
    let mut raw = Vec::new();
    zip.by_name(&format!("bk/vault/{}.txt", stored.file_id))
        .unwrap()
        .read_to_end(&mut raw)
        .unwrap();
    assert_ne!(raw, content);
    assert_eq!(raw.len() as u64, stored.size_bytes.unwrap());

    let target = local_repo();
    restore(&target.service, Cursor::new(archive), RESTORE_CONFIRMATION).unwrap();
    let restored = target.service.get_file_info("/vault", &stored.file_id).unwrap();
    assert_eq!(restored.zip_mode, Some(ZipMode::EncryptedAes256));
    assert!(matches!(
        target.service.retrieve_file(&restored, None),
        Err(RepoError::DecryptionRequired(_))
    ));
    assert_eq!(
        target.service.retrieve_file(&restored, Some("pw")).unwrap(),
        content
    );
}

#[test]
fn wrong_confirmation_changes_nothing() {
    let source = local_repo();
    store_plain(&source, "/a", "a.txt", b"from archive");
    let archive = backup_bytes(&source, "/", "bk", &[]);

    let target = local_repo();
    let existing = store_plain(&target, "/b", "b.txt", b"existing");

    let result = restore(
        &target.service,
        Cursor::new(archive),
        "yes, I really want to restore the repository and I know what I'm doing.",
    );
    assert!(matches!(result, Err(RepoError::RestoreConfirmationRejected)));
    assert!(!target.service.node_exists("/a").unwrap());
    assert_eq!(
        target.service.retrieve_file(&existing, None).unwrap(),
        b"existing"
    );
}

#[test]
fn content_before_tree_aborts_without_changes() {
    let source = local_repo();
    let stored = store_plain(&source, "/a", "a.txt", b"from archive");
    let archive = backup_bytes(&source, "/", "bk", &[]);

    let mut order = ordered_entry_names(&archive);
    let content_entry = format!("bk/a/{}.txt", stored.file_id);
    order.retain(|n| *n != content_entry);
    order.insert(1, content_entry.clone());
    let broken = reorder(&archive, &order);

    let target = local_repo();
    let existing = store_plain(&target, "/b", "b.txt", b"existing");

    let result = restore(&target.service, Cursor::new(broken), RESTORE_CONFIRMATION);
    assert!(matches!(
        result,
        Err(RepoError::RestoreOrderViolation(name)) if name == content_entry
    ));
    assert!(target.service.node_exists("/b").unwrap());
    assert!(!target.service.node_exists("/a").unwrap());
    assert_eq!(
        target.service.retrieve_file(&existing, None).unwrap(),
        b"existing"
    );
}

#[test]
fn restore_replaces_the_target_subtree() {
    let source = local_repo();
    store_plain(&source, "/docs/new", "new.txt", b"new");
    let archive = backup_bytes(&source, "/docs", "bk", &[]);

    let target = local_repo();
    store_plain(&target, "/docs/stale", "stale.txt", b"stale");
    store_plain(&target, "/other", "other.txt", b"other");

    restore(&target.service, Cursor::new(archive), RESTORE_CONFIRMATION).unwrap();

    assert!(target.service.node_exists("/docs/new").unwrap());
    assert!(!target.service.node_exists("/docs/stale").unwrap());
    assert!(target.service.node_exists("/other").unwrap());
}

#[test]
fn ignored_paths_are_left_out() {
    let repo = local_repo();
    store_plain(&repo, "/plugins/big", "plugin.jar", &sample_bytes(4096));
    store_plain(&repo, "/plugins2", "kept.txt", b"kept");
    store_plain(&repo, "/docs", "doc.txt", b"doc");

    let (report, cursor) = backup(
        &repo.service,
        "/",
        "bk",
        &["/plugins".to_string()],
        Cursor::new(Vec::new()),
    )
    .unwrap();
    assert_eq!(report.skipped_paths, vec!["/plugins".to_string()]);
    assert_eq!(report.files, 2);

    let archive = cursor.into_inner();
    let names = entry_names(&archive);
    assert!(names.iter().all(|n| !n.starts_with("bk/plugins/")));
    assert!(names.iter().any(|n| n.starts_with("bk/plugins2/")));

    let target = local_repo();
    let restored = restore(&target.service, Cursor::new(archive), RESTORE_CONFIRMATION).unwrap();
    assert_eq!(restored.files_restored, 2);
    assert!(!target.service.node_exists("/plugins").unwrap());
    assert!(target.service.node_exists("/plugins2").unwrap());
}

#[test]
fn backup_moves_data_between_backends() {
    let source = local_repo();
    let content = sample_bytes(1500);
    let stored = store_plain(&source, "/2024/03", "invoice.pdf", &content);
    let archive = backup_bytes(&source, "/", "bk", &[]);

    let target = relational_repo();
    let report = restore(&target.service, Cursor::new(archive), RESTORE_CONFIRMATION).unwrap();
    assert!(report.sanity.is_ok(), "{:?}", report.sanity.errors);
    let restored = target
        .service
        .get_file_info("/2024/03", &stored.file_id)
        .unwrap();
    assert_eq!(target.service.retrieve_file(&restored, None).unwrap(), content);
}

#[test]
fn backup_job_writes_archive_atomically() {
    let repo = local_repo();
    store_plain(&repo, "/docs", "doc.txt", b"doc");
    let output = repo.dir.path().join("backups");

    let outcome = BackupJob::new(&repo.service, &output)
        .run_with_stem("nightly")
        .unwrap();

    assert_eq!(outcome.archive, output.join("nightly.zip"));
    assert_eq!(outcome.report.files, 1);
    assert!(!output.join("nightly.zip.partial").exists());

    let zip = ZipArchive::new(File::open(&outcome.archive).unwrap()).unwrap();
    assert!(zip.file_names().any(|n| n == "nightly/repository.json"));

    let named = BackupJob::new(&repo.service, &output).run().unwrap();
    let file_name = named.archive.file_name().unwrap().to_string_lossy().to_string();
    assert!(file_name.starts_with("repository-backup-"), "{}", file_name);
}

#[test]
fn backup_rejects_reserved_roots() {
    let repo = local_repo();
    let result = backup(
        &repo.service,
        "/docs/__FILES",
        "bk",
        &[],
        Cursor::new(Vec::new()),
    );
    assert!(matches!(result, Err(RepoError::InvalidPath(_))));
}

fn store_with_id(
    repo: &TestRepo,
    node: &str,
    id: &str,
    name: &str,
) -> Result<FileRecord, RepoError> {
    let mut record = FileRecord::new(node, name);
    record.file_id = id.to_string();
    repo.service.store_file(
        &record,
        Cursor::new(b"content".to_vec()),
        &StoreOptions::new("tester"),
    )
}

#[test]
fn file_ids_that_sanitize_differently_are_rejected() {
    let repo = local_repo();
    assert!(matches!(
        store_with_id(&repo, "/docs", "a-b", "x.txt"),
        Err(RepoError::InvalidArgument(_))
    ));

    let stored = store_with_id(&repo, "/docs", "a_b", "x.txt").unwrap();
    let archive = backup_bytes(&repo, "/", "bk", &[]);
    assert!(entry_names(&archive).contains(&"bk/docs/a_b.txt".to_string()));
    let listed = repo.service.list_files("/docs").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].file_id, stored.file_id);
}

#[test]
fn file_ids_colliding_with_node_json_are_rejected() {
    let repo = local_repo();
    assert!(matches!(
        store_with_id(&repo, "/docs", "node", "data.json"),
        Err(RepoError::InvalidArgument(_))
    ));
    assert!(repo.service.list_files("/docs").unwrap().is_empty());

    // the same id is fine as long as its entry name is not reserved
    store_with_id(&repo, "/docs", "node", "data.pdf").unwrap();
    backup_bytes(&repo, "/", "bk", &[]);
}

#[test]
fn file_ids_colliding_with_file_listings_are_rejected() {
    let repo = local_repo();
    for name in ["listing.txt", "manifest.json"] {
        assert!(matches!(
            store_with_id(&repo, "/docs", "files", name),
            Err(RepoError::InvalidArgument(_))
        ));
    }
    assert!(matches!(
        store_with_id(&repo, "/docs", "repository", "tree.json"),
        Err(RepoError::InvalidArgument(_))
    ));
}

#[test]
fn rename_onto_a_reserved_entry_is_rejected() {
    let repo = local_repo();
    let stored = store_with_id(&repo, "/docs", "node", "data.pdf").unwrap();
    let err = repo
        .service
        .change_file_info(&stored, &FileInfoChange::new("tester").rename("data.json"))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidArgument(_)));
    let info = repo.service.get_file_info("/docs", "node").unwrap();
    assert_eq!(info.file_name, "data.pdf");
}
