use std::io::{Cursor, Read};

use contentrepo::store::NodeSession;
use contentrepo::{
    FileInfoChange, FileRecord, Reencryption, RepoError, SizePolicy, StoreOptions, ZipMode,
};

use crate::support::{local_repo, plain_zip, sample_bytes, store_plain};

#[test]
fn invoice_roundtrip_keeps_bytes_and_metadata() {
    let repo = local_repo();
    let content = sample_bytes(1024);
    let mut record = FileRecord::new("/2024/03", "invoice.pdf");
    record.description = Some("March invoice".to_string());

    let stored = repo
        .service
        .store_file(
            &record,
            Cursor::new(content.clone()),
            &StoreOptions::new("alice").with_context_data(r#"{"customer":42}"#),
        )
        .unwrap();

    assert!(stored.has_id());
    assert_eq!(stored.node_path, "/2024/03");
    assert_eq!(stored.size_bytes, Some(1024));
    assert_eq!(stored.checksum.as_ref().unwrap().len(), 64);
    assert!(!stored.is_encrypted());
    assert_eq!(stored.zip_mode, None);
    assert_eq!(stored.created_by_user.as_deref(), Some("alice"));
    assert_eq!(stored.last_update_by_user.as_deref(), Some("alice"));

    let info = repo
        .service
        .get_file_info("/2024/03", &stored.file_id)
        .unwrap();
    assert_eq!(info.file_name, "invoice.pdf");
    assert_eq!(info.description.as_deref(), Some("March invoice"));
    assert_eq!(info.context_data.as_deref(), Some(r#"{"customer":42}"#));
    assert_eq!(info.checksum, stored.checksum);

    let read = repo.service.retrieve_file(&stored, None).unwrap();
    assert_eq!(read, content);
    assert!(repo.service.node_exists("/2024").unwrap());
}

#[test]
fn restoring_an_existing_id_keeps_creation_info() {
    let repo = local_repo();
    let mut record = FileRecord::new("/docs", "a.txt");
    record.file_id = "fixed".to_string();

    let first = repo
        .service
        .store_file(&record, Cursor::new(b"one".to_vec()), &StoreOptions::new("alice"))
        .unwrap();
    let second = repo
        .service
        .store_file(&record, Cursor::new(b"two!".to_vec()), &StoreOptions::new("bob"))
        .unwrap();

    assert_eq!(second.file_id, "fixed");
    assert_eq!(second.created_at, first.created_at);
    assert_eq!(second.created_by_user.as_deref(), Some("alice"));
    assert_eq!(second.last_update_by_user.as_deref(), Some("bob"));
    assert_eq!(second.size_bytes, Some(4));
    assert_eq!(repo.service.list_files("/docs").unwrap().len(), 1);
    assert_eq!(repo.service.retrieve_file(&second, None).unwrap(), b"two!");
}

#[test]
fn encrypted_file_requires_the_right_password() {
    let repo = local_repo();
    let content = sample_bytes(4096);
    let stored = repo
        .service
        .store_file(
            &FileRecord::new("/secure", "contract.pdf"),
            Cursor::new(content.clone()),
            &StoreOptions::new("alice")
                .with_password("s3cret")
                .with_zip_mode(ZipMode::EncryptedAes256),
        )
        .unwrap();

    assert!(stored.is_encrypted());
    assert!(stored.aes_encrypted);
    assert_eq!(stored.zip_mode, Some(ZipMode::EncryptedAes256));

    assert!(matches!(
        repo.service.retrieve_file(&stored, None),
        Err(RepoError::DecryptionRequired(_))
    ));
    assert!(matches!(
        repo.service.retrieve_file(&stored, Some("wrong")),
        Err(RepoError::WrongPassword(_))
    ));
    assert_eq!(
        repo.service.retrieve_file(&stored, Some("s3cret")).unwrap(),
        content
    );
}

#[test]
fn password_without_mode_defaults_to_aes256() {
    let repo = local_repo();
    let stored = repo
        .service
        .store_file(
            &FileRecord::new("/secure", "notes.txt"),
            Cursor::new(b"private".to_vec()),
            &StoreOptions::new("alice").with_password("pw"),
        )
        .unwrap();
    assert_eq!(stored.zip_mode, Some(ZipMode::EncryptedAes256));
}

#[test]
fn oversized_file_leaves_nothing_behind() {
    let repo = local_repo();
    let mut record = FileRecord::new("/uploads", "big.bin");
    record.file_id = "big".to_string();

    let result = repo.service.store_file(
        &record,
        Cursor::new(sample_bytes(1024)),
        &StoreOptions::new("alice").with_size_policy(SizePolicy::new(512)),
    );
    assert!(matches!(
        result,
        Err(RepoError::FileTooLarge { limit: 512, .. })
    ));

    let declared = repo.service.store_file(
        &record,
        Cursor::new(Vec::new()),
        &StoreOptions::new("alice")
            .with_size_policy(SizePolicy::new(512))
            .with_known_length(2048),
    );
    assert!(matches!(
        declared,
        Err(RepoError::FileTooLarge {
            limit: 512,
            actual: 2048
        })
    ));

    assert!(matches!(
        repo.service.get_file_info("/uploads", "big"),
        Err(RepoError::FileNotFound { .. })
    ));
    let mut session = repo.service.login().unwrap();
    assert!(session.open_file_blob("/uploads", "big").is_err());
    session.logout().unwrap();
}

#[test]
fn metadata_changes_keep_the_checksum() {
    let repo = local_repo();
    let stored = store_plain(&repo, "/docs", "draft.txt", b"draft content");

    let changed = repo
        .service
        .change_file_info(
            &stored,
            &FileInfoChange::new("bob")
                .rename("final.txt")
                .describe("approved"),
        )
        .unwrap();

    assert_eq!(changed.file_name, "final.txt");
    assert_eq!(changed.description.as_deref(), Some("approved"));
    assert_eq!(changed.checksum, stored.checksum);
    assert_eq!(changed.last_update_by_user.as_deref(), Some("bob"));
    assert_eq!(repo.service.checksum(&changed).unwrap(), stored.checksum.unwrap());

    let found = repo
        .service
        .find_file("/docs", None, Some("final.txt"))
        .unwrap()
        .unwrap();
    assert_eq!(found.file_id, stored.file_id);
    assert!(repo
        .service
        .find_file("/docs", None, Some("draft.txt"))
        .unwrap()
        .is_none());
}

#[test]
fn keep_last_update_info_leaves_update_stamp() {
    let repo = local_repo();
    let stored = store_plain(&repo, "/docs", "a.txt", b"a");
    let changed = repo
        .service
        .change_file_info(
            &stored,
            &FileInfoChange::new("bob").describe("quiet").keep_last_update_info(),
        )
        .unwrap();
    assert_eq!(changed.last_update_by_user.as_deref(), Some("tester"));
    assert_eq!(changed.last_update_at, stored.last_update_at);
}

#[test]
fn reencryption_changes_stored_bytes_not_content() {
    let repo = local_repo();
    let content = sample_bytes(2000);
    let stored = repo
        .service
        .store_file(
            &FileRecord::new("/secure", "plan.doc"),
            Cursor::new(content.clone()),
            &StoreOptions::new("alice").with_password("old"),
        )
        .unwrap();

    let decrypted = repo
        .service
        .change_file_info(
            &stored,
            &FileInfoChange::new("alice").reencrypt(Reencryption {
                mode: ZipMode::Standard,
                current_password: Some("old".to_string()),
                new_password: None,
            }),
        )
        .unwrap();
    assert!(!decrypted.is_encrypted());
    assert_eq!(decrypted.zip_mode, Some(ZipMode::Standard));
    assert_ne!(decrypted.checksum, stored.checksum);
    assert_eq!(repo.service.retrieve_file(&decrypted, None).unwrap(), content);

    let aes128 = repo
        .service
        .change_file_info(
            &decrypted,
            &FileInfoChange::new("alice").reencrypt(Reencryption {
                mode: ZipMode::EncryptedAes128,
                current_password: None,
                new_password: Some("new".to_string()),
            }),
        )
        .unwrap();
    assert_eq!(aes128.zip_mode, Some(ZipMode::EncryptedAes128));
    assert!(matches!(
        repo.service.retrieve_file(&aes128, Some("old")),
        Err(RepoError::WrongPassword(_))
    ));
    assert_eq!(
        repo.service.retrieve_file(&aes128, Some("new")).unwrap(),
        content
    );
}

#[test]
fn missing_checksum_is_computed_on_demand() {
    let repo = local_repo();
    let stored = store_plain(&repo, "/legacy", "old.txt", b"legacy bytes");

    let mut session = repo.service.login().unwrap();
    session
        .set_property(&stored.metadata_path(), "checksum", None)
        .unwrap();
    session.save().unwrap();
    session.logout().unwrap();
    assert_eq!(
        repo.service
            .get_file_info("/legacy", &stored.file_id)
            .unwrap()
            .checksum,
        None
    );

    let digest = repo.service.checksum(&stored).unwrap();
    assert_eq!(Some(digest.clone()), stored.checksum);
    assert_eq!(
        repo.service
            .get_file_info("/legacy", &stored.file_id)
            .unwrap()
            .checksum,
        Some(digest)
    );
}

#[test]
fn uploaded_zip_is_returned_as_stored() {
    let repo = local_repo();
    let archive = plain_zip("inner.txt", b"zipped text");
    let stored = store_plain(&repo, "/bundles", "bundle.zip", &archive);

    assert_eq!(stored.zip_mode, Some(ZipMode::Standard));
    assert!(!stored.aes_encrypted);
    assert_eq!(repo.service.retrieve_file(&stored, None).unwrap(), archive);
}

#[test]
fn stream_reads_content_and_releases_session() {
    let repo = local_repo();
    let content = sample_bytes(10_000);
    let stored = store_plain(&repo, "/media", "clip.bin", &content);

    let mut stream = repo.service.retrieve_file_stream(&stored, None).unwrap();
    assert!(stream.is_open());
    let mut read = Vec::new();
    stream.read_to_end(&mut read).unwrap();
    assert_eq!(read, content);
    stream.close().unwrap();

    let mut abandoned = repo.service.retrieve_file_stream(&stored, None).unwrap();
    let mut head = [0u8; 16];
    abandoned.read_exact(&mut head).unwrap();
    drop(abandoned);

    assert_eq!(repo.service.list_files("/media").unwrap().len(), 1);
}

#[test]
fn encrypted_stream_is_decrypted() {
    let repo = local_repo();
    let content = sample_bytes(3000);
    let stored = repo
        .service
        .store_file(
            &FileRecord::new("/media", "secret.bin"),
            Cursor::new(content.clone()),
            &StoreOptions::new("alice").with_password("pw"),
        )
        .unwrap();

    assert!(matches!(
        repo.service.retrieve_file_stream(&stored, None),
        Err(RepoError::DecryptionRequired(_))
    ));
    let mut stream = repo.service.retrieve_file_stream(&stored, Some("pw")).unwrap();
    let mut read = Vec::new();
    stream.read_to_end(&mut read).unwrap();
    assert_eq!(read, content);
}

#[test]
fn delete_file_removes_metadata_and_content() {
    let repo = local_repo();
    let keep = store_plain(&repo, "/docs", "keep.txt", b"keep");
    let gone = store_plain(&repo, "/docs", "gone.txt", b"gone");

    repo.service.delete_file(&gone).unwrap();

    let files = repo.service.list_files("/docs").unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_id, keep.file_id);
    assert!(matches!(
        repo.service.retrieve_file(&gone, None),
        Err(RepoError::FileNotFound { .. })
    ));
    assert!(matches!(
        repo.service.delete_file(&gone),
        Err(RepoError::FileNotFound { .. })
    ));
}

#[test]
fn deleting_a_node_removes_its_files() {
    let repo = local_repo();
    let stored = store_plain(&repo, "/projects/alpha", "spec.txt", b"alpha");
    repo.service.ensure_node(None, "projects/beta").unwrap();

    repo.service.delete_node("/projects/alpha").unwrap();

    assert!(!repo.service.node_exists("/projects/alpha").unwrap());
    assert!(repo.service.node_exists("/projects/beta").unwrap());
    assert!(matches!(
        repo.service.retrieve_file(&stored, None),
        Err(RepoError::FileNotFound { .. }) | Err(RepoError::NodeNotFound(_))
    ));
    assert!(matches!(
        repo.service.delete_node("/"),
        Err(RepoError::InvalidPath(_))
    ));
}

#[test]
fn node_properties_roundtrip() {
    use contentrepo::Property;

    let repo = local_repo();
    repo.service.ensure_node(None, "settings").unwrap();
    repo.service
        .store_property("/settings", "owner", Property::string("alice"))
        .unwrap();
    repo.service
        .store_property("/settings", "retries", Property::long(3))
        .unwrap();

    assert_eq!(
        repo.service.get_property("/settings", "owner").unwrap(),
        Some(Property::string("alice"))
    );
    repo.service.remove_property("/settings", "owner").unwrap();
    assert_eq!(repo.service.get_property("/settings", "owner").unwrap(), None);

    let info = repo.service.get_node_info("/settings", false).unwrap();
    assert_eq!(info.name, "settings");
    assert!(info.property("retries").is_some());
    assert!(matches!(
        repo.service.store_property("/settings/__FILES", "x", Property::long(1)),
        Err(RepoError::InvalidPath(_))
    ));
}

#[test]
fn non_finite_numbers_are_rejected_and_leave_the_repository_readable() {
    use contentrepo::{backup, Property, PropertyValue};

    let repo = local_repo();
    store_plain(&repo, "/docs", "a.txt", b"abc");
    for value in [
        Property::Single(PropertyValue::Double(f64::NAN)),
        Property::Multiple(vec![
            PropertyValue::Double(1.5),
            PropertyValue::Double(f64::INFINITY),
        ]),
    ] {
        assert!(matches!(
            repo.service.store_property("/docs", "ratio", value),
            Err(RepoError::InvalidArgument(_))
        ));
    }
    repo.service
        .store_property("/docs", "ratio", Property::Single(PropertyValue::Double(0.25)))
        .unwrap();

    let info = repo.service.get_node_info("/", true).unwrap();
    let docs = &info.children.unwrap()[0];
    assert!(docs.property("ratio").is_some());
    backup(&repo.service, "/", "bk", &[], Cursor::new(Vec::new())).unwrap();
}
