use std::io::Cursor;

use contentrepo::{FileRecord, StoreOptions};
use proptest::prelude::*;

use crate::support::local_repo;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn stored_content_reads_back_unchanged(
        content in proptest::collection::vec(any::<u8>(), 0..4096),
        password in proptest::option::of("[a-zA-Z0-9]{1,16}"),
        name in "[a-z]{1,12}\\.(txt|bin|pdf)",
    ) {
        let repo = local_repo();
        let mut options = StoreOptions::new("prop");
        if let Some(password) = &password {
            options = options.with_password(password.clone());
        }
        let stored = repo
            .service
            .store_file(&FileRecord::new("/prop", name), Cursor::new(content.clone()), &options)
            .unwrap();

        prop_assert_eq!(stored.is_encrypted(), password.is_some());
        let read = repo
            .service
            .retrieve_file(&stored, password.as_deref())
            .unwrap();
        prop_assert_eq!(read, content);
        prop_assert_eq!(repo.service.checksum(&stored).unwrap(), stored.checksum.clone().unwrap());
    }
}
