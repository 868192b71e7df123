//! Integration tests for the content repository


mod backup_restore;
mod property_roundtrip;
mod relational_backend;
mod shutdown;
mod store_retrieve;
