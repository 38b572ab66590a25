//! OCI registry access and blob relay.

mod client;
mod relay;

pub use client::{
    FetchedManifest, RegistryAuth, RegistryClient, DEFAULT_MANIFEST_MEDIA_TYPE,
    MANIFEST_MEDIA_TYPES,
};
pub use relay::{
    blob_entry_name, digest_from_entry_name, relay_blob_to_registry, relay_image_to_archive,
    BLOB_DIRECTORY, MANIFEST_ENTRY,
};
