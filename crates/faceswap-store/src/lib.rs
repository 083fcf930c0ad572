//! faceswap-store: Filesystem side of the faceswap pipeline.
//!
//! [`ImageStore`] decodes input images and stages uploads; [`OutputArchive`]
//! keeps every swap result in its own timestamp-named directory.

pub mod archive;
pub mod image_store;

pub use archive::{ArchiveEntry, ArchiveError, OutputArchive, RESULT_FILE};
pub use image_store::{decode, write_png, ImageStore, ImageStoreError, UploadRole, ACCEPTED_EXTENSIONS};
