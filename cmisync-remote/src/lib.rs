//! Remote content-repository interface
//!
//! The sync engine talks to a hierarchical document/folder service (CMIS)
//! through the object-safe traits in this crate. The wire-level AtomPub
//! binding lives outside the core; what is specified here is exactly the
//! surface the reconciler consumes: folders with children, documents with
//! content streams and server-assigned modification timestamps, and the
//! create/update/delete operations on both.

pub mod errors;
pub mod mime;
#[cfg(feature = "mock")]
pub mod mock;
pub mod repository;
pub mod session;

pub use errors::{RemoteError, Result};
pub use mime::mime_type_for;
#[cfg(feature = "mock")]
pub use mock::{MockConnector, MockRepository};
pub use repository::{
    BoxAsyncRead, ChangeCapability, ContentStream, RemoteConnector, RemoteDocument, RemoteEntry,
    RemoteFolder, RemoteRepository,
};
pub use session::SessionParams;

/// Object type id used when creating documents.
pub const TYPE_DOCUMENT: &str = "cmis:document";

/// Object type id used when creating folders.
pub const TYPE_FOLDER: &str = "cmis:folder";
