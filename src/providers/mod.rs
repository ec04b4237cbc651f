//! External collaborators: fetch provider, file transport and auth provider
//!
//! The pipeline only talks to the outside world through the traits in this
//! module, so the messaging front-end and the extraction tool can be swapped
//! or mocked freely.
//!
//! - [`GalleryDlFetcher`]: runs the external `gallery-dl` binary
//! - [`CookieFileAuth`]: checks a Netscape cookie file before each fetch
//! - [`NoAuth`]: lets every fetch through
//!
//! There is no built-in [`FileTransport`]; the embedding application supplies
//! one for its messaging endpoint.

mod auth;
mod gallery_dl;
mod traits;

pub use auth::{CookieFileAuth, NoAuth};
pub use gallery_dl::{GalleryDlFetcher, classify_failure};
pub use traits::{AuthProvider, AuthStatus, FetchProvider, FileTransport};
