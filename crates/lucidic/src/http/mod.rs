//! HTTP layer: authenticated JSON requests to the backend and raw uploads
//! to presigned blob URLs.

mod transport;

pub use transport::Transport;
