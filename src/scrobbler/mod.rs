// Scrobbler module
// Contains the client boundary and the Maloja implementation

pub mod maloja;
pub mod traits;

pub use maloja::MalojaClient;
pub use traits::{ScrobbleClient, ScrobbleError, ScrobbleRequest};
