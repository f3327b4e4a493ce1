pub mod config;
pub mod connection;
pub mod credentials;
pub mod decode;
pub mod error;
pub mod formula;
pub mod highlight;
pub mod io;
pub mod locate;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod write;

pub use error::{ErrorKind, Result, SyncError};
