pub mod error;
pub mod media;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod session;

pub use error::{Result, StreamError};
pub use pool::{FrameFormat, FramePool, FrameRef};
pub use server::{Credentials, FrameRate, StreamConfig, StreamServer};
