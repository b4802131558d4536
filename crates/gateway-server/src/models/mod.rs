pub mod bookmark;
pub mod client;
pub mod consumer;
pub mod device;
pub mod producer;
pub mod snapshot;
pub mod stream;

pub use bookmark::*;
pub use client::*;
pub use consumer::*;
pub use device::*;
pub use producer::*;
pub use snapshot::*;
pub use stream::*;
