pub mod batch;
pub mod batcher;
pub mod endpoints;
pub mod hardware;
pub mod kernel;
pub mod repository;
pub mod request;
pub mod state;
pub mod worker;

pub use batch::*;
pub use batcher::*;
pub use endpoints::*;
pub use kernel::*;
pub use request::*;
pub use state::*;
pub use worker::*;
