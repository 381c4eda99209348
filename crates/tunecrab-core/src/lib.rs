pub mod admission;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fetcher;
pub mod job;
pub mod maintenance;
pub mod media;
pub mod orchestrator;
pub mod outbox;
pub mod replies;
pub mod session;
pub mod workdir;

pub use admission::*;
pub use catalog::*;
pub use commands::*;
pub use config::*;
pub use error::*;
pub use fetcher::*;
pub use job::*;
pub use maintenance::*;
pub use media::*;
pub use orchestrator::*;
pub use outbox::*;
pub use session::*;
pub use workdir::*;
