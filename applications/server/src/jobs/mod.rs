/// Background jobs
pub mod flush;

pub use flush::FlushScheduler;
