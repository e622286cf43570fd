pub mod cookie_jar;
pub mod file;
pub mod memory;

pub use cookie_jar::MemoryCookieJar;
pub use file::FileStorageArea;
pub use memory::{MemoryStorageArea, MemoryStore};
