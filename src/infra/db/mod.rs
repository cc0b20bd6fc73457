pub mod file;
pub mod memory;

pub use file::FileDriver;
pub use memory::MemoryDriver;
