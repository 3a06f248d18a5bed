pub mod conveyor;
pub mod disk_store;
pub mod image_conveyor;
pub mod manager;
pub mod memory_store;
pub mod resizer;
pub mod retry;
pub mod s3_store;
pub mod store;
