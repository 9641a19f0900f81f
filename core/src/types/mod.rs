pub mod resource;
pub mod task;
pub mod version;
