pub mod cache;
pub mod media;
