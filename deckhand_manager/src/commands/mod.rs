pub mod cache;
pub mod up;
