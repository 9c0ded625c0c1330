pub mod classifier;
pub mod db;
pub mod error;
pub mod guidelines;
pub mod model;
pub mod pagination;
pub mod priority;
pub mod submissions;
