pub mod cache;
pub mod config;
pub mod db;
pub mod import;
pub mod mandate;
pub mod matcher;
pub mod normalize;
pub mod resolve;
pub mod schema;
