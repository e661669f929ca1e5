pub mod config;
pub mod db;
pub mod gateway;
pub mod model;
pub mod projector;
pub mod sync;
