pub mod agents;
pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod polling;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod state;
pub mod storage;
pub mod store;
pub mod utils {
    pub mod json;
}
pub mod workers;

pub use workers::{default_handlers, Worker};
