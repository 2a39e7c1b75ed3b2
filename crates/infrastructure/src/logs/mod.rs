pub mod worker_log_store;

pub use worker_log_store::WorkerLogStore;
