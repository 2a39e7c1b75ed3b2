pub mod database;
pub mod logs;

pub use database::sqlite::SqliteJobRepository;
pub use logs::WorkerLogStore;
