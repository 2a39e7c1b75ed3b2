pub mod entities;
pub mod expansion;
pub mod repositories;
pub mod selection;
pub mod validation;

pub use entities::{
    Job, JobElement, JobProtocol, JobStatus, JobType, Listing, NewElement, NewJob, StatEntry,
};
pub use repositories::{ClaimedJob, JobRepository};
pub use selection::SelectionAlgorithm;
