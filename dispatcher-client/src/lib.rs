mod client;
mod types;

pub use client::WorkClient;
pub use types::{
    ResultSubmission, StatusSnapshot, SubmitOutcome, WorkItemPayload, WorkResponse,
};
