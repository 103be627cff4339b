use thiserror::Error;

use crate::client::ClientError;
use crate::validation::CohortErrors;

#[derive(Error, Debug)]
pub enum CohortError {
    #[error("cohort is invalid")]
    Invalid(CohortErrors),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("a save is already in progress")]
    SaveInProgress,
    #[error("cohort has not been created yet")]
    NotCreated,
    #[error("session has been closed")]
    SessionClosed,
}
