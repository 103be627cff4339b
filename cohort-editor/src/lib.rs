pub mod client;
pub mod cohort_models;
pub mod config;
pub mod criteria;
pub mod document;
pub mod errors;
pub mod format;
pub mod notify;
pub mod property_models;
pub mod retry;
pub mod session;
pub mod validation;

#[cfg(test)]
pub mod test_utils;
