pub mod auth;
pub mod prediction;
