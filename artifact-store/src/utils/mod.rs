pub mod cli;
pub mod validation;
pub mod version;
