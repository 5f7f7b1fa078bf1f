pub mod eval;
pub mod gap;
pub mod init;
pub mod list_models;
pub mod run;
pub mod validate;
pub mod variants;
