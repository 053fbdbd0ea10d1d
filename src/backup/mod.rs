pub mod alias;
pub mod archive;
pub mod backup_config;
pub mod dump;
pub mod filename;
pub mod redacted;
pub mod resolver;
pub mod result_error;
pub mod retention;
pub mod runner;
pub mod tar;
pub mod validate;
