pub mod config;
pub mod files;
pub mod init;
pub mod keys;
pub mod repos;
pub mod runs;
pub mod secrets;
pub mod select;
pub mod workflows;
