pub mod build;
pub mod env;
pub mod install;
pub mod list;
pub mod search;
