pub mod info;
pub mod install;
pub mod list;
