pub mod cli;
pub mod config;
pub mod events;
pub mod index;
pub mod journal;
pub(crate) mod json;
pub mod logging;
pub mod mapping;
pub mod run;
pub mod source;
pub mod storage;
pub mod tracker;
