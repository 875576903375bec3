mod cache;
mod database;
mod entry;
mod hardcoded;
mod pattern;
mod remote;
mod resolver;
mod scanner;
mod tables;

pub use cache::*;
pub use database::*;
pub use entry::*;
pub use hardcoded::*;
pub use pattern::*;
pub use remote::*;
pub use resolver::*;
pub use scanner::*;
pub use tables::*;
