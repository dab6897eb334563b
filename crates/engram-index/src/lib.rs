mod chunks;
mod clocks;
mod clusters;
mod db;
mod edges;
mod error;
mod lexical;
mod schema;
mod vectors;

pub use chunks::{ProjectStat, SessionStat};
pub use clocks::{agent_clock_id, project_clock_id};
pub use db::Database;
pub use error::{Error, Result};
pub use lexical::tokenize;
pub use schema::SCHEMA_VERSION;
