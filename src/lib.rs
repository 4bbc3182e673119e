pub mod config;
pub mod extract;
pub mod fetch;
pub mod load;
pub mod logging;
pub mod pipeline;
pub mod query;
pub mod table;
pub mod transform;
