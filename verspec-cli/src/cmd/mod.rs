pub mod config;
pub mod materialize;
pub mod plan;
pub mod prepare;
pub mod run;
pub mod validate;
