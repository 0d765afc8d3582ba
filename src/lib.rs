pub mod account;
pub mod bins;
pub mod config;
pub mod elasticity;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod generator;
pub mod grid;
pub mod grid_table;
pub mod projection;
pub mod search;
pub mod synthetic;
pub mod types;
