#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod browser_controller;
pub mod csv_writer;
pub mod processor;
pub mod runner;
pub mod signatures;
pub mod types;
pub mod utils;
