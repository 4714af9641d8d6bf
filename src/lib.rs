#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;

pub mod browser_controller;
pub mod capture;
pub mod extractor;
pub mod handler;
pub mod prober;
pub mod runner;
pub mod types;
pub mod uploader;
pub mod utils;
