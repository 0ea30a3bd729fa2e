pub mod config;
pub mod error;
pub mod feed;
pub mod forecast;
pub mod history;
pub mod model;
pub mod pipeline;
pub mod tracker;
pub mod tuner;
