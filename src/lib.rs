pub mod cli;
pub mod client;
pub mod config;
pub mod logging;
pub mod template;
pub mod uploader;
pub mod uri;
pub mod view;
pub mod web;
