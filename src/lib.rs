use shadow_rs::shadow;

pub mod attachments;
pub mod cli;
pub mod db;
pub mod error;
pub mod form;
pub mod http;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod resolutions;
pub mod sheet;
pub mod signals;
pub mod util;

shadow!(build);
