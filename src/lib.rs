//! reelstitch - clip concatenation service
//!
//! Downloads short video clips, normalizes them to one resolution and frame
//! rate with ffmpeg, joins them, optionally lays a background audio track over
//! the result and delivers it to object storage or a local directory.

pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod job;
pub mod media;
pub mod pipeline;
pub mod server;
pub mod upload;
pub mod worker;

pub use error::{Result, StitchError};
