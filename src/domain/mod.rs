//! Domain command handlers.
//!
//! Each submodule owns one functional area and plugs into the pipeline
//! through [`crate::kernel::pipeline::CommandHandler`].

pub mod shifts;
