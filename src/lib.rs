//! Core library for the boletim-sync command line application.
//!
//! The library appends CSV exports to reporting spreadsheets. Source files
//! are found by [`boletim::sync::locate`], decoded by
//! [`boletim::sync::decode`] and cleaned by [`boletim::sync::normalize`];
//! destination adapters live under [`boletim::sync::io`], and the
//! orchestration that writes, highlights and extends formulas is in
//! [`boletim::sync::pipeline`].

pub mod boletim;

pub use boletim::sync::{
    ErrorKind, Result, SyncError, config, connection, credentials, decode, error, formula,
    highlight, io, locate, model, normalize, pipeline, write,
};
