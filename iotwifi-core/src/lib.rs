//! Core library for the IoT Wi-Fi supervisor.
//! This crate spawns and supervises the network daemons (hostapd, dnsmasq,
//! wpa_supplicant), streams their output over an event bus, drives the AP
//! interface bring-up cascade from that output, and exposes the station-side
//! wpa_cli workflows through a small HTTP control surface.

pub mod bringup;
pub mod bus;
pub mod config;
pub mod service;
pub mod supervisor;
pub mod traits;
pub mod util;
pub mod web_server;
pub mod wpa;

// Define a shared Error and Result type for the entire crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The binary could not be started, or its pipes could not be attached.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Command id already in use: {0}")]
    DuplicateCommand(String),

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// A specialized `Result` type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;
