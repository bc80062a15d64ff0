//! Temporary local configuration access point for ESP32 devices.
//!
//! The device advertises its own network, answers every DNS name with its
//! own address, serves a settings form built from a template on flash, stores
//! what the user saves and finally restarts.

pub mod captive_portal;
pub mod config;
pub mod session;
pub mod settings;
