//! Platform-agnostic core logic for IoT firmware
//!
//! This crate contains logic that can be shared across all supported
//! boards. It has NO MCU dependencies: hardware is reached only through
//! `embedded-hal` traits and the `hal-abstractions` crate.
//!
//! - **`w5500`**: socket driver for the WIZnet W5500 hardware TCP/IP chip
//! - **`link`**: reconnect and chip-reset policy on top of the driver

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod link;
pub mod w5500;
