//! Hardware abstraction traits for IoT firmware
//!
//! This crate defines traits that abstract over hardware differences
//! between boards. BSPs implement these traits.
//!
//! - **`clock`**: monotonic millisecond clock and deadline tracking
//! - **`network`**: byte-stream transport consumed by protocol clients

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod clock;
pub mod network;

pub use clock::{Clock, Deadline};
pub use network::ByteStream;
