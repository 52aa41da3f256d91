//! Data models for the signaling relay
//!
//! This module contains the connections the relay tracks, the signaling
//! envelope it forwards, and the events that drive it.

pub mod connection;
pub mod event;
pub mod message;
