#![doc = "note-relay-core: core relay logic for note-relay."]

//! This crate holds the relay's data model and the aggregation loop that folds
//! bursts of inbound chat messages into notes with uploaded attachments.
//! Network clients are not included here; they plug in through the traits in
//! [`contract`].
//!
//! # Usage
//! Build a [`relay::Relay`] from a content store, a note endpoint, a messenger
//! and a [`config::RelayConfig`], then drive it with any [`relay::InboundStream`].

pub mod compose;
pub mod config;
pub mod contract;
pub mod error;
pub mod folder;
pub mod message;
pub mod relay;
pub mod uploader;
