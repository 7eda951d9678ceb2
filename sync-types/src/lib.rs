//! # sync-types
//!
//! Data and wire format types for minutes-sync.
//!
//! This crate provides the foundational types used across all minutes-sync crates:
//! - [`Meeting`], [`Stakeholder`], [`StakeholderCategory`] - the synchronized entities
//! - [`Dataset`], [`Tombstone`] - a full collection snapshot plus deletion markers
//! - [`SyncPayload`] - the blob stored on the remote backend
//! - [`DeviceId`], [`OperationId`] - identity types
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod dataset;
mod entities;
mod error;
mod ids;
mod payload;

pub use dataset::{Dataset, Tombstone};
pub use entities::{
    epoch, normalize_key, Entity, EntityType, Meeting, Stakeholder, StakeholderCategory,
    Timestamp,
};
pub use error::SyncError;
pub use ids::{DeviceId, OperationId};
pub use payload::{PayloadMetadata, SyncPayload};
