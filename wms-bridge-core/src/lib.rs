#![doc = "wms-bridge-core: change-tracking sync engine between an ERP and a WMS."]

//! This crate contains the transport-free core: entity identity, change fingerprints,
//! field mapping and validation, sync bookkeeping stores, and the sync/upload jobs
//! with their scheduler. HTTP clients for the concrete systems live in the binary crate.
//!
//! # Usage
//! Build a [`synchronise::SyncJob`] per entity kind and an [`uploader::UploadJob`] per
//! upload flow, register them with a [`scheduler::Scheduler`], and run it.

pub mod assets;
pub mod clock;
pub mod config;
pub mod contract;
pub mod entity;
pub mod error;
pub mod fingerprint;
pub mod mapping;
pub mod record;
pub mod report;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod synchronise;
pub mod uploader;
pub mod validation;
