// ==============================================================================
// lib.rs - Contact Import Library
// ==============================================================================
// Description: Shared pipeline pieces for the contact import gateway and worker
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

pub mod artifact;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod handoff;
pub mod logging;
pub mod models;
pub mod queue;
pub mod storage;
pub mod upload;
pub mod validation;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;
