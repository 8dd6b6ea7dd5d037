//! Test Helper Utilities
//!
//! Shared utilities for testing leadscan-server

#![allow(dead_code, unused_imports)]

pub mod db_utils;
pub mod stages;

pub use db_utils::{
    create_test_app, create_test_service, create_test_service_with_timeout, wait_for,
    wait_for_terminal,
};
pub use stages::{
    builtin, slow_stages, with_stage, FailingStage, HangingStage, MislabelledStage, SlowStage,
    UnnamedResearchStage,
};
