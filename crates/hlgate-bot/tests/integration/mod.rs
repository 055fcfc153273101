//! Integration tests for hlgate-bot.
//!
//! These tests drive the assembled application:
//! - Admission outcomes and their audit trail
//! - Execution through the live guard and breakers
//! - JSON Lines intake and file persistence

pub mod common;
