// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! munchkin-core: rule state, mutation pipeline and recovery
//!
//! This crate provides:
//! - The matching-engine capability and a built-in exact-value engine
//! - A bounded pool of engine replicas with exclusive checkout
//! - The mutation pipeline (pool + journal + watermark)
//! - Startup recovery from WAL files

pub mod clock;
pub mod journal;
pub mod matcher;
pub mod mutation;
pub mod pipeline;
pub mod pool;
pub mod recovery;
pub mod watermark;

pub use clock::{Clock, FakeClock, SystemClock};
pub use journal::Journal;
pub use matcher::{ExactMatcher, Matcher, MatcherError};
pub use mutation::{Mutation, ValidationError};
pub use pipeline::{
    ApplyOutcome, MutationPipeline, PipelineError, Submission, DEFAULT_SUBMIT_WAIT,
};
pub use pool::{MatcherPool, PoolConfig, PoolError, PooledMatcher, DEFAULT_CHECKOUT_TIMEOUT};
pub use recovery::{recover, RecoveryError, RecoveryReport};
pub use watermark::Watermark;
