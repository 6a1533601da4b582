// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource sampling for the supervised runtime.
//!
//! The sampler scrapes the runtime's Prometheus endpoint into [`Sample`]s,
//! keeps them in a [`SampleRing`], and evaluates [`ResourceAlarm`]s over
//! rolling windows of the ring.

pub mod alarm;
pub mod sample;
pub mod sample_ring;

pub use alarm::{ResourceAlarm, ResourceAlert, ResourceKind};
pub use sample::{CpuTracker, Sample, parse_prometheus, scrape};
pub use sample_ring::{SampleAverage, SampleRing};
