//! Progress tracking for server-side archive processing jobs.
//!
//! Events arrive over a realtime websocket ([`RealtimeConnection`]) and are
//! folded into a [`JobState`] per job. While the socket is down the job status
//! is polled instead, and a job that sits at 100% without finishing is flagged
//! as stuck so the operator can force its completion.
//!
//! ## Core Types
//!
//! - [`JobMonitor`] - Spawns one monitoring task per job, see [`MonitorHandle`]
//! - [`JobRegistry`] - Tracks several jobs concurrently
//! - [`JobState`] - Job state and its event fold
//! - [`EventBus`] - Named-event subscriptions, implemented by [`EventHub`]
//! - [`JobApi`] - Status polls and forced completion, with [`HttpJobApi`]
//!
//! ## License
//!
//! This project is licensed under the [MIT](./LICENSE.MIT) or
//! [Apache-2.0](./LICENSE.Apache-2.0) license. You can choose between one of
//! them if you use this work.
//!
//! `SPDX-License-Identifier: MIT OR Apache-2.0`

pub mod api;
pub mod bus;
pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod monitor;
pub mod polling;
pub mod realtime;
pub mod registry;
pub mod state;
pub mod stuck;
pub mod tracker;

pub use api::{HttpJobApi, JobApi, JobStatus, PollStatus};
pub use bus::{EventBus, EventHandler, EventHub, Subscription};
pub use channel::JobEventChannel;
pub use config::{Framing, JobEndpoints, MonitorConfig};
pub use error::{MonitorError, Result};
pub use event::{ItemMeta, JobEvent, JobEventKind};
pub use monitor::{JobControl, JobMonitor, JobSnapshot, MonitorHandle};
pub use polling::{PollOutcome, PollSchedule, PollingFallback};
pub use realtime::{RealtimeConnection, websocket_url};
pub use registry::JobRegistry;
pub use state::{
    CompletedItem, ItemCounts, ItemFailure, ItemState, ItemStatus, JobPhase, JobState,
    PhaseDisplay, Transition, format_elapsed,
};
pub use stuck::StuckJobDetector;
pub use tracker::{JobObserver, JobProgressTracker, NoopObserver};
