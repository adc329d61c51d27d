//! Chunked upload client for large media archives.
//!
//! A file is split into fixed-size chunks that are sent one at a time to an
//! ingestion endpoint, each with a bounded linear retry, and then finalized
//! into a server-side processing job.
//!
//! ## Core Types
//!
//! - [`UploadCoordinator`] - Runs init, chunk transfer and finalize for one upload
//! - [`UploadSession`] - Client-side record of chunk statuses and attempts
//! - [`IngestApi`] - The remote protocol, with [`HttpIngestApi`] over HTTP
//! - [`ChunkSource`] - Byte sources, [`FileSource`] and [`MemorySource`]
//!
//! ## License
//!
//! This project is licensed under the [MIT](./LICENSE.MIT) or
//! [Apache-2.0](./LICENSE.Apache-2.0) license. You can choose between one of
//! them if you use this work.
//!
//! `SPDX-License-Identifier: MIT OR Apache-2.0`

pub mod api;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod progress;
pub mod retry;
pub mod session;
pub mod source;
pub mod splitter;

pub use api::{
    ChunkUpload, FinalizeResponse, FinalizeUploadRequest, HttpIngestApi, IngestApi,
    InitUploadRequest,
};
pub use client::UploadProtocolClient;
pub use config::{DEFAULT_CHUNK_SIZE, IngestEndpoints, UploadConfig};
pub use coordinator::UploadCoordinator;
pub use error::{Result, UploadError};
pub use progress::{UploadProgress, UploadProgressReporter};
pub use retry::ChunkRetryPolicy;
pub use session::{Chunk, ChunkStatus, UploadMetadata, UploadSession};
pub use source::{ChunkSource, FileSource, MemorySource};
pub use splitter::{ChunkRange, chunk_count, split};
