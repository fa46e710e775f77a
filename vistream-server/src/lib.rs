//! # vistream-server
//!
//! HTTP/WebSocket front end for `vistream-core`. Serves a fixed
//! catalog of demo apps, each streamed as H.264 to any number of
//! browser viewers with one viewer at a time holding input control.
//!
//! ## Endpoints
//!
//! - `GET /api/apps`: the catalog as JSON.
//! - `GET /ws/{app_id}`: viewer socket. Binary messages carry video,
//!   text messages carry JSON control.

pub mod config;
pub mod demo;
pub mod service;
pub mod ws;
