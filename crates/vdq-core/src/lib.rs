//! Core engine for vdq: turns a media link into a delivered file.
//!
//! Pipeline: media → format (resolve) → engine (selection) → admission →
//! worker (download) → delivery (convert, send) → cleanup.

pub mod config;
pub mod logging;

pub mod admission;
pub mod control;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod ffmpeg;
pub mod format;
pub mod gateway;
pub mod media;
pub mod registry;
pub mod retry;
pub mod storage;
pub mod throttle;
pub mod worker;
pub mod ytdlp;
