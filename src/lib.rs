// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Boss: build, release, and roll back deployments over SSH.
//!
//! Boss keeps every deployment target in a simple release layout: one
//! directory per build, one JSON document of build history, and one `current`
//! symbolic link that decides what is live. Builds are staged in full before
//! the link is flipped, so a failed deployment never takes down the build
//! that was already running.

pub mod buildman;
pub mod config;
pub mod history;
pub mod notify;
pub mod path;
pub mod preset;
pub mod remote;
pub mod script;
pub mod transfer;
pub mod vcs;
