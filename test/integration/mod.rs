// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

mod lifecycle;
mod preset;
mod transfer;
mod vcs;
