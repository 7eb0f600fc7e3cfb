// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Logging setup for the command-line tool.

use tracing::Level;

/// Initialize the tracing subscriber with a custom default level.
///
/// The `RUST_LOG` environment variable takes precedence, e.g.
/// `RUST_LOG=dsr_tomo=debug`.
pub fn init_logger_with_level(default_level: Level) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Default level for the verbosity flag.
pub fn level_for(verb: bool) -> Level {
    if verb {
        Level::DEBUG
    } else {
        Level::INFO
    }
}
