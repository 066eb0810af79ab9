// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport trait implemented by the long-poll and webhook front ends.

use async_trait::async_trait;

use crate::error::TetherError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{InboundUpdate, OutboundMessage};

/// A bidirectional messaging transport.
///
/// `receive` yields an effectively infinite sequence of updates. Transient
/// upstream failures are retried inside the transport; an `Err` from
/// `receive` means the sequence has ended and will not restart.
#[async_trait]
pub trait Transport: PluginAdapter {
    /// Starts background ingestion (poll loop or HTTP listener).
    async fn connect(&mut self) -> Result<(), TetherError>;

    /// Delivers a reply, chunking it if needed.
    async fn send(&self, msg: OutboundMessage) -> Result<(), TetherError>;

    /// Receives the next inbound update.
    async fn receive(&self) -> Result<InboundUpdate, TetherError>;
}
