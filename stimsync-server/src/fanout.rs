use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use stimsync_core::{Command, encode_batch};
use stimsync_timing::Clock;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::link::{ScreenLink, TcpScreenLink};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedDelivery {
    pub screen: String,
    pub error: String,
}

/// Outcome of one batch, also the reply sent to the controlling client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FanoutReport {
    pub batch_len: usize,
    pub delivered: Vec<String>,
    pub failed: Vec<FailedDelivery>,
    /// Set when the batch was rejected before fan-out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FanoutReport {
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.failed.is_empty()
    }
}

/// Stamps time-sensitive commands and broadcasts each batch to every screen.
pub struct StimServer<C: Clock> {
    clock: C,
    links: Vec<Box<dyn ScreenLink>>,
    time_stamp_commands: HashSet<String>,
}

impl<C: Clock> StimServer<C> {
    pub fn new<I, N>(clock: C, time_stamp_commands: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self {
            clock,
            links: Vec::new(),
            time_stamp_commands: time_stamp_commands.into_iter().map(Into::into).collect(),
        }
    }

    /// One TCP link per configured screen, none connected yet.
    pub fn from_config(config: &ServerConfig, clock: C) -> Self {
        let mut server = Self::new(clock, config.time_stamp_commands.iter().cloned());
        for screen in &config.screens {
            server.add_link(TcpScreenLink::new(
                screen.name.clone(),
                screen.command_addr.clone(),
                config.connect_timeout(),
                config.send_timeout(),
            ));
        }
        server
    }

    pub fn add_link(&mut self, link: impl ScreenLink + 'static) {
        self.links.push(Box::new(link));
    }

    pub fn screens(&self) -> impl Iterator<Item = &str> {
        self.links.iter().map(|l| l.name())
    }

    /// Adds `t` to unstamped time-sensitive commands. Every stamp in a batch
    /// is the same clock reading.
    pub fn stamp(&self, batch: &mut [Command]) {
        let mut now = None;
        for cmd in batch.iter_mut() {
            if self.time_stamp_commands.contains(&cmd.name) && !cmd.has_timestamp() {
                let t = *now.get_or_insert_with(|| self.clock.now());
                cmd.stamp(t);
            }
        }
    }

    /// Sends the whole batch to every screen before returning. A failing
    /// screen is reported and skipped; the others still get the batch.
    pub fn handle_batch(&mut self, mut batch: Vec<Command>) -> FanoutReport {
        self.stamp(&mut batch);
        let line = match encode_batch(&batch) {
            Ok(line) => line,
            Err(e) => return FanoutReport::rejected(e.to_string()),
        };

        let mut report = FanoutReport {
            batch_len: batch.len(),
            ..FanoutReport::default()
        };
        for link in &mut self.links {
            match link.send(&line) {
                Ok(()) => report.delivered.push(link.name().to_string()),
                Err(e) => {
                    warn!(error = %e, batch_len = batch.len(), "batch not delivered");
                    report.failed.push(FailedDelivery {
                        screen: e.screen,
                        error: e.source.to_string(),
                    });
                }
            }
        }
        debug!(
            batch_len = report.batch_len,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "batch fanned out"
        );
        report
    }
}
