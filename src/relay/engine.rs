//! Relay Engine
//!
//! One thread alternates between the MIDI input and the peer connection:
//!
//! 1. poll the input; an event is transformed, framed and written to the peer
//! 2. poll the peer (bounded wait); every complete frame is emitted on the output
//! 3. if neither side produced anything, sleep for the idle delay
//!
//! The idle delay bounds CPU usage at the cost of up to one delay of added
//! latency for the first event after a quiet period. Without a peer the
//! engine runs in local echo mode and emits input events directly; any
//! direction other than `none` then shifts them once.

use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::RelayError;
use crate::event::MidiEvent;
use crate::general::cancel::CancelToken;
use crate::general::transpose::Transform;
use crate::io::midi::{MidiSink, MidiSource};
use crate::net::codec::{self, FrameDecoder};
use crate::net::connection::Connection;

/// Which leg of the relay the transform applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformDirection {
    #[default]
    Outgoing,
    Incoming,
    Both,
    None,
}

impl TransformDirection {
    fn outgoing(self) -> bool {
        matches!(self, TransformDirection::Outgoing | TransformDirection::Both)
    }

    fn incoming(self) -> bool {
        matches!(self, TransformDirection::Incoming | TransformDirection::Both)
    }
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub idle_delay: Duration,
    pub direction: TransformDirection,
    /// Send a keepalive frame after this much outbound silence; `None` disables it.
    pub keepalive: Option<Duration>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            idle_delay: Duration::from_millis(100),
            direction: TransformDirection::Outgoing,
            keepalive: Some(Duration::from_secs(2)),
        }
    }
}

/// Counters reported when the session ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Events written to the peer
    pub sent: u64,
    /// Events decoded from the peer
    pub received: u64,
    /// Events written to the local output
    pub emitted: u64,
    /// Events skipped (output unavailable or failing, unframeable)
    pub dropped: u64,
}

pub struct RelayEngine {
    source: Box<dyn MidiSource>,
    sink: Option<Box<dyn MidiSink>>,
    link: Option<Box<dyn Connection>>,
    transform: Box<dyn Transform>,
    options: RelayOptions,
    cancel: CancelToken,
    decoder: FrameDecoder,
    stats: RelayStats,
    last_sent: Instant,
}

impl RelayEngine {
    /// `sink == None` is degraded output; `link == None` is local echo mode.
    pub fn new(
        source: Box<dyn MidiSource>,
        sink: Option<Box<dyn MidiSink>>,
        link: Option<Box<dyn Connection>>,
        transform: Box<dyn Transform>,
        options: RelayOptions,
        cancel: CancelToken,
    ) -> Self {
        Self {
            source,
            sink,
            link,
            transform,
            options,
            cancel,
            decoder: FrameDecoder::new(),
            stats: RelayStats::default(),
            last_sent: Instant::now(),
        }
    }

    /// Run until cancelled or a fatal error. Ports and connection are closed
    /// on every exit path.
    pub fn run(mut self) -> Result<RelayStats, RelayError> {
        log::info!(
            "Relay running ({}, idle delay {:?}, transform {:?})",
            if self.link.is_some() { "network" } else { "local echo" },
            self.options.idle_delay,
            self.options.direction
        );
        let result = self.pump();
        match &result {
            Ok(()) => log::info!("Relay cancelled, tearing down"),
            Err(err) => log::error!("Relay stopped: {}", err),
        }
        self.teardown();
        result.map(|()| self.stats)
    }

    fn pump(&mut self) -> Result<(), RelayError> {
        while !self.cancel.is_cancelled() {
            let mut idle = true;

            let event = self.source.poll()?;
            if !event.is_empty() {
                idle = false;
                self.forward_local(event)?;
            }

            let inbound = match self.link.as_mut() {
                Some(link) => link.try_recv()?,
                None => None,
            };
            if let Some(bytes) = inbound {
                idle = false;
                self.decoder.extend(&bytes);
                while let Some(event) = self.decoder.next_event()? {
                    self.stats.received += 1;
                    log::debug!("<- {}", event);
                    let event = if self.options.direction.incoming() {
                        self.transform.apply(event)
                    } else {
                        event
                    };
                    self.emit(&event)?;
                }
            }

            if idle {
                self.send_keepalive()?;
                self.cancel.sleep(self.options.idle_delay);
            }
        }
        Ok(())
    }

    fn forward_local(&mut self, event: MidiEvent) -> Result<(), RelayError> {
        log::debug!("-> {}", event);
        // Without a peer the event crosses both legs at once and is shifted once
        let transform = if self.link.is_some() {
            self.options.direction.outgoing()
        } else {
            self.options.direction != TransformDirection::None
        };
        let event = if transform {
            self.transform.apply(event)
        } else {
            event
        };

        let Some(link) = self.link.as_mut() else {
            return self.emit(&event);
        };

        let frame = match codec::encode(&event) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("Dropping event: {}", err);
                self.stats.dropped += 1;
                return Ok(());
            }
        };
        if let Err(err) = link.send(&frame) {
            log::warn!("Dropping event {} after failed send", event);
            self.stats.dropped += 1;
            return Err(err);
        }
        self.stats.sent += 1;
        self.last_sent = Instant::now();
        Ok(())
    }

    fn send_keepalive(&mut self) -> Result<(), RelayError> {
        let (Some(link), Some(interval)) = (self.link.as_mut(), self.options.keepalive) else {
            return Ok(());
        };
        if self.last_sent.elapsed() >= interval {
            link.send(&codec::keepalive())?;
            self.last_sent = Instant::now();
        }
        Ok(())
    }

    /// Device write failures skip the event without ending the session.
    fn emit(&mut self, event: &MidiEvent) -> Result<(), RelayError> {
        match self.sink.as_mut() {
            Some(sink) => match sink.send(event) {
                Ok(()) => self.stats.emitted += 1,
                Err(err) if err.is_recoverable() => {
                    log::warn!("Skipping event {}: {}", event, err);
                    self.stats.dropped += 1;
                }
                Err(err) => return Err(err),
            },
            None => {
                log::debug!("No output port, skipping {}", event);
                self.stats.dropped += 1;
            }
        }
        Ok(())
    }

    fn teardown(&mut self) {
        if self.decoder.pending() > 0 {
            log::debug!("Discarding {} bytes of an incomplete frame", self.decoder.pending());
        }
        self.source.close();
        if let Some(sink) = self.sink.as_mut() {
            sink.close();
        }
        if let Some(link) = self.link.as_mut() {
            link.close();
        }
        log::info!(
            "Session closed: sent {}, received {}, emitted {}, dropped {}",
            self.stats.sent,
            self.stats.received,
            self.stats.emitted,
            self.stats.dropped
        );
    }
}
