//! Wire-level timing for a single attempt.
//!
//! The transport fires [`TimingHooks`] callbacks at connection lifecycle
//! boundaries. [`TimingCollector`] records an [`Instant`] for each and turns
//! them into a [`CallTiming`] once the body has been read.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::util::lock_unpoisoned;

/// Lifecycle callbacks fired by a transport while it serves one attempt.
///
/// Every method defaults to a no-op so a transport that cannot observe a
/// phase simply never calls it.
pub trait TimingHooks: Send + Sync {
    fn dns_start(&self) {}

    fn dns_done(&self) {}

    fn connect_start(&self) {}

    fn connect_done(&self) {}

    fn tls_start(&self) {}

    fn tls_done(&self) {}

    fn got_connection(&self) {}

    fn wrote_request(&self) {}

    fn first_response_byte(&self) {}
}

/// Millisecond breakdown of one attempt. Phases whose start or end never
/// fired are `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CallTiming {
    pub total_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_byte_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_written_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_read_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct Marks {
    dns_start: Option<Instant>,
    dns_done: Option<Instant>,
    connect_start: Option<Instant>,
    connect_done: Option<Instant>,
    tls_start: Option<Instant>,
    tls_done: Option<Instant>,
    got_connection: Option<Instant>,
    wrote_request: Option<Instant>,
    first_response_byte: Option<Instant>,
}

#[derive(Debug)]
pub struct TimingCollector {
    started_at: Instant,
    marks: Mutex<Marks>,
}

impl Default for TimingCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingCollector {
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    pub fn started_at(started_at: Instant) -> Self {
        Self {
            started_at,
            marks: Mutex::new(Marks::default()),
        }
    }

    fn first(&self, select: impl FnOnce(&mut Marks) -> &mut Option<Instant>) {
        let mut marks = lock_unpoisoned(&self.marks);
        let slot = select(&mut marks);
        if slot.is_none() {
            *slot = Some(Instant::now());
        }
    }

    fn latest(&self, select: impl FnOnce(&mut Marks) -> &mut Option<Instant>) {
        let mut marks = lock_unpoisoned(&self.marks);
        *select(&mut marks) = Some(Instant::now());
    }

    pub fn finish(&self, body_done: Instant) -> CallTiming {
        let marks = lock_unpoisoned(&self.marks);
        let started_at = Some(self.started_at);
        let body_reference = marks
            .first_response_byte
            .or(marks.got_connection)
            .or(started_at);

        CallTiming {
            total_ms: millis(body_done.saturating_duration_since(self.started_at)),
            dns_ms: span_ms(marks.dns_start, marks.dns_done),
            connect_ms: span_ms(marks.connect_start, marks.connect_done),
            tls_ms: span_ms(marks.tls_start, marks.tls_done),
            first_byte_ms: span_ms(started_at, marks.first_response_byte),
            request_written_ms: span_ms(started_at, marks.wrote_request),
            body_read_ms: span_ms(body_reference, Some(body_done)),
        }
    }
}

impl TimingHooks for TimingCollector {
    fn dns_start(&self) {
        self.first(|marks| &mut marks.dns_start);
    }

    fn dns_done(&self) {
        self.latest(|marks| &mut marks.dns_done);
    }

    // A resolver fires this again after lookup; the later mark wins so the
    // connect phase excludes DNS.
    fn connect_start(&self) {
        self.latest(|marks| &mut marks.connect_start);
    }

    fn connect_done(&self) {
        self.first(|marks| &mut marks.connect_done);
    }

    fn tls_start(&self) {
        self.first(|marks| &mut marks.tls_start);
    }

    fn tls_done(&self) {
        self.first(|marks| &mut marks.tls_done);
    }

    fn got_connection(&self) {
        self.first(|marks| &mut marks.got_connection);
    }

    fn wrote_request(&self) {
        self.latest(|marks| &mut marks.wrote_request);
    }

    fn first_response_byte(&self) {
        self.first(|marks| &mut marks.first_response_byte);
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn span_ms(start: Option<Instant>, end: Option<Instant>) -> Option<u64> {
    let (start, end) = (start?, end?);
    Some(millis(end.saturating_duration_since(start)))
}
