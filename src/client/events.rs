//! Transport lifecycle events
//!
//! One variant per lifecycle callback. Events borrow from the call that
//! fires them and are delivered by reference to every listener.

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode, Url};
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// Error carried by DNS and connect failures
pub type TransportError = dyn StdError + Send + Sync;

/// A single lifecycle callback
#[derive(Clone, Copy)]
pub enum Event<'a> {
    CallStart {
        method: &'a Method,
        url: &'a Url,
    },
    CallEnd {
        elapsed: Duration,
    },
    CallFailed {
        elapsed: Duration,
        error: &'a reqwest::Error,
    },
    DnsStart {
        host: &'a str,
    },
    DnsEnd {
        host: &'a str,
        addresses: usize,
        elapsed: Duration,
    },
    DnsFailed {
        host: &'a str,
        elapsed: Duration,
        error: &'a TransportError,
    },
    ConnectStart,
    ConnectEnd {
        elapsed: Duration,
    },
    ConnectFailed {
        elapsed: Duration,
        error: &'a TransportError,
    },
    ConnectionAcquired {
        host: &'a str,
    },
    ConnectionReleased {
        host: &'a str,
    },
    RequestHeadersStart,
    RequestHeadersEnd {
        headers: &'a HeaderMap,
    },
    RequestBodyStart,
    RequestBodyEnd {
        bytes: u64,
    },
    RequestFailed {
        error: &'a reqwest::Error,
    },
    ResponseHeadersStart,
    ResponseHeadersEnd {
        status: StatusCode,
        headers: &'a HeaderMap,
    },
    ResponseBodyStart,
    ResponseBodyEnd {
        bytes: u64,
    },
    ResponseFailed {
        error: &'a reqwest::Error,
    },
}

/// Payload-free discriminant of [`Event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    CallStart,
    CallEnd,
    CallFailed,
    DnsStart,
    DnsEnd,
    DnsFailed,
    ConnectStart,
    ConnectEnd,
    ConnectFailed,
    ConnectionAcquired,
    ConnectionReleased,
    RequestHeadersStart,
    RequestHeadersEnd,
    RequestBodyStart,
    RequestBodyEnd,
    RequestFailed,
    ResponseHeadersStart,
    ResponseHeadersEnd,
    ResponseBodyStart,
    ResponseBodyEnd,
    ResponseFailed,
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::CallStart { .. } => EventKind::CallStart,
            Event::CallEnd { .. } => EventKind::CallEnd,
            Event::CallFailed { .. } => EventKind::CallFailed,
            Event::DnsStart { .. } => EventKind::DnsStart,
            Event::DnsEnd { .. } => EventKind::DnsEnd,
            Event::DnsFailed { .. } => EventKind::DnsFailed,
            Event::ConnectStart => EventKind::ConnectStart,
            Event::ConnectEnd { .. } => EventKind::ConnectEnd,
            Event::ConnectFailed { .. } => EventKind::ConnectFailed,
            Event::ConnectionAcquired { .. } => EventKind::ConnectionAcquired,
            Event::ConnectionReleased { .. } => EventKind::ConnectionReleased,
            Event::RequestHeadersStart => EventKind::RequestHeadersStart,
            Event::RequestHeadersEnd { .. } => EventKind::RequestHeadersEnd,
            Event::RequestBodyStart => EventKind::RequestBodyStart,
            Event::RequestBodyEnd { .. } => EventKind::RequestBodyEnd,
            Event::RequestFailed { .. } => EventKind::RequestFailed,
            Event::ResponseHeadersStart => EventKind::ResponseHeadersStart,
            Event::ResponseHeadersEnd { .. } => EventKind::ResponseHeadersEnd,
            Event::ResponseBodyStart => EventKind::ResponseBodyStart,
            Event::ResponseBodyEnd { .. } => EventKind::ResponseBodyEnd,
            Event::ResponseFailed { .. } => EventKind::ResponseFailed,
        }
    }
}

impl fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::CallStart { method, url } => write!(f, "CallStart({method} {url})"),
            Event::DnsStart { host }
            | Event::ConnectionAcquired { host }
            | Event::ConnectionReleased { host } => write!(f, "{:?}({host})", self.kind()),
            Event::DnsEnd {
                host, addresses, ..
            } => write!(f, "DnsEnd({host}, {addresses} addresses)"),
            Event::DnsFailed { host, error, .. } => write!(f, "DnsFailed({host}: {error})"),
            Event::ConnectFailed { error, .. } => write!(f, "ConnectFailed({error})"),
            Event::CallFailed { error, .. }
            | Event::RequestFailed { error }
            | Event::ResponseFailed { error } => write!(f, "{:?}({error})", self.kind()),
            Event::RequestBodyEnd { bytes } | Event::ResponseBodyEnd { bytes } => {
                write!(f, "{:?}({bytes} bytes)", self.kind())
            }
            Event::ResponseHeadersEnd { status, .. } => write!(f, "ResponseHeadersEnd({status})"),
            _ => write!(f, "{:?}", self.kind()),
        }
    }
}

/// Every kind, in lifecycle order
pub const ALL_KINDS: [EventKind; 21] = [
    EventKind::CallStart,
    EventKind::DnsStart,
    EventKind::DnsEnd,
    EventKind::DnsFailed,
    EventKind::ConnectStart,
    EventKind::ConnectEnd,
    EventKind::ConnectFailed,
    EventKind::ConnectionAcquired,
    EventKind::RequestHeadersStart,
    EventKind::RequestHeadersEnd,
    EventKind::RequestBodyStart,
    EventKind::RequestBodyEnd,
    EventKind::RequestFailed,
    EventKind::ResponseHeadersStart,
    EventKind::ResponseHeadersEnd,
    EventKind::ResponseBodyStart,
    EventKind::ResponseBodyEnd,
    EventKind::ResponseFailed,
    EventKind::ConnectionReleased,
    EventKind::CallEnd,
    EventKind::CallFailed,
];
