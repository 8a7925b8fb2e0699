/*
[INPUT]:  Outbound requests, raw frames and parse failures from the stream
[OUTPUT]: Sampled tracing output (first N occurrences per category)
[POS]:    WebSocket layer - rate-limited diagnostics for noisy paths
[UPDATE]: When adding log categories or changing sample limits
*/

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info};

use crate::http::BitfinexError;
use crate::ws::message::{ChannelId, WsRequest};

const REQUEST_LOG_LIMIT: usize = 10;
const SNAPSHOT_SAMPLE_LIMIT: usize = 3;
const OTHER_LOG_LIMIT: usize = 3;
const PARSE_FAIL_LOG_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

static REQUEST_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static SNAPSHOT_SAMPLE_COUNT: AtomicUsize = AtomicUsize::new(0);
static OTHER_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static PARSE_FAIL_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn log_request_sent(request: &WsRequest) {
    let count = REQUEST_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count >= REQUEST_LOG_LIMIT {
        return;
    }

    match request {
        WsRequest::Subscribe(subscription) => {
            info!(
                sample_index = count + 1,
                sample_limit = REQUEST_LOG_LIMIT,
                action = "subscribe",
                channel = subscription.kind().as_str(),
                pair = %subscription.pair,
                "ws subscription sent"
            );
        }
        WsRequest::Unsubscribe(chan_id) => {
            info!(
                sample_index = count + 1,
                sample_limit = REQUEST_LOG_LIMIT,
                action = "unsubscribe",
                chan_id = chan_id.0,
                "ws subscription sent"
            );
        }
    }
}

pub(crate) fn log_snapshot_sample_once(chan_id: ChannelId, records: usize) {
    let count = SNAPSHOT_SAMPLE_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < SNAPSHOT_SAMPLE_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = SNAPSHOT_SAMPLE_LIMIT,
            chan_id = chan_id.0,
            records,
            "ws snapshot sample"
        );
    }
}

pub(crate) fn log_other_message_once(raw: &str) {
    let count = OTHER_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < OTHER_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = OTHER_LOG_LIMIT,
            bytes = raw.len(),
            "ws message unrecognized"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = OTHER_LOG_LIMIT,
            bytes = raw.len(),
            message = %preview,
            "ws message unrecognized"
        );
    }
}

pub(crate) fn log_parse_fail_once(err: &BitfinexError, raw: &str) {
    let count = PARSE_FAIL_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < PARSE_FAIL_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            "ws message parse failed"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            message = %preview,
            "ws message parse failed"
        );
    }
}

pub(crate) fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + 3);
    out.push_str(&value[..end]);
    out.push_str("...");
    out
}
