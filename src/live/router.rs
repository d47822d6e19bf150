//! Pull, dedupe and relabel frames from the hardware ring buffer.
//!
//! One routing cycle scans the newest `scan_factor x channel_count` buffer
//! positions because multi-sensor setups can produce channels at uneven
//! rates, keeps only the most recent frame per channel, and hands each
//! relabeled frame to the delivery callback (which marshals it to the UI
//! thread and re-validates the session).

use crate::error::LiveError;
use crate::frame::FrameObservation;
use crate::hal::{FrameSource, channel_index_tag};
use crate::pipeline::health::LiveHealth;
use log::debug;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// How a delivery attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// The session was invalidated concurrently; the cycle stops advancing.
    Cancelled,
}

/// Result of a completed routing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RouteOutcome {
    Completed { routed: usize },
    Cancelled,
}

/// Resolve the channel index from the per-camera tag, when present.
fn channel_from_tags(
    tags: &Map<String, Value>,
    camera: &str,
) -> Result<Option<usize>, LiveError> {
    let key = channel_index_tag(camera);
    match tags.get(&key) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| LiveError::MetadataParse(format!("tag {key} is not an integer: {value}"))),
    }
}

/// Run one pull-and-route cycle.
///
/// A metadata parse failure aborts the whole cycle (malformed tags indicate
/// a systemic issue, not a per-frame glitch); empty buffer slots are skipped
/// silently.
pub(crate) fn route_cycle(
    source: &dyn FrameSource,
    camera: &str,
    channel_count: usize,
    scan_factor: usize,
    health: &LiveHealth,
    mut deliver: impl FnMut(FrameObservation) -> Delivery,
) -> Result<RouteOutcome, LiveError> {
    let mut satisfied: HashSet<usize> = HashSet::new();

    for position in 0..scan_factor * channel_count {
        let Some(raw) = source.pull_frame_at(position) else {
            // Buffer underrun for that slot.
            health.record_buffer_underrun();
            continue;
        };

        let channel = match channel_from_tags(&raw.tags, camera)? {
            Some(tagged) => tagged,
            None => position,
        };
        if satisfied.contains(&channel) {
            // Already routed a more recent frame for this channel.
            continue;
        }

        let frame = raw.into_observation(channel);
        if deliver(frame) == Delivery::Cancelled {
            debug!("routing cycle cancelled at channel {channel}");
            return Ok(RouteOutcome::Cancelled);
        }

        satisfied.insert(channel);
        if satisfied.len() == channel_count {
            // Got every channel.
            break;
        }
    }

    Ok(RouteOutcome::Completed {
        routed: satisfied.len(),
    })
}
