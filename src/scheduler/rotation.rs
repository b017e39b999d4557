//! Deterministic per-cycle rotation of the station list
//!
//! When the outbound quota truncates a cycle, the stations at the tail of the
//! list are the ones that miss out. Rotating the start point every cycle
//! spreads that loss across the fleet instead of starving the same tail
//! forever:
//!
//! - the offset is a pure function of the cycle index and station count
//! - offset 0 and lists shorter than two stations are left untouched
//! - after rotating by `o`, element `i` is the original element `(i + o) % n`

use std::time::Duration;

/// Cycle index for a wall-clock instant
pub fn cycle_index(now_ms: i64, interval: Duration) -> u64 {
    let interval_ms = interval.as_millis().max(1) as i64;
    now_ms.max(0).div_euclid(interval_ms) as u64
}

/// Rotation offset for a cycle over `station_count` stations
pub fn rotation_offset(cycle: u64, station_count: usize) -> usize {
    if station_count < 2 {
        return 0;
    }
    (cycle % station_count as u64) as usize
}

/// Rotate `items` in place by `offset`
pub fn rotate<T>(items: &mut [T], offset: usize) {
    if items.len() < 2 {
        return;
    }
    let offset = offset % items.len();
    if offset != 0 {
        items.rotate_left(offset);
    }
}

/// Rotate a station list for the cycle containing `now_ms`
pub fn rotate_for_cycle<T>(mut items: Vec<T>, now_ms: i64, interval: Duration) -> Vec<T> {
    let offset = rotation_offset(cycle_index(now_ms, interval), items.len());
    rotate(&mut items, offset);
    items
}
