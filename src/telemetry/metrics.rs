//! Counters published through the `metrics` facade.
//!
//! No exporter is installed here; the embedding process picks one. Without a
//! recorder every call is a no-op.

use ::metrics::counter;

/// Remote command handled, labelled by command name and outcome.
pub fn record_remote_command(command: &'static str, outcome: &'static str) {
    counter!("fleet_remote_commands_total", "command" => command, "outcome" => outcome)
        .increment(1);
}

pub fn record_ping_received() {
    counter!("fleet_cross_server_pings_total").increment(1);
}

pub fn record_pong_accepted() {
    counter!("fleet_cross_server_pongs_total", "outcome" => "accepted").increment(1);
}

/// Pong dropped because it was misaddressed or nothing was waiting for it.
pub fn record_pong_dropped(reason: &'static str) {
    counter!("fleet_cross_server_pongs_total", "outcome" => "dropped", "reason" => reason)
        .increment(1);
}

pub fn record_cache_evictions(count: usize) {
    counter!("fleet_cache_evictions_total").increment(count as u64);
}
