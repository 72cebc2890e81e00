use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use webrtc::rtp::packet::Packet;

use super::JitterBufferConfig;

/// Jumps larger than this are treated as a stream restart, not loss
const MAX_SEQUENCE_GAP: u16 = 1000;

/// Sequence accounting for one SSRC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JitterStats {
    pub received: u64,
    pub lost: u64,
    pub recovered: u64,
    /// Gaps still waiting for a late packet
    pub pending: usize,
    pub highest_sequence: u16,
}

struct SsrcState {
    stats: JitterStats,
    /// Missing sequence numbers and when the gap was noticed
    missing: VecDeque<(u16, Instant)>,
}

impl SsrcState {
    fn new(sequence: u16) -> Self {
        Self {
            stats: JitterStats {
                received: 1,
                highest_sequence: sequence,
                ..Default::default()
            },
            missing: VecDeque::new(),
        }
    }
}

/// Tracks sequence continuity and packet loss per SSRC
pub struct JitterBuffer {
    max_buffer_time: Duration,
    streams: HashMap<u32, SsrcState>,
}

impl JitterBuffer {
    pub fn new(config: &JitterBufferConfig) -> Self {
        Self {
            max_buffer_time: Duration::from_millis(config.max_buffer_time),
            streams: HashMap::new(),
        }
    }

    pub fn push(&mut self, packet: &Packet) {
        self.push_at(packet.header.ssrc, packet.header.sequence_number, Instant::now());
    }

    fn push_at(&mut self, ssrc: u32, sequence: u16, now: Instant) {
        let Some(state) = self.streams.get_mut(&ssrc) else {
            self.streams.insert(ssrc, SsrcState::new(sequence));
            return;
        };

        let max_age = self.max_buffer_time;
        while let Some((_, seen)) = state.missing.front() {
            if now.duration_since(*seen) <= max_age {
                break;
            }
            state.missing.pop_front();
        }

        let delta = sequence.wrapping_sub(state.stats.highest_sequence);
        if delta == 0 {
            // duplicate
            return;
        }

        state.stats.received += 1;

        if (delta as i16) > 0 {
            if delta > MAX_SEQUENCE_GAP {
                tracing::debug!(
                    "SSRC {} jumped from {} to {}, resetting",
                    ssrc,
                    state.stats.highest_sequence,
                    sequence
                );
                state.missing.clear();
            } else {
                for gap in 1..delta {
                    let missing = state.stats.highest_sequence.wrapping_add(gap);
                    state.missing.push_back((missing, now));
                    state.stats.lost += 1;
                }
            }
            state.stats.highest_sequence = sequence;
        } else if let Some(pos) = state.missing.iter().position(|(seq, _)| *seq == sequence) {
            state.missing.remove(pos);
            state.stats.recovered += 1;
        }

        state.stats.pending = state.missing.len();
    }

    pub fn stats(&self, ssrc: u32) -> Option<JitterStats> {
        self.streams.get(&ssrc).map(|s| JitterStats {
            pending: s.missing.len(),
            ..s.stats
        })
    }

    /// Stats of every stream seen so far, ordered by SSRC
    pub fn all_stats(&self) -> Vec<(u32, JitterStats)> {
        let mut all: Vec<_> = self
            .streams
            .keys()
            .filter_map(|ssrc| self.stats(*ssrc).map(|stats| (*ssrc, stats)))
            .collect();
        all.sort_by_key(|(ssrc, _)| *ssrc);
        all
    }

    #[cfg(test)]
    fn missing(&self, ssrc: u32) -> Vec<u16> {
        self.streams
            .get(&ssrc)
            .map(|s| s.missing.iter().map(|(seq, _)| *seq).collect())
            .unwrap_or_default()
    }
}
