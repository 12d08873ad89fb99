//! Transport state shared with backend host callbacks.
//!
//! The audio thread publishes tempo/position updates through an
//! [`arc_swap::ArcSwap`]; backend adapters read it lock-free from inside
//! their host-callback implementations (a V2 plugin asking for time info
//! during `process` must never block).

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransportState {
    pub tempo_bpm: f64,
    pub time_sig_numerator: i32,
    pub time_sig_denominator: i32,
    pub playing: bool,
    /// Musical position in quarter notes.
    pub position_beats: f64,
    /// Sample position since transport start.
    pub sample_position: i64,
}

impl Default for TransportState {
    fn default() -> Self {
        Self {
            tempo_bpm: 120.0,
            time_sig_numerator: 4,
            time_sig_denominator: 4,
            playing: false,
            position_beats: 0.0,
            sample_position: 0,
        }
    }
}

impl TransportState {
    /// Position advanced by `frames` samples at `sample_rate`.
    pub fn advanced(mut self, frames: usize, sample_rate: f64) -> Self {
        if self.playing && sample_rate > 0.0 {
            let seconds = frames as f64 / sample_rate;
            self.position_beats += seconds * self.tempo_bpm / 60.0;
            self.sample_position += frames as i64;
        }
        self
    }
}

/// Lock-free transport cell: written by whoever services transport
/// setters, read by backend callbacks on any thread.
#[derive(Debug, Default)]
pub struct TransportCell(ArcSwap<TransportState>);

impl TransportCell {
    pub fn new(state: TransportState) -> Self {
        Self(ArcSwap::from_pointee(state))
    }

    pub fn get(&self) -> TransportState {
        **self.0.load()
    }

    pub fn set(&self, state: TransportState) {
        self.0.store(Arc::new(state));
    }

    pub fn update(&self, f: impl Fn(TransportState) -> TransportState) {
        self.0.rcu(|cur| Arc::new(f(**cur)));
    }
}
