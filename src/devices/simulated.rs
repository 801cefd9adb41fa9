//! Simulated line device for demos and tests.
//!
//! Emits `"<label>: v1, v2, ..."` lines, the same shape the frame parser
//! expects from a real instrument: a slow sine per channel plus uniform noise.

use super::frame::Frame;
use crate::worker::{ControlMessage, Produce, UnitControl};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

/// Call-level arguments for [`SimulatedReader`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedStart {
    /// Stop by itself after this many frames
    pub limit: Option<usize>,
    /// Seed for reproducible noise
    pub seed: Option<u64>,
}

/// Per-run state of a [`SimulatedReader`].
pub struct SimulatedContext {
    rng: StdRng,
    emitted: usize,
    limit: Option<usize>,
}

/// Producer generating synthetic multi-channel frames.
#[derive(Debug, Clone)]
pub struct SimulatedReader {
    tag: String,
    channels: usize,
    noise: f64,
}

impl SimulatedReader {
    /// Simulated device with `channels` values per frame.
    pub fn new(tag: impl Into<String>, channels: usize) -> Self {
        Self {
            tag: tag.into(),
            channels: channels.max(1),
            noise: 0.05,
        }
    }

    /// Peak amplitude of the uniform noise added to every value.
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise.abs();
        self
    }

    fn line(&self, index: usize, rng: &mut StdRng) -> String {
        let values: Vec<String> = (0..self.channels)
            .map(|channel| {
                let phase = index as f64 * 0.1 + channel as f64;
                let jitter = if self.noise > 0.0 {
                    rng.gen_range(-self.noise..=self.noise)
                } else {
                    0.0
                };
                format!("{:.4}", phase.sin() + jitter)
            })
            .collect();
        format!("{}: {}", self.tag, values.join(", "))
    }
}

#[async_trait]
impl Produce for SimulatedReader {
    type Context = SimulatedContext;
    type Output = Frame;
    type StartArgs = SimulatedStart;
    type WorkArgs = ();
    type StopArgs = ();

    async fn on_start(&self, ctl: &UnitControl, args: SimulatedStart) -> SimulatedContext {
        ctl.send(ControlMessage::Connected {
            device: format!("simulated:{}", self.tag),
        });
        SimulatedContext {
            rng: match args.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
            emitted: 0,
            limit: args.limit,
        }
    }

    async fn work(
        &self,
        context: &mut SimulatedContext,
        ctl: &UnitControl,
        _args: &(),
    ) -> Option<Frame> {
        if context.limit.is_some_and(|limit| context.emitted >= limit) {
            ctl.send(ControlMessage::Status(format!(
                "simulation finished after {} frames",
                context.emitted
            )));
            ctl.set_stopped();
            return None;
        }
        let line = self.line(context.emitted, &mut context.rng);
        context.emitted += 1;
        Some(Frame::new(self.tag.clone(), line))
    }

    async fn on_stop(&self, context: SimulatedContext, _ctl: &UnitControl, _args: ()) {
        info!(tag = %self.tag, frames = context.emitted, "Simulated device stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_has_label_and_one_value_per_channel() {
        let reader = SimulatedReader::new("EIT", 4).with_noise(0.0);
        let mut rng = StdRng::seed_from_u64(1);
        let line = reader.line(0, &mut rng);
        let (label, values) = line.split_once(':').unwrap();
        assert_eq!(label, "EIT");
        assert_eq!(values.split(',').count(), 4);
        assert!(values.trim().starts_with("0.0000"));
    }
}
