//! Recommendation engine
//!
//! Pure advice generation: given the engine's current configuration and the
//! observed xrun severity, produce ranked, concrete tuning suggestions.
//! No side effects - everything this module needs comes in as arguments.

use std::time::Duration;

use st_protocol::Severity;

use crate::audio::EngineSettings;
use crate::constants::recommend as rc;
use crate::xrun::WindowCounts;

/// Tunable thresholds. Empirically chosen values, kept configurable rather
/// than hard-coded.
#[derive(Debug, Clone)]
pub struct RecommendConfig {
    /// 1-minute totals above this jump straight to the top buffer tier
    pub severe_jump_threshold: u32,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            severe_jump_threshold: rc::DEFAULT_SEVERE_JUMP_THRESHOLD,
        }
    }
}

/// Round-trip contribution of one buffer at a given rate, in milliseconds
pub fn latency_ms(buffer: u32, rate: u32) -> f64 {
    buffer as f64 * 1000.0 / rate as f64
}

/// Next buffer tier up the ladder; None when already at (or beyond) the top
pub fn next_buffer(current: u32) -> Option<u32> {
    rc::BUFFER_LADDER.iter().copied().find(|&b| b > current)
}

/// Larger jump: skip a tier. Saturates at the top of the ladder.
pub fn jump_buffer(current: u32) -> Option<u32> {
    let mut above = rc::BUFFER_LADDER.iter().copied().filter(|&b| b > current);
    let first = above.next()?;
    Some(above.next().unwrap_or(first))
}

/// Generate tuning advice for the engine's *current* configuration.
/// First applicable rule wins per category; suggestions are ordered most
/// important first.
pub fn advise(
    engine: &EngineSettings,
    severity: Severity,
    counts: &WindowCounts,
    cfg: &RecommendConfig,
) -> Vec<String> {
    let mut advice = Vec::new();

    if !engine.active {
        // No engine-specific numbers to reason about: generic reference table
        advice.push("Audio engine is not running; start it to get tailored advice.".to_string());
        advice.push(format!(
            "Buffer/latency reference at {} Hz:",
            rc::REFERENCE_SAMPLE_RATE
        ));
        for &buffer in rc::BUFFER_LADDER {
            advice.push(format!(
                "  {} frames \u{2248} {:.1} ms",
                buffer,
                latency_ms(buffer, rc::REFERENCE_SAMPLE_RATE)
            ));
        }
        return advice;
    }

    let one_min = counts.get(&Duration::from_secs(60)).copied().unwrap_or(0);

    match severity {
        Severity::Perfect => {
            match (engine.buffer_frames, engine.sample_rate_hz) {
                (Some(buffer), Some(rate)) => advice.push(format!(
                    "No xruns in the last minute; {} frames at {} Hz ({:.1} ms) is stable.",
                    buffer,
                    rate,
                    latency_ms(buffer, rate)
                )),
                _ => advice.push("No xruns in the last minute; current settings are stable.".to_string()),
            }
        }
        Severity::Mild => {
            if let Some(buffer) = engine.buffer_frames {
                if let Some(next) = next_buffer(buffer) {
                    let latency_note = engine
                        .sample_rate_hz
                        .map(|rate| format!(" ({:.1} ms)", latency_ms(next, rate)))
                        .unwrap_or_default();
                    advice.push(format!(
                        "Occasional xruns ({} in the last minute): raise the buffer from {} to {} frames{}.",
                        one_min, buffer, next, latency_note
                    ));
                } else {
                    advice.push(format!(
                        "Occasional xruns at the largest buffer ({} frames); check CPU load and IRQ routing.",
                        buffer
                    ));
                }
            } else {
                advice.push(format!(
                    "Occasional xruns ({} in the last minute): raise the engine buffer one step.",
                    one_min
                ));
            }
        }
        Severity::Severe => {
            if let Some(buffer) = engine.buffer_frames {
                let target = if one_min > cfg.severe_jump_threshold {
                    rc::BUFFER_LADDER.last().copied().filter(|&top| top > buffer)
                } else {
                    jump_buffer(buffer)
                };
                match target {
                    Some(target) => {
                        let latency_note = engine
                            .sample_rate_hz
                            .map(|rate| format!(" ({:.1} ms)", latency_ms(target, rate)))
                            .unwrap_or_default();
                        advice.push(format!(
                            "Heavy xruns ({} in the last minute): raise the buffer from {} to {} frames{}.",
                            one_min, buffer, target, latency_note
                        ));
                    }
                    None => advice.push(format!(
                        "Heavy xruns at the largest buffer ({} frames); the machine cannot sustain this configuration.",
                        buffer
                    )),
                }
            } else {
                advice.push(format!(
                    "Heavy xruns ({} in the last minute): raise the engine buffer substantially.",
                    one_min
                ));
            }
            if let Some(rate) = engine.sample_rate_hz {
                if rate > rc::FALLBACK_SAMPLE_RATE {
                    advice.push(format!(
                        "Reduce the sample rate from {} to {} Hz to halve the scheduling pressure.",
                        rate,
                        rc::FALLBACK_SAMPLE_RATE
                    ));
                }
            }
        }
    }

    // Double-buffering leaves no headroom for a USB interface once xruns appear
    if severity != Severity::Perfect && engine.periods == Some(2) {
        advice.push("Use 3 periods instead of 2 for extra scheduling headroom.".to_string());
    }

    advice
}
