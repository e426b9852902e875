//! Baud rate autodetection
//!
//! Pure state machine: the engine feeds it received lines and read
//! timeouts and acts on the returned [`BaudStep`]. A candidate is accepted
//! after enough consecutive temperature-bearing answers to `M105`; any other
//! printable line except a bare `ok` restarts the count. Garbage or repeated
//! silence moves on to the next candidate.

use super::response::{parse_response, MarlinResponse};
use crate::communication::is_garbage;
use printkit_core::BaudDetectionConfig;

/// What the engine should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaudStep {
    /// Keep probing at the current rate
    Continue,
    /// Reconfigure the link to this rate and probe again
    Switch(u32),
    /// The printer answers reliably at this rate
    Accepted(u32),
    /// No candidate left
    Exhausted,
}

/// Baud rate search over a candidate list
#[derive(Debug, Clone)]
pub struct BaudDetector {
    candidates: Vec<u32>,
    index: usize,
    acks: u32,
    timeouts: u32,
    required_acks: u32,
    timeouts_per_candidate: u32,
}

impl BaudDetector {
    /// Create a detector from configuration
    pub fn new(config: &BaudDetectionConfig) -> Self {
        Self::with_candidates(
            config.candidates.clone(),
            config.required_acks,
            config.timeouts_per_candidate,
        )
    }

    /// Create a detector for an explicit candidate list
    pub fn with_candidates(
        candidates: Vec<u32>,
        required_acks: u32,
        timeouts_per_candidate: u32,
    ) -> Self {
        Self {
            candidates,
            index: 0,
            acks: 0,
            timeouts: 0,
            required_acks: required_acks.max(1),
            timeouts_per_candidate: timeouts_per_candidate.max(1),
        }
    }

    /// Rate currently being probed
    pub fn current(&self) -> Option<u32> {
        self.candidates.get(self.index).copied()
    }

    /// Number of candidates tried so far
    pub fn attempted(&self) -> usize {
        (self.index + 1).min(self.candidates.len())
    }

    /// Feed one received line (raw bytes, terminator optional)
    pub fn on_line(&mut self, raw: &[u8]) -> BaudStep {
        let Some(current) = self.current() else {
            return BaudStep::Exhausted;
        };
        if is_garbage(raw) {
            tracing::debug!("Garbage at {} baud", current);
            return self.advance();
        }
        let line = String::from_utf8_lossy(raw);
        let response = parse_response(&line, 0);
        if response.temperatures().is_none() {
            match response {
                MarlinResponse::Ok { .. } | MarlinResponse::Busy | MarlinResponse::Empty => {}
                // printable noise breaks the run of answers
                _ => self.acks = 0,
            }
            return BaudStep::Continue;
        }
        self.acks += 1;
        if self.acks >= self.required_acks {
            tracing::info!("Baud rate {} accepted", current);
            BaudStep::Accepted(current)
        } else {
            BaudStep::Continue
        }
    }

    /// Feed one read timeout
    pub fn on_timeout(&mut self) -> BaudStep {
        if self.current().is_none() {
            return BaudStep::Exhausted;
        }
        self.timeouts += 1;
        if self.timeouts >= self.timeouts_per_candidate {
            self.advance()
        } else {
            BaudStep::Continue
        }
    }

    fn advance(&mut self) -> BaudStep {
        self.index += 1;
        self.acks = 0;
        self.timeouts = 0;
        match self.current() {
            Some(next) => {
                tracing::debug!("Trying {} baud", next);
                BaudStep::Switch(next)
            }
            None => BaudStep::Exhausted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMP: &[u8] = b"ok T:21.0 /0.0 B:20.5 /0.0 @:0\n";

    #[test]
    fn test_accepts_after_consecutive_temperatures() {
        let mut d = BaudDetector::with_candidates(vec![250000, 115200], 3, 2);
        assert_eq!(d.on_line(TEMP), BaudStep::Continue);
        assert_eq!(d.on_line(b"ok\n"), BaudStep::Continue);
        assert_eq!(d.on_line(TEMP), BaudStep::Continue);
        assert_eq!(d.on_line(TEMP), BaudStep::Accepted(250000));
    }

    #[test]
    fn test_noise_between_answers_is_not_accepted() {
        let mut d = BaudDetector::with_candidates(vec![250000, 115200], 2, 1);
        assert_eq!(d.on_line(TEMP), BaudStep::Continue);
        assert_eq!(d.on_line(b"j~Kq3 zr\n"), BaudStep::Continue);
        assert_eq!(d.on_line(TEMP), BaudStep::Continue);
        assert_eq!(d.on_timeout(), BaudStep::Switch(115200));
    }

    #[test]
    fn test_echo_line_restarts_count() {
        let mut d = BaudDetector::with_candidates(vec![250000], 3, 2);
        assert_eq!(d.on_line(TEMP), BaudStep::Continue);
        assert_eq!(d.on_line(TEMP), BaudStep::Continue);
        assert_eq!(d.on_line(b"echo:SD card ok\n"), BaudStep::Continue);
        assert_eq!(d.on_line(TEMP), BaudStep::Continue);
        assert_eq!(d.on_line(TEMP), BaudStep::Continue);
        assert_eq!(d.on_line(TEMP), BaudStep::Accepted(250000));
    }

    #[test]
    fn test_garbage_moves_on() {
        let mut d = BaudDetector::with_candidates(vec![250000, 115200], 3, 2);
        assert_eq!(d.on_line(&[0xF0, 0x00, 0x8C]), BaudStep::Switch(115200));
        assert_eq!(d.on_line(TEMP), BaudStep::Continue);
        assert_eq!(d.on_line(&[0xFF]), BaudStep::Exhausted);
        assert_eq!(d.attempted(), 2);
    }

    #[test]
    fn test_timeouts_move_on() {
        let mut d = BaudDetector::with_candidates(vec![250000, 115200], 3, 2);
        assert_eq!(d.on_timeout(), BaudStep::Continue);
        assert_eq!(d.on_timeout(), BaudStep::Switch(115200));
        assert_eq!(d.on_timeout(), BaudStep::Continue);
        assert_eq!(d.on_timeout(), BaudStep::Exhausted);
        assert_eq!(d.current(), None);
    }

    #[test]
    fn test_ack_count_resets_per_candidate() {
        let mut d = BaudDetector::with_candidates(vec![250000, 115200], 2, 1);
        assert_eq!(d.on_line(TEMP), BaudStep::Continue);
        assert_eq!(d.on_timeout(), BaudStep::Switch(115200));
        assert_eq!(d.on_line(TEMP), BaudStep::Continue);
        assert_eq!(d.on_line(TEMP), BaudStep::Accepted(115200));
    }
}
