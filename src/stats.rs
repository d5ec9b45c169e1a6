use std::time::Instant;

use tracing::info;

/// Receive-side counters for sequence-numbered test frames.
#[derive(Debug, Clone)]
pub struct Stats {
    pub ok: u64,
    pub lost: u64,
    pub bytes: u64,
    /// Frames too short to carry a sequence byte.
    pub runt: u64,
    expect: Option<u8>,
    t0: Instant,
    last: Instant,
    window_bytes: u64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            ok: 0,
            lost: 0,
            bytes: 0,
            runt: 0,
            expect: None,
            t0: Instant::now(),
            last: Instant::now(),
            window_bytes: 0,
        }
    }

    /// Account one received payload; byte 0 is the sender's wrapping counter.
    /// Returns the number of frames missing before this one.
    pub fn record(&mut self, payload: &[u8], wire_len: usize) -> u64 {
        self.bytes += wire_len as u64;
        self.window_bytes += wire_len as u64;
        let Some(&seq) = payload.first() else {
            self.runt += 1;
            return 0;
        };
        self.ok += 1;
        let gap = match self.expect {
            Some(e) => u64::from(seq.wrapping_sub(e)),
            None => 0,
        };
        self.lost += gap;
        self.expect = Some(seq.wrapping_add(1));
        gap
    }

    pub fn maybe_log(&mut self, interval_s: f64) {
        if self.last.elapsed().as_secs_f64() >= interval_s {
            let dur = self.t0.elapsed().as_secs_f64().max(1e-3);
            let rate = (self.window_bytes as f64) / dur;
            info!(
                ok = self.ok,
                lost = self.lost,
                runt = self.runt,
                bytes = self.bytes,
                "rx {:.1} kB/s ({:.0} bps) over {:.1}s",
                rate / 1000.0,
                rate * 8.0,
                dur
            );
            self.last = Instant::now();
            self.t0 = Instant::now();
            self.window_bytes = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_gaps_across_wrap() {
        let mut s = Stats::new();
        assert_eq!(s.record(&[254, 0], 60), 0);
        assert_eq!(s.record(&[255, 0], 60), 0);
        assert_eq!(s.record(&[0, 0], 60), 0);
        assert_eq!(s.record(&[3, 0], 60), 2);
        assert_eq!(s.ok, 4);
        assert_eq!(s.lost, 2);
        assert_eq!(s.bytes, 240);
    }

    #[test]
    fn repeated_sequence_counts_as_wrap_loss() {
        let mut s = Stats::new();
        s.record(&[10], 60);
        // a duplicate looks like 255 missing frames, as a mod-256 counter must
        assert_eq!(s.record(&[10], 60), 255);
    }

    #[test]
    fn empty_payload_is_runt() {
        let mut s = Stats::new();
        assert_eq!(s.record(&[], 14), 0);
        assert_eq!(s.runt, 1);
        assert_eq!(s.ok, 0);
    }
}
