//! Text rendering of pool statistics for the introspection sink.

use core::fmt;

/// One sample of a pool's size figures, in bytes.
///
/// The figures are read one at a time without a common lock, so under
/// concurrent allocation `free_size + allocated_size` may briefly differ from
/// `heap_size`.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct PoolStats {
    pub heap_size: usize,
    pub free_size: usize,
    pub allocated_size: usize,
    pub allocated_peak: usize,
    pub largest_free_buf: usize,
}

impl PoolStats {
    /// Percentage of free space outside the largest free run.
    ///
    /// `None` when nothing is free.
    #[must_use]
    pub const fn fragmentation(&self) -> Option<usize> {
        if self.free_size == 0 {
            return None;
        }
        let scattered = self.free_size.saturating_sub(self.largest_free_buf);
        Some(scattered.saturating_mul(100) / self.free_size)
    }

    /// Write one right-aligned row per figure.
    ///
    /// # Errors
    /// Only errors from `out`.
    pub fn write_rows(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        write_row(out, "heap size", self.heap_size)?;
        write_row(out, "free size", self.free_size)?;
        write_row(out, "allocated size", self.allocated_size)?;
        write_row(out, "allocated peak", self.allocated_peak)?;
        write_row(out, "largest free buffer", self.largest_free_buf)?;
        match self.fragmentation() {
            Some(frag) => write_row(out, "heap fragmentation", frag),
            None => write_row(out, "heap fragmentation", "undefined"),
        }
    }
}

fn write_row(out: &mut dyn fmt::Write, label: &str, value: impl fmt::Display) -> fmt::Result {
    writeln!(out, "{label:>19} {value:>19}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragmentation_is_share_outside_largest_run() {
        let stats = PoolStats {
            free_size: 1000,
            largest_free_buf: 400,
            ..PoolStats::default()
        };
        assert_eq!(stats.fragmentation(), Some(60));
    }

    #[test]
    fn fragmentation_is_undefined_without_free_space() {
        let stats = PoolStats {
            heap_size: 4096,
            allocated_size: 4096,
            ..PoolStats::default()
        };
        assert_eq!(stats.fragmentation(), None);

        let mut out = String::new();
        stats.write_rows(&mut out).unwrap();
        assert!(out.ends_with(&format!("{:>19} {:>19}\n", "heap fragmentation", "undefined")));
    }

    #[test]
    fn rows_are_right_aligned_in_two_columns() {
        let stats = PoolStats {
            heap_size: 8192,
            free_size: 8192,
            allocated_size: 0,
            allocated_peak: 4096,
            largest_free_buf: 8192,
        };
        let mut out = String::new();
        stats.write_rows(&mut out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "          heap size                8192");
        assert_eq!(lines[3], "     allocated peak                4096");
        assert_eq!(lines[5], " heap fragmentation                   0");
        assert!(lines.iter().all(|l| l.len() == 39));
    }
}
