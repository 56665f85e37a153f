//! Byte/time offset arithmetic for a partially downloaded file.
//!
//! Everything here is a pure function of [`StreamPosition`]. Percentages are
//! fractions of the payload, i.e. the file without its header prelude.

/// Where a percent seek should land.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekTarget {
    /// Inside the downloaded window: seek the reader to `time`, measured from
    /// the current download offset.
    Within { time: f64 },
    /// Outside the window: the download has to restart at `byte_offset`.
    Outside { byte_offset: i64 },
}

/// Downloaded window as payload fractions `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadedWindow {
    pub start: f64,
    pub end: f64,
}

impl DownloadedWindow {
    pub fn width(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, percent: f64) -> bool {
        percent >= self.start && percent <= self.end
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamPosition {
    /// Byte the current download started at
    pub offset: i64,
    /// Container prelude excluded from bitrate math
    pub header_size: i64,
    /// Bytes downloaded past `offset`
    pub has_bytes: i64,
    pub total_size: i64,
    /// Bits per second, zero while unknown
    pub estimated_bitrate: f64,
}

impl StreamPosition {
    /// Payload size, never below zero.
    pub fn payload_size(&self) -> i64 {
        (self.total_size - self.header_size).max(0)
    }

    /// Playback time the current offset corresponds to.
    pub fn time_offset(&self) -> f64 {
        if self.estimated_bitrate > 0.0 && self.offset != 0 {
            let time = ((self.offset - self.header_size) * 8) as f64 / self.estimated_bitrate;
            if time.is_finite() {
                return time.max(0.0);
            }
        }
        0.0
    }

    /// Move the download restart point. Staged bytes are dropped.
    pub fn set_offset(&mut self, offset: i64) {
        self.offset = offset.max(0);
        self.has_bytes = 0;
    }

    pub fn set_header_size(&mut self, header_size: i64, duration: f64) {
        self.header_size = header_size.max(0);
        self.recompute_bitrate(duration);
    }

    /// Record a new total size and re-estimate the bitrate from `duration`.
    pub fn set_total_size(&mut self, total_size: i64, duration: f64) {
        self.total_size = total_size.max(0);
        self.recompute_bitrate(duration);
    }

    /// Account for a delivered chunk. The total grows if the server under-reported it.
    pub fn add_bytes(&mut self, bytes: i64, duration: f64) {
        self.has_bytes += bytes.max(0);
        if self.has_bytes > self.total_size {
            self.set_total_size(self.has_bytes, duration);
        }
    }

    fn recompute_bitrate(&mut self, duration: f64) {
        let bitrate = (self.payload_size() * 8) as f64 / duration;
        self.estimated_bitrate = if bitrate.is_finite() && bitrate > 0.0 {
            bitrate
        } else {
            0.0
        };
    }

    /// `header_size + floor(payload * p)`.
    pub fn percent_to_byte_offset(&self, percent: f64) -> i64 {
        self.header_size + (self.payload_size() as f64 * percent).floor() as i64
    }

    pub fn downloaded_window(&self) -> Option<DownloadedWindow> {
        let payload = self.payload_size();
        if payload == 0 {
            return None;
        }
        let start = (self.offset - self.header_size).max(0) as f64 / payload as f64;
        let width = self.has_bytes as f64 / payload as f64;
        Some(DownloadedWindow {
            start,
            end: start + width,
        })
    }

    /// Map `percent` onto `[0, has_duration]` when it lies in the downloaded
    /// window, else name the byte the download must restart at.
    pub fn byte_window_to_time(&self, percent: f64, has_duration: f64) -> SeekTarget {
        if let Some(window) = self.downloaded_window()
            && window.contains(percent)
        {
            let width = window.width();
            let time = if width > 0.0 {
                (percent - window.start) / width * has_duration
            } else {
                0.0
            };
            return SeekTarget::Within { time };
        }
        SeekTarget::Outside {
            byte_offset: self.percent_to_byte_offset(percent),
        }
    }

    /// Inverse of [`Self::byte_window_to_time`] for a time inside the window.
    pub fn time_to_percent(&self, time: f64, has_duration: f64) -> Option<f64> {
        let window = self.downloaded_window()?;
        if has_duration <= 0.0 {
            return None;
        }
        Some(window.start + time / has_duration * window.width())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(offset: i64, header_size: i64, has_bytes: i64, total_size: i64) -> StreamPosition {
        StreamPosition {
            offset,
            header_size,
            has_bytes,
            total_size,
            estimated_bitrate: 0.0,
        }
    }

    #[test]
    fn test_seek_inside_downloaded_window() {
        let pos = position(0, 0, 200_000, 1_000_000);
        assert_eq!(pos.byte_window_to_time(0.1, 100.0), SeekTarget::Within { time: 50.0 });
    }

    #[test]
    fn test_seek_outside_window_restarts_download() {
        let pos = position(0, 0, 200_000, 1_000_000);
        assert_eq!(
            pos.byte_window_to_time(0.5, 100.0),
            SeekTarget::Outside { byte_offset: 500_000 }
        );

        let pos = position(1_000, 1_000, 0, 101_000);
        assert_eq!(pos.percent_to_byte_offset(0.25), 26_000);
    }

    #[test]
    fn test_window_starts_at_offset() {
        let pos = position(600_000, 0, 100_000, 1_000_000);
        let window = pos.downloaded_window().unwrap();
        assert!((window.start - 0.6).abs() < 1e-12);
        assert!((window.end - 0.7).abs() < 1e-12);
        assert!(matches!(pos.byte_window_to_time(0.5, 10.0), SeekTarget::Outside { .. }));
        match pos.byte_window_to_time(0.65, 10.0) {
            SeekTarget::Within { time } => assert!((time - 5.0).abs() < 1e-9),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_round_trip_inside_window() {
        let mut pos = position(0, 4_096, 0, 0);
        pos.set_total_size(3_004_096, 187.5);
        pos.set_offset(754_096);
        pos.add_bytes(1_200_000, 187.5);
        let has_duration = 75.0;

        for p in [0.25, 0.3, 0.4, 0.5, 0.6, 0.64] {
            let SeekTarget::Within { time } = pos.byte_window_to_time(p, has_duration) else {
                panic!("{p} should be inside the window");
            };
            let back = pos.time_to_percent(time, has_duration).unwrap();
            let diff = pos.percent_to_byte_offset(back) - pos.percent_to_byte_offset(p);
            assert!(diff.abs() <= 1, "p={p} diff={diff}");
        }
    }

    #[test]
    fn test_bitrate_and_time_offset() {
        let mut pos = StreamPosition::default();
        pos.set_total_size(1_000_000, 100.0);
        assert!((pos.estimated_bitrate - 80_000.0).abs() < 1e-9);

        pos.set_offset(500_000);
        assert!((pos.time_offset() - 50.0).abs() < 1e-9);

        pos.set_offset(0);
        assert_eq!(pos.time_offset(), 0.0);
    }

    #[test]
    fn test_bitrate_is_never_non_finite() {
        let mut pos = StreamPosition::default();
        pos.set_total_size(1_000_000, 0.0);
        assert_eq!(pos.estimated_bitrate, 0.0);
        pos.set_offset(10);
        assert_eq!(pos.time_offset(), 0.0);

        pos.set_total_size(1_000_000, f64::NAN);
        assert_eq!(pos.estimated_bitrate, 0.0);
    }

    #[test]
    fn test_has_bytes_grows_total_size() {
        let mut pos = StreamPosition::default();
        pos.set_total_size(100, 1.0);
        pos.add_bytes(150, 1.0);
        assert_eq!(pos.total_size, 150);
        assert!((pos.estimated_bitrate - 1_200.0).abs() < 1e-9);
    }

    #[test]
    fn test_offset_change_drops_staged_bytes() {
        let mut pos = position(0, 0, 200_000, 1_000_000);
        pos.set_offset(300_000);
        assert_eq!(pos.has_bytes, 0);
        assert!(pos.downloaded_window().unwrap().width() == 0.0);
    }

    #[test]
    fn test_unknown_size_has_no_window() {
        let pos = StreamPosition::default();
        assert!(pos.downloaded_window().is_none());
        assert_eq!(
            pos.byte_window_to_time(0.5, 10.0),
            SeekTarget::Outside { byte_offset: 0 }
        );
    }
}
