use serde::{Deserialize, Serialize};

use crate::downloader::ResponseInfo;

/// Where an interrupted download left off.
///
/// `byte_offset` is the offset the interrupted transfer started at and
/// `bytes_staged` how many bytes past it were already received, so
/// `byte_offset + bytes_staged` is the next missing byte.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResumableData {
    pub byte_offset: i64,
    pub bytes_staged: i64,
    /// Entity tag or last-modified stamp of the interrupted response. Empty if
    /// the server sent neither.
    pub validator: String,
}

impl ResumableData {
    pub fn new(byte_offset: i64, bytes_staged: i64, validator: impl Into<String>) -> Self {
        Self {
            byte_offset,
            bytes_staged,
            validator: validator.into(),
        }
    }

    /// Fresh start at `offset` with nothing staged.
    pub fn at_offset(offset: i64) -> Self {
        Self::new(offset, 0, String::new())
    }

    /// Snapshot taken when a transfer failed mid-stream.
    ///
    /// Only servers that advertised `Accept-Ranges: bytes` or already answered
    /// with partial content can be resumed.
    pub fn from_failure(byte_offset: i64, response: &ResponseInfo, bytes_staged: i64) -> Option<Self> {
        if !response.supports_range() {
            return None;
        }
        Some(Self::new(byte_offset, bytes_staged, response.validator()))
    }

    pub fn resume_point(&self) -> i64 {
        self.byte_offset + self.bytes_staged
    }

    pub fn range_header(&self) -> String {
        format!("bytes={}-", self.resume_point())
    }

    /// A resume point past the end of the resource cannot be requested.
    pub fn is_valid_for(&self, total_size: i64) -> bool {
        total_size <= 0 || (self.resume_point() >= 0 && self.resume_point() <= total_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(accept_ranges: Option<&str>, etag: Option<&str>, last_modified: Option<&str>) -> ResponseInfo {
        ResponseInfo {
            status: 200,
            content_length: Some(1_000_000),
            total_size: Some(1_000_000),
            accept_ranges: accept_ranges.map(str::to_owned),
            etag: etag.map(str::to_owned),
            last_modified: last_modified.map(str::to_owned),
        }
    }

    #[test]
    fn test_failure_snapshot_with_etag() {
        let info = response(Some("bytes"), Some("\"abc\""), Some("yesterday"));
        let data = ResumableData::from_failure(0, &info, 400_000).unwrap();
        assert_eq!(data, ResumableData::new(0, 400_000, "\"abc\""));
        assert_eq!(data.range_header(), "bytes=400000-");
    }

    #[test]
    fn test_failure_snapshot_keeps_user_offset() {
        let info = response(Some("bytes"), None, Some("Tue, 01 Jan 2019 00:00:00 GMT"));
        let data = ResumableData::from_failure(250_000, &info, 400_000).unwrap();
        assert_eq!(data.validator, "Tue, 01 Jan 2019 00:00:00 GMT");
        assert_eq!(data.resume_point(), 650_000);
        assert!(data.is_valid_for(1_000_000));
    }

    #[test]
    fn test_no_snapshot_without_range_support() {
        assert!(ResumableData::from_failure(0, &response(None, Some("\"abc\""), None), 10).is_none());
        assert!(ResumableData::from_failure(0, &response(Some("none"), None, None), 10).is_none());
    }

    #[test]
    fn test_partial_answer_without_accept_ranges_is_resumable() {
        let mut info = response(None, Some("\"abc\""), None);
        info.status = 206;
        let data = ResumableData::from_failure(500_000, &info, 300_000).unwrap();
        assert_eq!(data.resume_point(), 800_000);
        assert_eq!(data.validator, "\"abc\"");
    }

    #[test]
    fn test_empty_validator() {
        let data = ResumableData::from_failure(0, &response(Some("bytes"), None, None), 10).unwrap();
        assert_eq!(data.validator, "");
    }

    #[test]
    fn test_resume_point_past_end_is_invalid() {
        assert!(!ResumableData::new(900_000, 200_000, "").is_valid_for(1_000_000));
        assert!(ResumableData::new(900_000, 200_000, "").is_valid_for(0));
    }

    #[test]
    fn test_serde_shape() {
        let data = ResumableData::new(1, 2, "\"v\"");
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(json, r#"{"byte_offset":1,"bytes_staged":2,"validator":"\"v\""}"#);
        let back: ResumableData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
    }
}
