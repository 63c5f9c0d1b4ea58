use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Group key used for records that arrive without one.
pub const UNKNOWN_GROUP: &str = "UNKNOWN";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeRangeError {
    #[error("Invalid timestamp: {value}")]
    InvalidTimestamp { value: String },

    #[error("Invalid time range format (expected 'start - end'): {value}")]
    InvalidFormat { value: String },

    #[error("End time must be greater than start time: {value}")]
    EmptyRange { value: String },
}

/// Declared content type of a video, as labelled in the input batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContentType {
    Audio,
    Video,
    MidiKaraoke,
    MvKaraoke,
}

/// Coarse family used when comparisons are restricted to like-for-like content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentFamily {
    Audio,
    Karaoke,
    Video,
}

impl ContentType {
    /// Parse a free-form label. Unknown labels are treated as regular video.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_lowercase();
        match label.as_str() {
            "audio" | "âm thanh" => ContentType::Audio,
            "midikaraoke" | "midi_karaoke" => ContentType::MidiKaraoke,
            "mvkaraoke" | "mv_karaoke" => ContentType::MvKaraoke,
            l if l.contains("midi") => ContentType::MidiKaraoke,
            l if l.contains("karaoke") || l.contains("lyric") => ContentType::MvKaraoke,
            _ => ContentType::Video,
        }
    }

    pub fn family(self) -> ContentFamily {
        match self {
            ContentType::Audio => ContentFamily::Audio,
            ContentType::MidiKaraoke | ContentType::MvKaraoke => ContentFamily::Karaoke,
            ContentType::Video => ContentFamily::Video,
        }
    }

    pub fn is_audio(self) -> bool {
        self == ContentType::Audio
    }

    pub fn is_karaoke(self) -> bool {
        self.family() == ContentFamily::Karaoke
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ContentType::Audio => "Audio",
            ContentType::Video => "Video",
            ContentType::MidiKaraoke => "Midi Karaoke",
            ContentType::MvKaraoke => "MV Karaoke",
        };
        f.write_str(label)
    }
}

impl From<String> for ContentType {
    fn from(value: String) -> Self {
        ContentType::from_label(&value)
    }
}

impl From<ContentType> for String {
    fn from(value: ContentType) -> Self {
        value.to_string()
    }
}

/// Portion of the source that was analyzed, in seconds from the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentBounds {
    pub start_secs: u32,
    pub end_secs: Option<u32>,
}

impl SegmentBounds {
    pub fn duration_secs(&self) -> Option<u32> {
        self.end_secs.map(|end| end.saturating_sub(self.start_secs))
    }

    /// Parse `"start - end"` where each side is `HH:MM:SS`, `MM:SS` or plain seconds.
    ///
    /// An all-zero range (`"00:00:00 - 00:00:00"`) means the whole video and
    /// yields `None`.
    pub fn parse(range: &str) -> Result<Option<Self>, TimeRangeError> {
        let normalized = range.trim();
        if normalized.is_empty() {
            return Ok(None);
        }

        let parts: Vec<&str> = normalized.split('-').map(str::trim).collect();
        if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(TimeRangeError::InvalidFormat {
                value: normalized.to_string(),
            });
        }

        let start = parse_timestamp(parts[0])?;
        let end = parse_timestamp(parts[1])?;

        if start == 0 && end == 0 {
            return Ok(None);
        }
        if end <= start {
            return Err(TimeRangeError::EmptyRange {
                value: normalized.to_string(),
            });
        }

        Ok(Some(SegmentBounds {
            start_secs: start,
            end_secs: Some(end),
        }))
    }
}

/// Parse `HH:MM:SS`, `MM:SS` or `SS` into seconds.
pub fn parse_timestamp(timestamp: &str) -> Result<u32, TimeRangeError> {
    let invalid = || TimeRangeError::InvalidTimestamp {
        value: timestamp.to_string(),
    };

    let fields: Vec<u32> = timestamp
        .trim()
        .split(':')
        .map(|part| part.trim().parse::<u32>().map_err(|_| invalid()))
        .collect::<Result<_, _>>()?;

    let (h, m, s) = match fields.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => (0, *m, *s),
        [s] => (0, 0, *s),
        _ => return Err(invalid()),
    };

    let total = u64::from(h) * 3600 + u64::from(m) * 60 + u64::from(s);
    u32::try_from(total).map_err(|_| invalid())
}

/// Format seconds as `HH:MM:SS`.
pub fn format_timestamp(seconds: u32) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// One input video. Never mutated by the detection core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawVideoRecord")]
pub struct VideoRecord {
    pub id: String,
    pub title: Option<String>,
    pub upload_date: Option<NaiveDate>,
    pub content_type: ContentType,
    pub segment: Option<SegmentBounds>,
    pub group: Option<String>,
    pub singer_count: Option<u32>,
}

/// Wire form of [`VideoRecord`]; the upload date is resolved once the id is known.
#[derive(Deserialize)]
struct RawVideoRecord {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    upload_date: Option<String>,
    content_type: ContentType,
    #[serde(default, deserialize_with = "deserialize_segment")]
    segment: Option<SegmentBounds>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    singer_count: Option<u32>,
}

impl From<RawVideoRecord> for VideoRecord {
    fn from(raw: RawVideoRecord) -> Self {
        let upload_date = raw
            .upload_date
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .and_then(|value| {
                let parsed = parse_upload_date(value);
                if parsed.is_none() {
                    log::warn!("Unrecognized upload date {:?} for video {}", value, raw.id);
                }
                parsed
            });

        Self {
            id: raw.id,
            title: raw.title,
            upload_date,
            content_type: raw.content_type,
            segment: raw.segment,
            group: raw.group,
            singer_count: raw.singer_count,
        }
    }
}

impl VideoRecord {
    pub fn new(
        id: impl Into<String>,
        upload_date: Option<NaiveDate>,
        content_type: ContentType,
    ) -> Self {
        Self {
            id: id.into(),
            title: None,
            upload_date,
            content_type,
            segment: None,
            group: None,
            singer_count: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_singer_count(mut self, count: u32) -> Self {
        self.singer_count = Some(count);
        self
    }

    pub fn group_key(&self) -> &str {
        self.group
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .unwrap_or(UNKNOWN_GROUP)
    }
}

/// Order two upload dates so that known dates come before missing ones.
pub fn compare_upload_dates(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Accepts yt-dlp style `YYYYMMDD` as well as ISO `YYYY-MM-DD`.
pub fn parse_upload_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .ok()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSegment {
    Text(String),
    Bounds {
        start_secs: u32,
        #[serde(default)]
        end_secs: Option<u32>,
    },
}

fn deserialize_segment<'de, D>(deserializer: D) -> Result<Option<SegmentBounds>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawSegment>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawSegment::Text(text)) => {
            SegmentBounds::parse(&text).map_err(serde::de::Error::custom)
        }
        Some(RawSegment::Bounds {
            start_secs,
            end_secs,
        }) => Ok(Some(SegmentBounds {
            start_secs,
            end_secs,
        })),
    }
}
