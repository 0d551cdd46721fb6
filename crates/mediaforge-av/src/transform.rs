//! Validated transformation requests and the ffmpeg arguments built from them.
//!
//! Raw request parameters arrive as string pairs. [`Transformation::from_params`]
//! turns them into typed values and rejects anything outside the allow-lists,
//! so [`Transformation::build_args`] only ever emits flags chosen here and
//! values that were parsed or checked character by character. Every value is
//! a single argv element; no shell is involved.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use mediaforge_common::paths::extension_of;
use mediaforge_common::{Error, MediaKind, Result};
use serde::{Deserialize, Serialize};

/// Longest overlay text accepted, in characters.
pub const MAX_OVERLAY_TEXT_CHARS: usize = 120;

/// Longest metadata tag value accepted, in characters.
pub const MAX_METADATA_VALUE_CHARS: usize = 256;

/// Overlay font size used when none is given.
pub const DEFAULT_FONT_SIZE: u32 = 20;

const FONT_SIZE_RANGE: std::ops::RangeInclusive<u32> = 8..=200;

/// Punctuation allowed in overlay text besides letters, digits and spaces.
///
/// Filter-graph metacharacters (`' \ : , ; [ ] = %` and braces) are absent,
/// so accepted text needs no escaping inside the drawtext filter.
const OVERLAY_PUNCTUATION: &str = "@#.!?-_+&()/*~$";

/// Characters that would break out of a quoted filter option value.
const FILTER_METACHARACTERS: &[char] = &['\'', '\\', ':', ',', ';', '[', ']', '='];

/// Requested transformation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Re-encode into another container/codec.
    Transcode,
    /// Cut a time range.
    Trim,
    /// Crop to portrait and draw moving text over the video.
    OverlayText,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transcode => "transcode",
            Self::Trim => "trim",
            Self::OverlayText => "overlay_text",
        }
    }

    /// Parameter names this operation accepts besides `format` and metadata.
    fn specific_params(self) -> &'static [&'static str] {
        match self {
            Self::Transcode => &[],
            Self::Trim => &["start", "end"],
            Self::OverlayText => &["text", "font", "font_size", "font_color"],
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transcode" => Ok(Self::Transcode),
            "trim" => Ok(Self::Trim),
            "overlay_text" => Ok(Self::OverlayText),
            other => Err(Error::validation(format!(
                "unknown operation '{other}' (expected one of: transcode, trim, overlay_text)"
            ))),
        }
    }
}

/// Output container/format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    Mov,
    Mkv,
    Webm,
    Mp3,
    Wav,
    Aac,
    M4a,
    Flac,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 9] = [
        Self::Mp4,
        Self::Mov,
        Self::Mkv,
        Self::Webm,
        Self::Mp3,
        Self::Wav,
        Self::Aac,
        Self::M4a,
        Self::Flac,
    ];

    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::Mkv => "mkv",
            Self::Webm => "webm",
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Aac => "aac",
            Self::M4a => "m4a",
            Self::Flac => "flac",
        }
    }

    /// Whether the format holds audio only.
    pub fn is_audio(self) -> bool {
        matches!(
            self,
            Self::Mp3 | Self::Wav | Self::Aac | Self::M4a | Self::Flac
        )
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.extension().eq_ignore_ascii_case(ext))
    }

    fn video_codec_args(self) -> &'static [&'static str] {
        match self {
            Self::Webm => &["-c:v", "libvpx-vp9", "-deadline", "realtime", "-cpu-used", "8"],
            _ => &["-c:v", "libx264", "-preset", "ultrafast"],
        }
    }

    /// Audio codec used when this format is the output container.
    fn audio_codec(self, input_ext: Option<&str>) -> &'static str {
        if input_ext == Some(self.extension()) {
            return "copy";
        }
        match self {
            Self::Mp4 | Self::Mov | Self::Aac | Self::M4a => "aac",
            Self::Mkv => "copy",
            Self::Webm => "libopus",
            Self::Mp3 => "libmp3lame",
            Self::Wav => "pcm_s16le",
            Self::Flac => "flac",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().trim_start_matches('.');
        Self::from_extension(wanted).ok_or_else(|| {
            let known: Vec<&str> = Self::ALL.iter().map(|f| f.extension()).collect();
            Error::validation(format!(
                "unsupported format '{s}' (expected one of: {})",
                known.join(", ")
            ))
        })
    }
}

/// A non-negative media timestamp with millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp {
    millis: u64,
}

impl Timestamp {
    pub fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    pub fn as_millis(self) -> u64 {
        self.millis
    }

    /// `HH:MM:SS.mmm`, the only form passed to ffmpeg.
    pub fn to_ffmpeg(self) -> String {
        let ms = self.millis % 1000;
        let total_secs = self.millis / 1000;
        format!(
            "{:02}:{:02}:{:02}.{:03}",
            total_secs / 3600,
            (total_secs / 60) % 60,
            total_secs % 60,
            ms
        )
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ffmpeg())
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    /// Accepts `SS[.fff]`, `MM:SS[.fff]` and `HH:MM:SS[.fff]`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            Error::validation(format!(
                "invalid timestamp '{s}' (expected SS[.ms], MM:SS[.ms] or HH:MM:SS[.ms])"
            ))
        };

        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(invalid());
        }

        let (last, leading) = parts.split_last().ok_or_else(invalid)?;
        let (secs_str, frac_str) = match last.split_once('.') {
            Some((secs, frac)) => (secs, Some(frac)),
            None => (*last, None),
        };

        let digits = |p: &str| -> Option<u64> {
            if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            p.parse().ok()
        };

        let secs = digits(secs_str).ok_or_else(invalid)?;
        let frac_ms = match frac_str {
            None => 0,
            Some(f) if f.len() <= 3 => {
                let value = digits(f).ok_or_else(invalid)?;
                value * 10u64.pow(3 - f.len() as u32)
            }
            Some(_) => return Err(invalid()),
        };

        let mut fields = Vec::with_capacity(leading.len());
        for p in leading {
            fields.push(digits(p).ok_or_else(invalid)?);
        }

        let total_secs = match fields.as_slice() {
            [] => Some(secs),
            [m] if secs < 60 => m.checked_mul(60).and_then(|v| v.checked_add(secs)),
            [h, m] if secs < 60 && *m < 60 => h
                .checked_mul(3600)
                .and_then(|v| v.checked_add(m * 60 + secs)),
            _ => None,
        }
        .ok_or_else(invalid)?;

        let millis = total_secs
            .checked_mul(1000)
            .and_then(|v| v.checked_add(frac_ms))
            .ok_or_else(invalid)?;
        Ok(Self { millis })
    }
}

/// Overlay text color, limited to named colors ffmpeg understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontColor {
    White,
    Black,
    Gray,
    Yellow,
    Red,
    Green,
    Blue,
}

impl FontColor {
    const ALL: [FontColor; 7] = [
        Self::White,
        Self::Black,
        Self::Gray,
        Self::Yellow,
        Self::Red,
        Self::Green,
        Self::Blue,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Black => "black",
            Self::Gray => "gray",
            Self::Yellow => "yellow",
            Self::Red => "red",
            Self::Green => "green",
            Self::Blue => "blue",
        }
    }
}

impl FromStr for FontColor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|c| c.as_str()).collect();
                Error::validation(format!(
                    "unsupported font_color '{s}' (expected one of: {})",
                    known.join(", ")
                ))
            })
    }
}

/// Drawtext settings for [`Operation::OverlayText`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayStyle {
    pub text: String,
    /// Name of a configured font; `None` selects the default font.
    pub font: Option<String>,
    pub font_size: u32,
    pub color: FontColor,
}

/// Container metadata tags that may be set on the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataKey {
    Title,
    Artist,
    Album,
    Genre,
    Year,
    Comment,
    Copyright,
}

impl MetadataKey {
    pub const ALL: [MetadataKey; 7] = [
        Self::Title,
        Self::Artist,
        Self::Album,
        Self::Genre,
        Self::Year,
        Self::Comment,
        Self::Copyright,
    ];

    /// Request parameter name.
    pub fn param(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Artist => "artist",
            Self::Album => "album",
            Self::Genre => "genre",
            Self::Year => "year",
            Self::Comment => "comment",
            Self::Copyright => "copyright",
        }
    }

    /// Tag name written by ffmpeg.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Title => "TITLE",
            Self::Artist => "ARTIST",
            Self::Album => "ALBUM",
            Self::Genre => "GENRE",
            Self::Year => "YEAR",
            Self::Comment => "COMMENT",
            Self::Copyright => "COPYRIGHT",
        }
    }

    fn from_param(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.param() == name)
    }
}

/// Operation-specific part of a [`Transformation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum TransformKind {
    Transcode,
    Trim {
        start: Timestamp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<Timestamp>,
    },
    OverlayText(OverlayStyle),
}

/// A fully validated transformation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformation {
    #[serde(flatten)]
    pub kind: TransformKind,
    /// Requested output format; chosen from the input when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<MetadataKey, String>,
}

impl Transformation {
    /// A plain transcode with default output selection.
    pub fn transcode(format: Option<OutputFormat>) -> Self {
        Self {
            kind: TransformKind::Transcode,
            format,
            metadata: BTreeMap::new(),
        }
    }

    pub fn operation(&self) -> Operation {
        match self.kind {
            TransformKind::Transcode => Operation::Transcode,
            TransformKind::Trim { .. } => Operation::Trim,
            TransformKind::OverlayText(_) => Operation::OverlayText,
        }
    }

    /// Parse and validate raw request parameters for `operation`.
    ///
    /// Empty values count as absent. Unknown parameter names are rejected.
    ///
    /// ```
    /// use std::collections::BTreeMap;
    /// use mediaforge_av::{Operation, Transformation};
    ///
    /// let mut params = BTreeMap::new();
    /// params.insert("start".to_string(), "00:01:05".to_string());
    /// params.insert("end".to_string(), "90.5".to_string());
    /// let t = Transformation::from_params("trim", &params).unwrap();
    /// assert_eq!(t.operation(), Operation::Trim);
    ///
    /// params.insert("format".to_string(), "not-a-format".to_string());
    /// assert!(Transformation::from_params("trim", &params).is_err());
    /// ```
    pub fn from_params(operation: &str, params: &BTreeMap<String, String>) -> Result<Self> {
        let operation: Operation = operation.parse()?;

        for (name, value) in params {
            let known = name == "format"
                || MetadataKey::from_param(name).is_some()
                || operation.specific_params().contains(&name.as_str());
            if !known {
                return Err(Error::validation(format!(
                    "unknown parameter '{name}' for {operation}"
                )));
            }
            if value.chars().any(char::is_control) {
                return Err(Error::validation(format!(
                    "parameter '{name}' contains control characters"
                )));
            }
        }

        let get = |name: &str| {
            params
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let format = get("format").map(str::parse::<OutputFormat>).transpose()?;

        let mut metadata = BTreeMap::new();
        for key in MetadataKey::ALL {
            if let Some(value) = get(key.param()) {
                if value.chars().count() > MAX_METADATA_VALUE_CHARS {
                    return Err(Error::validation(format!(
                        "{} is longer than {MAX_METADATA_VALUE_CHARS} characters",
                        key.param()
                    )));
                }
                metadata.insert(key, value.to_string());
            }
        }

        let kind = match operation {
            Operation::Transcode => TransformKind::Transcode,
            Operation::Trim => {
                let start: Timestamp = get("start")
                    .ok_or_else(|| Error::validation("trim requires 'start'"))?
                    .parse()?;
                let end = get("end").map(str::parse::<Timestamp>).transpose()?;
                if let Some(end) = end {
                    if end <= start {
                        return Err(Error::validation(format!(
                            "trim end ({end}) must be after start ({start})"
                        )));
                    }
                }
                TransformKind::Trim { start, end }
            }
            Operation::OverlayText => {
                if let Some(f) = format {
                    if !matches!(f, OutputFormat::Mp4 | OutputFormat::Mov | OutputFormat::Mkv) {
                        return Err(Error::validation(format!(
                            "overlay_text cannot produce '{f}' (use mp4, mov or mkv)"
                        )));
                    }
                }
                let text = get("text")
                    .ok_or_else(|| Error::validation("overlay_text requires 'text'"))?;
                TransformKind::OverlayText(OverlayStyle {
                    text: validate_overlay_text(text)?,
                    font: get("font").map(validate_font_name).transpose()?,
                    font_size: get("font_size")
                        .map(parse_font_size)
                        .transpose()?
                        .unwrap_or(DEFAULT_FONT_SIZE),
                    color: get("font_color")
                        .map(str::parse::<FontColor>)
                        .transpose()?
                        .unwrap_or(FontColor::Gray),
                })
            }
        };

        Ok(Self {
            kind,
            format,
            metadata,
        })
    }

    /// Output format for an input of the given kind and extension.
    ///
    /// Video inputs default to mp4. Audio-only inputs keep their audio
    /// extension, falling back to mp3.
    pub fn output_format(&self, media: MediaKind, input_ext: Option<&str>) -> OutputFormat {
        if let Some(format) = self.format {
            return format;
        }
        match media {
            MediaKind::Video => OutputFormat::Mp4,
            MediaKind::Audio => input_ext
                .and_then(OutputFormat::from_extension)
                .filter(|f| f.is_audio())
                .unwrap_or(OutputFormat::Mp3),
        }
    }

    /// Build the ffmpeg argument vector (without the program name).
    ///
    /// `font_file` is required for [`Operation::OverlayText`].
    pub fn build_args(
        &self,
        input: &Path,
        output: &Path,
        media: MediaKind,
        format: OutputFormat,
        font_file: Option<&Path>,
    ) -> Result<Vec<String>> {
        let input_ext = extension_of(input);
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-y"]
            .into_iter()
            .map(String::from)
            .collect();

        if let TransformKind::Trim { start, .. } = &self.kind {
            args.extend(["-ss".to_string(), start.to_ffmpeg()]);
        }
        args.extend(["-i".to_string(), path_arg(input)]);
        if let TransformKind::Trim {
            start,
            end: Some(end),
        } = &self.kind
        {
            let length = Timestamp::from_millis(end.as_millis() - start.as_millis());
            args.extend(["-t".to_string(), length.to_ffmpeg()]);
        }

        match &self.kind {
            TransformKind::OverlayText(style) => {
                if media == MediaKind::Audio {
                    return Err(Error::validation(
                        "overlay_text requires an input with a video stream",
                    ));
                }
                let font = font_file
                    .ok_or_else(|| Error::validation("no font file configured for overlay_text"))?;
                args.push("-filter_complex".to_string());
                args.push(overlay_filter(style, font)?);
                push_all(&mut args, &["-map", "[v]", "-map", "0:a?"]);
                push_all(&mut args, format.video_codec_args());
                args.extend(["-c:a".to_string(), format.audio_codec(input_ext.as_deref()).to_string()]);
            }
            TransformKind::Transcode | TransformKind::Trim { .. } => {
                if media == MediaKind::Video && !format.is_audio() {
                    push_all(&mut args, format.video_codec_args());
                } else {
                    args.push("-vn".to_string());
                }
                args.extend(["-c:a".to_string(), format.audio_codec(input_ext.as_deref()).to_string()]);
            }
        }

        for (key, value) in &self.metadata {
            args.push("-metadata".to_string());
            args.push(format!("{}={}", key.tag(), value));
        }

        args.push(path_arg(output));
        Ok(args)
    }
}

fn push_all(args: &mut Vec<String>, flags: &[&str]) {
    args.extend(flags.iter().map(|s| s.to_string()));
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn validate_overlay_text(text: &str) -> Result<String> {
    if text.chars().count() > MAX_OVERLAY_TEXT_CHARS {
        return Err(Error::validation(format!(
            "overlay text is longer than {MAX_OVERLAY_TEXT_CHARS} characters"
        )));
    }
    if let Some(bad) = text
        .chars()
        .find(|&c| !(c.is_alphanumeric() || c == ' ' || OVERLAY_PUNCTUATION.contains(c)))
    {
        return Err(Error::validation(format!(
            "overlay text contains unsupported character {bad:?}"
        )));
    }
    Ok(text.to_string())
}

fn validate_font_name(name: &str) -> Result<String> {
    let ok = name.len() <= 64
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_');
    if ok {
        Ok(name.to_string())
    } else {
        Err(Error::validation(format!("invalid font name '{name}'")))
    }
}

fn parse_font_size(raw: &str) -> Result<u32> {
    raw.parse::<u32>()
        .ok()
        .filter(|size| FONT_SIZE_RANGE.contains(size))
        .ok_or_else(|| {
            Error::validation(format!(
                "font_size must be an integer between {} and {}",
                FONT_SIZE_RANGE.start(),
                FONT_SIZE_RANGE.end()
            ))
        })
}

/// Check that a font path can be embedded in a filter option value.
pub fn check_font_path(path: &Path) -> Result<&str> {
    let s = path
        .to_str()
        .ok_or_else(|| Error::validation(format!("font path {} is not UTF-8", path.display())))?;
    if s.is_empty() || s.contains(FILTER_METACHARACTERS) || s.chars().any(char::is_control) {
        return Err(Error::validation(format!(
            "font path '{s}' contains characters not allowed in a filter graph"
        )));
    }
    Ok(s)
}

/// Center-crop to 9:16, scale to 720x1280, then draw text bouncing vertically.
fn overlay_filter(style: &OverlayStyle, font_file: &Path) -> Result<String> {
    let font = check_font_path(font_file)?;
    Ok(format!(
        "[0:v]crop=min(iw\\,ih*9/16):min(ih\\,iw*16/9),scale=720:1280,\
         drawtext=fontfile='{font}':fontsize={size}:fontcolor={color}:\
         x=(w-text_w)/2:y=abs(mod(t*100\\,2*(h-text_h))-(h-text_h)):\
         text='{text}'[v]",
        size = style.font_size,
        color = style.color.as_str(),
        text = style.text,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn validation_message(err: Error) -> String {
        match err {
            Error::Validation(msg) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    // ---- Timestamps ----

    #[test]
    fn timestamp_forms() {
        let ms = |s: &str| s.parse::<Timestamp>().unwrap().as_millis();
        assert_eq!(ms("0"), 0);
        assert_eq!(ms("90"), 90_000);
        assert_eq!(ms("5.25"), 5_250);
        assert_eq!(ms("01:30"), 90_000);
        assert_eq!(ms("1:02:03.5"), 3_723_500);
        assert_eq!(ms("00:00:00.007"), 7);
    }

    #[test]
    fn timestamp_rejects_bad_input() {
        for bad in [
            "", "-1", "1:60", "1:60:00", "1.2345", "a", "1::2", "1:2:3:4", "1e3", " : ", "+5",
        ] {
            assert!(bad.parse::<Timestamp>().is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn timestamp_ffmpeg_format() {
        assert_eq!(Timestamp::from_millis(3_723_500).to_ffmpeg(), "01:02:03.500");
        assert_eq!(Timestamp::from_millis(0).to_ffmpeg(), "00:00:00.000");
    }

    // ---- Parameter validation ----

    #[test]
    fn unknown_operation_rejected() {
        let msg = validation_message(Transformation::from_params("explode", &params(&[])).unwrap_err());
        assert!(msg.contains("unknown operation"));
    }

    #[test]
    fn unknown_format_rejected() {
        let err = Transformation::from_params("transcode", &params(&[("format", "not-a-format")]))
            .unwrap_err();
        assert!(validation_message(err).contains("unsupported format 'not-a-format'"));
    }

    #[test]
    fn unknown_parameter_rejected() {
        let err = Transformation::from_params("transcode", &params(&[("vf", "anything")]))
            .unwrap_err();
        assert!(validation_message(err).contains("unknown parameter 'vf'"));

        // Trim-only parameters are not accepted by transcode.
        assert!(Transformation::from_params("transcode", &params(&[("start", "1")])).is_err());
    }

    #[test]
    fn trim_requires_ordered_range() {
        assert!(Transformation::from_params("trim", &params(&[])).is_err());
        assert!(Transformation::from_params("trim", &params(&[("start", "10"), ("end", "5")])).is_err());
        assert!(Transformation::from_params("trim", &params(&[("start", "10"), ("end", "10")])).is_err());

        let t = Transformation::from_params("trim", &params(&[("start", "10"), ("end", "")])).unwrap();
        assert_eq!(
            t.kind,
            TransformKind::Trim {
                start: Timestamp::from_millis(10_000),
                end: None
            }
        );
    }

    #[test]
    fn overlay_defaults() {
        let t = Transformation::from_params("overlay_text", &params(&[("text", "@mediaforge")])).unwrap();
        let TransformKind::OverlayText(style) = t.kind else {
            panic!("expected overlay");
        };
        assert_eq!(style.text, "@mediaforge");
        assert_eq!(style.font, None);
        assert_eq!(style.font_size, DEFAULT_FONT_SIZE);
        assert_eq!(style.color, FontColor::Gray);
    }

    #[test]
    fn overlay_text_rejects_filter_metacharacters() {
        for text in ["a'b", "a:b", "a,b", "a;b", "[v]", "100%", "a\\b", "x=y", "{x}"] {
            let err = Transformation::from_params("overlay_text", &params(&[("text", text)]))
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{text}");
        }
    }

    #[test]
    fn overlay_text_length_and_control_chars() {
        let long = "a".repeat(MAX_OVERLAY_TEXT_CHARS + 1);
        assert!(Transformation::from_params("overlay_text", &params(&[("text", &long)])).is_err());
        assert!(Transformation::from_params("overlay_text", &params(&[("text", "a\u{7}b")])).is_err());
    }

    #[test]
    fn overlay_rejects_audio_formats_and_bad_style() {
        assert!(Transformation::from_params("overlay_text", &params(&[("text", "hi"), ("format", "mp3")])).is_err());
        assert!(Transformation::from_params("overlay_text", &params(&[("text", "hi"), ("format", "webm")])).is_err());
        assert!(Transformation::from_params("overlay_text", &params(&[("text", "hi"), ("font_size", "2")])).is_err());
        assert!(Transformation::from_params("overlay_text", &params(&[("text", "hi"), ("font_color", "hotpink")])).is_err());
        assert!(Transformation::from_params("overlay_text", &params(&[("text", "hi"), ("font", "../evil")])).is_err());
    }

    #[test]
    fn metadata_collected_and_limited() {
        let t = Transformation::from_params(
            "transcode",
            &params(&[("title", "My Clip"), ("year", "2024"), ("genre", "")]),
        )
        .unwrap();
        assert_eq!(t.metadata.len(), 2);
        assert_eq!(t.metadata[&MetadataKey::Title], "My Clip");

        let long = "x".repeat(MAX_METADATA_VALUE_CHARS + 1);
        assert!(Transformation::from_params("transcode", &params(&[("comment", &long)])).is_err());
        assert!(Transformation::from_params("transcode", &params(&[("title", "a\nb")])).is_err());
    }

    // ---- Output selection ----

    #[test]
    fn output_format_defaults() {
        let t = Transformation::transcode(None);
        assert_eq!(t.output_format(MediaKind::Video, Some("mkv")), OutputFormat::Mp4);
        assert_eq!(t.output_format(MediaKind::Audio, Some("flac")), OutputFormat::Flac);
        assert_eq!(t.output_format(MediaKind::Audio, Some("mp4")), OutputFormat::Mp3);
        assert_eq!(t.output_format(MediaKind::Audio, None), OutputFormat::Mp3);

        let t = Transformation::transcode(Some(OutputFormat::Webm));
        assert_eq!(t.output_format(MediaKind::Video, Some("mp4")), OutputFormat::Webm);
    }

    // ---- Argument building ----

    fn input() -> PathBuf {
        PathBuf::from("/data/uploads/3f2a9c1e_clip.mov")
    }

    fn output() -> PathBuf {
        PathBuf::from("/data/outputs/job/3f2a9c1e_clip_processed.mp4")
    }

    #[test]
    fn transcode_video_args() {
        let t = Transformation::transcode(None);
        let args = t
            .build_args(&input(), &output(), MediaKind::Video, OutputFormat::Mp4, None)
            .unwrap();
        assert_eq!(
            args,
            vec![
                "-hide_banner", "-nostdin", "-y",
                "-i", "/data/uploads/3f2a9c1e_clip.mov",
                "-c:v", "libx264", "-preset", "ultrafast",
                "-c:a", "aac",
                "/data/outputs/job/3f2a9c1e_clip_processed.mp4",
            ]
        );
    }

    #[test]
    fn audio_same_format_copies_stream() {
        let t = Transformation::transcode(None);
        let args = t
            .build_args(
                Path::new("/u/a_song.flac"),
                Path::new("/o/a_song_processed.flac"),
                MediaKind::Audio,
                OutputFormat::Flac,
                None,
            )
            .unwrap();
        assert!(args.windows(2).any(|w| w == ["-c:a", "copy"]));
        assert!(args.contains(&"-vn".to_string()));
        assert!(!args.iter().any(|a| a == "-c:v"));
    }

    #[test]
    fn video_to_audio_extracts_audio() {
        let t = Transformation::transcode(Some(OutputFormat::Mp3));
        let args = t
            .build_args(&input(), Path::new("/o/x.mp3"), MediaKind::Video, OutputFormat::Mp3, None)
            .unwrap();
        assert!(args.contains(&"-vn".to_string()));
        assert!(args.windows(2).any(|w| w == ["-c:a", "libmp3lame"]));
    }

    #[test]
    fn trim_args_seek_and_duration() {
        let mut p = params(&[("start", "00:00:05"), ("end", "00:00:12.5")]);
        p.insert("title".into(), "Cut".into());
        let t = Transformation::from_params("trim", &p).unwrap();
        let args = t
            .build_args(&input(), &output(), MediaKind::Video, OutputFormat::Mp4, None)
            .unwrap();

        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < i);
        assert_eq!(args[ss + 1], "00:00:05.000");
        let t_flag = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t_flag + 1], "00:00:07.500");
        assert!(args.windows(2).any(|w| w == ["-metadata", "TITLE=Cut"]));
        assert_eq!(args.last().unwrap(), &path_arg(&output()));
    }

    #[test]
    fn overlay_args_use_single_filter_element() {
        let t = Transformation::from_params(
            "overlay_text",
            &params(&[("text", "Hello World!"), ("font_color", "yellow"), ("font_size", "32")]),
        )
        .unwrap();
        let font = Path::new("/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf");
        let args = t
            .build_args(&input(), &output(), MediaKind::Video, OutputFormat::Mp4, Some(font))
            .unwrap();

        let fc = args.iter().position(|a| a == "-filter_complex").unwrap();
        let filter = &args[fc + 1];
        assert!(filter.starts_with("[0:v]crop="));
        assert!(filter.contains("scale=720:1280"));
        assert!(filter.contains("text='Hello World!'"));
        assert!(filter.contains("fontcolor=yellow"));
        assert!(filter.contains("fontsize=32"));
        assert!(filter.ends_with("[v]"));
        assert!(args.windows(2).any(|w| w == ["-map", "[v]"]));
        assert!(args.windows(2).any(|w| w == ["-preset", "ultrafast"]));
    }

    #[test]
    fn overlay_on_audio_is_validation_error() {
        let t = Transformation::from_params("overlay_text", &params(&[("text", "hi")])).unwrap();
        let err = t
            .build_args(
                Path::new("/u/a.mp3"),
                Path::new("/o/a.mp4"),
                MediaKind::Audio,
                OutputFormat::Mp4,
                Some(Path::new("/fonts/a.ttf")),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn overlay_rejects_unsafe_font_path() {
        let t = Transformation::from_params("overlay_text", &params(&[("text", "hi")])).unwrap();
        let err = t
            .build_args(
                &input(),
                &output(),
                MediaKind::Video,
                OutputFormat::Mp4,
                Some(Path::new("/fonts/x':text=pwn.ttf")),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn serializes_with_operation_tag() {
        let t = Transformation::from_params("trim", &params(&[("start", "1"), ("format", "mkv")])).unwrap();
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["operation"], "trim");
        assert_eq!(json["start"], 1000);
        assert_eq!(json["format"], "mkv");
        let back: Transformation = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
    }
}
