//! Input inspection via ffprobe.

use std::path::Path;

use mediaforge_common::MediaKind;

/// ffprobe arguments listing the codec type of every video stream as CSV.
pub fn video_stream_args(input: &Path) -> Vec<String> {
    vec![
        "-v".into(),
        "error".into(),
        "-select_streams".into(),
        "v".into(),
        "-show_entries".into(),
        "stream=codec_type".into(),
        "-of".into(),
        "csv=p=0".into(),
        input.to_string_lossy().into_owned(),
    ]
}

/// Interpret ffprobe output: any `video` entry means the input has video.
pub fn media_kind_from_output(stdout: &str) -> MediaKind {
    if stdout.to_ascii_lowercase().contains("video") {
        MediaKind::Video
    } else {
        MediaKind::Audio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_video() {
        assert_eq!(media_kind_from_output("video\n"), MediaKind::Video);
        assert_eq!(media_kind_from_output("video\nvideo\n"), MediaKind::Video);
    }

    #[test]
    fn empty_output_is_audio() {
        assert_eq!(media_kind_from_output(""), MediaKind::Audio);
        assert_eq!(media_kind_from_output("\n"), MediaKind::Audio);
    }

    #[test]
    fn args_end_with_input() {
        let args = video_stream_args(Path::new("/u/a b.mp4"));
        assert_eq!(args.last().unwrap(), "/u/a b.mp4");
        assert!(args.windows(2).any(|w| w == ["-select_streams", "v"]));
    }
}
