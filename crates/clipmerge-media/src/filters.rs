//! FFmpeg filter definitions.

use clipmerge_models::encoding::PIXEL_FORMAT;
use clipmerge_models::Resolution;

/// Output label for the joined video stream.
pub const CONCAT_VIDEO_LABEL: &str = "[v]";
/// Output label for the joined audio stream.
pub const CONCAT_AUDIO_LABEL: &str = "[a]";

/// Fit a clip inside `target` keeping its aspect ratio, then pad it
/// (centered) to exactly `target` and normalize the pixel format.
pub fn scale_pad_filter(target: Resolution) -> String {
    let Resolution { width, height } = target;
    format!(
        "scale={width}:{height}:force_original_aspect_ratio=decrease:flags=lanczos,\
         pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,\
         format={PIXEL_FORMAT}"
    )
}

/// Concatenate `inputs` clips, video and audio, in input order.
pub fn concat_filter(inputs: usize) -> String {
    let mut filter = String::new();
    for i in 0..inputs {
        filter.push_str(&format!("[{i}:v][{i}:a]"));
    }
    filter.push_str(&format!(
        "concat=n={inputs}:v=1:a=1{CONCAT_VIDEO_LABEL}{CONCAT_AUDIO_LABEL}"
    ));
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_pad_filter() {
        let filter = scale_pad_filter(Resolution::new(1080, 1920));
        assert_eq!(
            filter,
            "scale=1080:1920:force_original_aspect_ratio=decrease:flags=lanczos,\
             pad=1080:1920:(ow-iw)/2:(oh-ih)/2,format=yuv420p"
        );
    }

    #[test]
    fn test_concat_filter_two_inputs() {
        assert_eq!(
            concat_filter(2),
            "[0:v][0:a][1:v][1:a]concat=n=2:v=1:a=1[v][a]"
        );
    }

    #[test]
    fn test_concat_filter_three_inputs() {
        assert!(concat_filter(3).starts_with("[0:v][0:a][1:v][1:a][2:v][2:a]concat=n=3"));
    }
}
