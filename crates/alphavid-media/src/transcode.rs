//! Engine invocation spec for one conversion.

use std::path::Path;

use alphavid_models::ConvertOptions;

use crate::command::FfmpegCommand;
use crate::filters::build_filter_graph;

/// Extension of produced artifacts.
pub const OUTPUT_EXTENSION: &str = "webm";

/// VP9 keeps the alpha plane.
pub const VIDEO_CODEC: &str = "libvpx-vp9";

pub const PIXEL_FORMAT: &str = "yuva420p";

/// Everything the engine needs besides the input and output paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeSpec {
    pub filter_graph: String,
    pub video_codec: &'static str,
    pub pixel_format: &'static str,
    pub drop_audio: bool,
}

impl TranscodeSpec {
    pub fn from_options(opts: &ConvertOptions) -> Self {
        Self {
            filter_graph: build_filter_graph(opts),
            video_codec: VIDEO_CODEC,
            pixel_format: PIXEL_FORMAT,
            drop_audio: true,
        }
    }

    /// Arguments placed between the input and the output path.
    pub fn output_args(&self) -> Vec<String> {
        let mut args = vec![
            "-vf".to_string(),
            self.filter_graph.clone(),
            "-c:v".to_string(),
            self.video_codec.to_string(),
            "-pix_fmt".to_string(),
            self.pixel_format.to_string(),
            // Alt-ref frames drop the alpha plane in libvpx
            "-auto-alt-ref".to_string(),
            "0".to_string(),
        ];
        if self.drop_audio {
            args.push("-an".to_string());
        }
        args
    }

    pub fn to_command(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> FfmpegCommand {
        FfmpegCommand::new(input, output).output_args(self.output_args())
    }
}

/// Name of the engine's output file inside a job workspace.
pub fn output_file_name(id: &str) -> String {
    format!("output_{id}.{OUTPUT_EXTENSION}")
}
