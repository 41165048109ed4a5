use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Transcoding preset selected by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Passthrough remux, no re-encoding.
    #[default]
    Copy,
    /// Keep video, re-encode audio for browser playback.
    Web,
    /// Constrained-bitrate SD re-encode for thin links.
    Low,
}

/// A fully-resolved transcoder invocation.
#[derive(Debug, Clone)]
pub struct TranscodeCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Profile {
    /// Builds the ffmpeg command that pulls `input_url` and maintains the
    /// session's manifest plus a sliding window of segment files under
    /// `work_dir`. The window itself (`hls_list_size` + `delete_segments`)
    /// belongs to ffmpeg; the relay only consumes what gets listed.
    pub fn command(
        self,
        ffmpeg: &Path,
        input_url: &str,
        work_dir: &Path,
        id: &str,
    ) -> TranscodeCommand {
        let manifest = manifest_path(work_dir, id);
        let segment_pattern = work_dir.join(format!("{id}-%d.ts"));

        let mut args: Vec<String> = vec!["-i".into(), input_url.into()];

        match self {
            Profile::Copy => push_args(&mut args, &["-c", "copy"]),
            Profile::Web => push_args(&mut args, &["-c:v", "copy", "-c:a", "libtwolame"]),
            Profile::Low => push_args(
                &mut args,
                &[
                    "-c:v",
                    "libx264",
                    "-c:a",
                    "libtwolame",
                    "-vf",
                    "yadif=mode=send_frame:parity=auto:deint=all,scale=720:576",
                    "-maxrate:v",
                    "1640k",
                    "-bufsize:v",
                    "1280k",
                    "-r",
                    "25",
                    "-pix_fmt",
                    "yuv420p",
                    "-preset",
                    "veryfast",
                    "-crf",
                    "23",
                ],
            ),
        }

        push_args(
            &mut args,
            &[
                "-sn",
                "-f",
                "hls",
                "-hls_time",
                "2",
                "-hls_list_size",
                "6",
                "-hls_flags",
                "delete_segments",
                "-hls_segment_filename",
            ],
        );
        args.push(segment_pattern.to_string_lossy().into_owned());
        args.push(manifest.to_string_lossy().into_owned());

        TranscodeCommand {
            program: ffmpeg.to_path_buf(),
            args,
        }
    }
}

/// The manifest location is a pure function of the session id.
pub fn manifest_path(work_dir: &Path, id: &str) -> PathBuf {
    work_dir.join(format!("{id}.m3u8"))
}

fn push_args(args: &mut Vec<String>, extra: &[&str]) {
    args.extend(extra.iter().map(|s| (*s).to_string()));
}
