use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{Result, StitchError};
use crate::job::{ConcatMode, EncodeSettings};
use crate::media::MediaProcessorTrait;
use super::{NormalizedClip, ScratchWorkspace};

pub const MANIFEST_NAME: &str = "concat.txt";

/// Render the concat demuxer manifest: one quoted path per line, in clip order
pub fn render_manifest(clips: &[NormalizedClip]) -> String {
    clips
        .iter()
        .map(|clip| format!("file '{}'\n", quote_path(&clip.path)))
        .collect()
}

/// Single quotes close the quoted string, so they are written as `'\''`
fn quote_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}

/// Write the manifest and join the clips it lists.
///
/// Returns the joined file and the mode that produced it.
pub async fn concatenate_clips(
    media: &dyn MediaProcessorTrait,
    workspace: &ScratchWorkspace,
    clips: &[NormalizedClip],
    mode: ConcatMode,
    settings: &EncodeSettings,
    fallback_reencode: bool,
) -> Result<(PathBuf, ConcatMode)> {
    let manifest_path = workspace.file(MANIFEST_NAME);
    fs::write(&manifest_path, render_manifest(clips)).await?;
    debug!("Wrote concat manifest with {} entries to {}", clips.len(), manifest_path.display());

    let output_path = workspace.file("concat.mp4");
    match media.concatenate(&manifest_path, &output_path, mode, settings).await {
        Ok(()) => Ok((output_path, mode)),
        Err(StitchError::Encode { detail, .. }) if mode == ConcatMode::Copy && fallback_reencode => {
            warn!("Stream-copy concatenation failed, retrying with re-encoding: {}", detail);
            media
                .concatenate(&manifest_path, &output_path, ConcatMode::Reencode, settings)
                .await?;
            Ok((output_path, ConcatMode::Reencode))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EncodeStage;
    use crate::media::MockMediaProcessorTrait;
    use mockall::Sequence;
    use uuid::Uuid;

    fn clips(paths: &[&str]) -> Vec<NormalizedClip> {
        paths
            .iter()
            .enumerate()
            .map(|(index, path)| NormalizedClip { index, path: PathBuf::from(path) })
            .collect()
    }

    #[test]
    fn test_manifest_lists_every_clip_in_order() {
        let manifest = render_manifest(&clips(&["/tmp/w/clip_000.norm.mp4", "/tmp/w/clip_001.norm.mp4", "/tmp/w/clip_002.norm.mp4"]));
        let lines: Vec<&str> = manifest.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "file '/tmp/w/clip_000.norm.mp4'");
        assert_eq!(lines[2], "file '/tmp/w/clip_002.norm.mp4'");
    }

    #[test]
    fn test_manifest_escapes_single_quotes() {
        let manifest = render_manifest(&clips(&["/tmp/it's/clip.mp4"]));
        assert_eq!(manifest, "file '/tmp/it'\\''s/clip.mp4'\n");
    }

    #[tokio::test]
    async fn test_copy_failure_falls_back_when_enabled() {
        let root = assert_fs::TempDir::new().unwrap();
        let workspace = ScratchWorkspace::create(root.path(), Uuid::new_v4()).unwrap();
        let mut seq = Sequence::new();
        let mut media = MockMediaProcessorTrait::new();

        media
            .expect_concatenate()
            .withf(|_, _, mode, _| *mode == ConcatMode::Copy)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| {
                Err(StitchError::Encode {
                    stage: EncodeStage::Concat,
                    detail: "Non-monotonous DTS".to_string(),
                })
            });
        media
            .expect_concatenate()
            .withf(|_, _, mode, _| *mode == ConcatMode::Reencode)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));

        let (output, mode) = concatenate_clips(
            &media,
            &workspace,
            &clips(&["/a.mp4", "/b.mp4"]),
            ConcatMode::Copy,
            &EncodeSettings::default(),
            true,
        )
        .await
        .unwrap();

        assert_eq!(mode, ConcatMode::Reencode);
        assert!(output.ends_with("concat.mp4"));
        let manifest = std::fs::read_to_string(workspace.file(MANIFEST_NAME)).unwrap();
        assert_eq!(manifest.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_copy_failure_is_fatal_without_fallback() {
        let root = assert_fs::TempDir::new().unwrap();
        let workspace = ScratchWorkspace::create(root.path(), Uuid::new_v4()).unwrap();
        let mut media = MockMediaProcessorTrait::new();
        media.expect_concatenate().times(1).returning(|_, _, _, _| {
            Err(StitchError::Encode {
                stage: EncodeStage::Concat,
                detail: "boom".to_string(),
            })
        });

        let result = concatenate_clips(
            &media,
            &workspace,
            &clips(&["/a.mp4"]),
            ConcatMode::Copy,
            &EncodeSettings::default(),
            false,
        )
        .await;

        assert!(matches!(result, Err(StitchError::Encode { stage: EncodeStage::Concat, .. })));
    }
}
