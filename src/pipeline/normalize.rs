use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::path::PathBuf;
use tracing::info;

use crate::error::{Result, StitchError};
use crate::job::{ClipPlan, EncodeSettings};
use crate::media::MediaProcessorTrait;
use super::ScratchWorkspace;

/// A clip re-encoded to the job's canonical format, in its input position
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedClip {
    pub index: usize,
    pub path: PathBuf,
}

/// Normalize every downloaded clip.
///
/// Up to `concurrency` clips are encoded at once; the result keeps input
/// order and the first failure aborts the remaining encodes.
pub async fn normalize_clips(
    media: &dyn MediaProcessorTrait,
    workspace: &ScratchWorkspace,
    clips: &[ClipPlan],
    sources: &[PathBuf],
    settings: &EncodeSettings,
    concurrency: usize,
) -> Result<Vec<NormalizedClip>> {
    info!("Normalizing {} clip(s) to {} @ {} fps", clips.len(), settings.resolution, settings.fps);

    // Indexed borrows keep the job future Send for tokio::spawn
    stream::iter(0..clips.len().min(sources.len()))
        .map(|position| {
            let clip = &clips[position];
            let source = &sources[position];
            let output = workspace.file(&format!("clip_{:03}.norm.mp4", clip.index));
            async move {
                media
                    .normalize_clip(source, &output, &clip.trim, settings, clip.index)
                    .await?;
                Ok::<_, StitchError>(NormalizedClip { index: clip.index, path: output })
            }
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::TrimWindow;
    use crate::media::MockMediaProcessorTrait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    fn plans(count: usize) -> Vec<ClipPlan> {
        (0..count)
            .map(|index| ClipPlan {
                index,
                source_url: format!("https://cdn.example.com/{}.mp4", index),
                trim: TrimWindow::default(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_parallel_normalization_keeps_input_order() {
        let root = assert_fs::TempDir::new().unwrap();
        let workspace = ScratchWorkspace::create(root.path(), Uuid::new_v4()).unwrap();
        let clips = plans(4);
        let sources: Vec<PathBuf> = clips.iter().map(|c| workspace.file(&format!("{}.src", c.index))).collect();

        let peak = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let mut media = MockMediaProcessorTrait::new();
        {
            let peak = Arc::clone(&peak);
            let running = Arc::clone(&running);
            media.expect_normalize_clip().times(4).returning(move |_, output, _, _, index| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                assert!(output.ends_with(format!("clip_{:03}.norm.mp4", index)));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let normalized = normalize_clips(&media, &workspace, &clips, &sources, &EncodeSettings::default(), 2)
            .await
            .unwrap();

        let order: Vec<usize> = normalized.iter().map(|c| c.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert!(normalized[2].path.ends_with("clip_002.norm.mp4"));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_first_failure_is_returned() {
        let root = assert_fs::TempDir::new().unwrap();
        let workspace = ScratchWorkspace::create(root.path(), Uuid::new_v4()).unwrap();
        let clips = plans(3);
        let sources: Vec<PathBuf> = clips.iter().map(|c| workspace.file(&format!("{}.src", c.index))).collect();

        let mut media = MockMediaProcessorTrait::new();
        media.expect_normalize_clip().returning(|_, _, _, _, index| {
            if index == 1 {
                Err(StitchError::Encode {
                    stage: crate::error::EncodeStage::Normalize { clip_index: index },
                    detail: "Invalid data found when processing input".to_string(),
                })
            } else {
                Ok(())
            }
        });

        let result = normalize_clips(&media, &workspace, &clips, &sources, &EncodeSettings::default(), 1).await;
        match result {
            Err(StitchError::Encode { stage, .. }) => {
                assert_eq!(stage, crate::error::EncodeStage::Normalize { clip_index: 1 });
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
