// Job pipeline
//
// Each stage works inside the job's scratch workspace:
// - Normalize: trim, scale/pad and re-encode every clip
// - Concat: join the normalized clips through a manifest
// - Overlay: attach optional background audio
// - Runner: drives the stages and delivers the artifact

pub mod concat;
pub mod normalize;
pub mod overlay;
pub mod runner;
pub mod workspace;

pub use concat::{concatenate_clips, render_manifest, MANIFEST_NAME};
pub use normalize::{normalize_clips, NormalizedClip};
pub use overlay::{overlay_background_audio, AudioFitPolicy, AudioGain, AudioOverlay};
pub use runner::JobRunner;
pub use workspace::{purge_stale, ScratchWorkspace, SCRATCH_PREFIX};
