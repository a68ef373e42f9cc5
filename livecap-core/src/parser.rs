//! The media parser capability.
//!
//! A [`StreamParser`] pulls one stream URL and writes it to disk. The core
//! never implements media handling itself; concrete parsers (external
//! repair-tool wrapper, ffmpeg, native FLV downloader) are registered by the
//! binary and chosen by [`ParserResolver`] with a fixed fallback chain.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::live::{LiveHandle, StreamUrlInfo};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserKind {
    /// External repair/recorder tool; FLV input only.
    BililiveRecorder,
    Ffmpeg,
    /// Plain HTTP byte-stream download; FLV input only.
    NativeFlv,
}

impl ParserKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BililiveRecorder => "bililive-recorder",
            Self::Ffmpeg => "ffmpeg",
            Self::NativeFlv => "native-flv",
        }
    }
}

/// Per-recording parser settings, resolved from the room's config.
#[derive(Debug, Clone, Default)]
pub struct ParserConfig {
    pub timeout_in_us: u64,
    pub audio_only: bool,
    pub ffmpeg_path: String,
}

#[async_trait]
pub trait StreamParser: Send + Sync {
    /// Pull the stream and write it to `output` until the stream ends or the
    /// token is cancelled. Returning `Ok` means the file was written (it may
    /// still be empty; the recorder removes empty files).
    async fn parse_live_stream(
        &self,
        token: CancellationToken,
        stream: &StreamUrlInfo,
        live: &LiveHandle,
        output: &Path,
    ) -> Result<()>;

    /// Terminate the pull promptly. Idempotent.
    async fn stop(&self);

    /// Parser-reported counters (bitrate, frames, ...), if supported.
    fn status(&self) -> Option<HashMap<String, String>> {
        None
    }

    /// Ask the parser to roll the output file at the next keyframe.
    /// Returns false when unsupported.
    fn request_segment(&self) -> bool {
        false
    }
}

pub type ParserHandle = Arc<dyn StreamParser>;

type AvailableFn = Box<dyn Fn() -> bool + Send + Sync>;
type BuildFn = Box<dyn Fn(&ParserConfig) -> Result<ParserHandle> + Send + Sync>;

struct ParserFactory {
    available: AvailableFn,
    build: BuildFn,
}

/// Registry of parser factories plus the fallback chain:
/// bililive-recorder (FLV only) → ffmpeg → native FLV (FLV only).
/// Non-FLV input strictly requires ffmpeg.
#[derive(Default)]
pub struct ParserResolver {
    factories: HashMap<ParserKind, ParserFactory>,
}

impl ParserResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A, B>(&mut self, kind: ParserKind, available: A, build: B)
    where
        A: Fn() -> bool + Send + Sync + 'static,
        B: Fn(&ParserConfig) -> Result<ParserHandle> + Send + Sync + 'static,
    {
        self.factories.insert(
            kind,
            ParserFactory {
                available: Box::new(available),
                build: Box::new(build),
            },
        );
    }

    fn try_build(&self, kind: ParserKind, cfg: &ParserConfig) -> Option<Result<ParserHandle>> {
        let factory = self.factories.get(&kind)?;
        if !(factory.available)() {
            return None;
        }
        Some((factory.build)(cfg))
    }

    /// Pick a parser for a stream. `prefer_native` comes from the room's
    /// feature flags and only short-circuits for FLV input.
    pub fn resolve(
        &self,
        is_flv: bool,
        prefer_native: bool,
        cfg: &ParserConfig,
    ) -> Result<ParserHandle> {
        if is_flv && prefer_native {
            if let Some(result) = self.try_build(ParserKind::NativeFlv, cfg) {
                return result;
            }
            tracing::info!("native FLV parser unavailable, falling back");
        }
        if is_flv {
            if let Some(result) = self.try_build(ParserKind::BililiveRecorder, cfg) {
                return result;
            }
        }
        if let Some(result) = self.try_build(ParserKind::Ffmpeg, cfg) {
            return result;
        }
        if is_flv {
            if let Some(result) = self.try_build(ParserKind::NativeFlv, cfg) {
                return result;
            }
            return Err(Error::Internal(
                "no stream parser available for FLV input".to_string(),
            ));
        }
        Err(Error::Internal(
            "ffmpeg is required for non-FLV streams but is not available".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockParser;

    fn resolver_with(kinds: &[(ParserKind, bool)]) -> ParserResolver {
        let mut resolver = ParserResolver::new();
        for &(kind, available) in kinds {
            resolver.register(
                kind,
                move || available,
                move |_cfg| Ok(Arc::new(MockParser::named(kind.as_str())) as ParserHandle),
            );
        }
        resolver
    }

    #[test]
    fn test_flv_prefers_recorder_tool() {
        let resolver = resolver_with(&[
            (ParserKind::BililiveRecorder, true),
            (ParserKind::Ffmpeg, true),
            (ParserKind::NativeFlv, true),
        ]);
        let parser = resolver
            .resolve(true, false, &ParserConfig::default())
            .unwrap();
        assert_eq!(parser.status().unwrap()["parser"], "bililive-recorder");
    }

    #[test]
    fn test_flv_falls_back_to_ffmpeg_then_native() {
        let resolver = resolver_with(&[
            (ParserKind::BililiveRecorder, false),
            (ParserKind::Ffmpeg, true),
            (ParserKind::NativeFlv, true),
        ]);
        let parser = resolver
            .resolve(true, false, &ParserConfig::default())
            .unwrap();
        assert_eq!(parser.status().unwrap()["parser"], "ffmpeg");

        let resolver = resolver_with(&[
            (ParserKind::BililiveRecorder, false),
            (ParserKind::Ffmpeg, false),
            (ParserKind::NativeFlv, true),
        ]);
        let parser = resolver
            .resolve(true, false, &ParserConfig::default())
            .unwrap();
        assert_eq!(parser.status().unwrap()["parser"], "native-flv");
    }

    #[test]
    fn test_non_flv_requires_ffmpeg() {
        let resolver = resolver_with(&[
            (ParserKind::BililiveRecorder, true),
            (ParserKind::Ffmpeg, false),
            (ParserKind::NativeFlv, true),
        ]);
        match resolver.resolve(false, false, &ParserConfig::default()) {
            Err(err) => assert!(matches!(err, Error::Internal(_))),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn test_native_preference_short_circuits_for_flv() {
        let resolver = resolver_with(&[
            (ParserKind::BililiveRecorder, true),
            (ParserKind::Ffmpeg, true),
            (ParserKind::NativeFlv, true),
        ]);
        let parser = resolver
            .resolve(true, true, &ParserConfig::default())
            .unwrap();
        assert_eq!(parser.status().unwrap()["parser"], "native-flv");

        // The preference does not apply to non-FLV input.
        let parser = resolver
            .resolve(false, true, &ParserConfig::default())
            .unwrap();
        assert_eq!(parser.status().unwrap()["parser"], "ffmpeg");
    }
}
