//! Concrete stream parsers registered against the core's resolver.

mod ffmpeg;
mod native_flv;

use std::sync::Arc;

use livecap_core::parser::{ParserHandle, ParserKind, ParserResolver};
use tracing::info;

pub use ffmpeg::FfmpegParser;
pub use native_flv::NativeFlvParser;

/// Build the parser resolver with everything available on this host.
///
/// The external FLV repair tool is not registered here; when it is absent
/// the fallback chain goes straight to ffmpeg.
pub fn build_parser_resolver(
    default_ffmpeg: &str,
    client: reqwest::Client,
) -> ParserResolver {
    let mut resolver = ParserResolver::new();

    let ffmpeg_available = probe_ffmpeg(default_ffmpeg);
    if !ffmpeg_available {
        info!(path = %default_ffmpeg, "ffmpeg not found, non-FLV streams will not record");
    }
    let ffmpeg_path = default_ffmpeg.to_string();
    resolver.register(
        ParserKind::Ffmpeg,
        move || ffmpeg_available,
        move |cfg| Ok(Arc::new(FfmpegParser::new(&ffmpeg_path, cfg)) as ParserHandle),
    );

    resolver.register(
        ParserKind::NativeFlv,
        || true,
        move |cfg| Ok(Arc::new(NativeFlvParser::new(client.clone(), cfg)) as ParserHandle),
    );

    resolver
}

fn probe_ffmpeg(path: &str) -> bool {
    std::process::Command::new(path)
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
