use std::path::PathBuf;

use chrono::Local;

use crate::live::RoomInfo;

/// Default output layout: platform / anchor / [timestamp][host][room].flv
const DEFAULT_TEMPLATE: &str = "{platform}/{anchor}/[{date} {time}][{host_name}][{room_name}].flv";

/// Render the output path for a recording from a token template.
///
/// Tokens: `{platform}`, `{anchor}` (nickname, falling back to host name),
/// `{host_name}`, `{room_name}`, `{date}`, `{time}`. Substituted values are
/// sanitized so they cannot escape their path component.
#[must_use]
pub fn render_output_path(
    out_put_path: &str,
    template: &str,
    platform_name: &str,
    nickname: &str,
    info: &RoomInfo,
    remove_symbols: bool,
) -> PathBuf {
    let template = if template.is_empty() {
        DEFAULT_TEMPLATE
    } else {
        template
    };

    let anchor = if nickname.is_empty() {
        &info.host_name
    } else {
        nickname
    };
    let now = Local::now();

    let rendered = template
        .replace("{platform}", &sanitize_component(platform_name, remove_symbols))
        .replace("{anchor}", &sanitize_component(anchor, remove_symbols))
        .replace(
            "{host_name}",
            &sanitize_component(&info.host_name, remove_symbols),
        )
        .replace(
            "{room_name}",
            &sanitize_component(&info.room_name, remove_symbols),
        )
        .replace("{date}", &now.format("%Y-%m-%d").to_string())
        .replace("{time}", &now.format("%H-%M-%S").to_string());

    PathBuf::from(out_put_path).join(rendered)
}

/// Make a string safe as a single path component.
fn sanitize_component(value: &str, remove_symbols: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => out.push('_'),
            c if remove_symbols
                && !c.is_alphanumeric()
                && !matches!(c, ' ' | '_' | '-' | '.' | '[' | ']') =>
            {
                // drop other symbols entirely
            }
            c => out.push(c),
        }
    }
    let trimmed = out.trim();
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Swap the extension of a rendered path, keeping the rest intact.
#[must_use]
pub fn with_extension(path: &std::path::Path, ext: &str) -> PathBuf {
    let mut out = path.to_path_buf();
    out.set_extension(ext);
    out
}
