use super::stream::{normalize_quality, parse_resolution, StreamPreference, StreamUrlInfo};

/// Picks the best stream variant for a room by scoring each candidate
/// against the user's [`StreamPreference`].
///
/// The weights form three bands (format ≈ 100, quality ≈ 50, minor
/// adjustments ≈ 10–30). They are tunable; only the resulting ordering is
/// contractual.
pub struct StreamSelector {
    preference: StreamPreference,
}

impl StreamSelector {
    #[must_use]
    pub fn new(preference: StreamPreference) -> Self {
        Self { preference }
    }

    /// Select the best stream. Returns the winner and a human-readable
    /// explanation of the choice, or `None` when the slice is empty.
    #[must_use]
    pub fn select_best<'a>(
        &self,
        candidates: &'a [StreamUrlInfo],
    ) -> Option<(&'a StreamUrlInfo, String)> {
        if candidates.is_empty() {
            return None;
        }
        if candidates.len() == 1 {
            return Some((&candidates[0], "only available stream".to_string()));
        }

        let mut best: Option<(&StreamUrlInfo, i64, String)> = None;
        for info in candidates {
            let (score, reasons) = self.score(info);
            let reason = if reasons.is_empty() {
                "default choice".to_string()
            } else {
                reasons.join(", ")
            };
            match &best {
                Some((_, best_score, _)) if *best_score >= score => {}
                _ => best = Some((info, score, reason)),
            }
        }

        best.map(|(info, score, reason)| (info, format!("score {score}: {reason}")))
    }

    fn score(&self, info: &StreamUrlInfo) -> (i64, Vec<String>) {
        let mut score: i64 = 0;
        let mut reasons = Vec::new();

        // Format match, first preference band.
        if let Some(idx) = self
            .preference
            .formats
            .iter()
            .position(|f| f == &info.format)
        {
            let format_score = 100 - (idx as i64) * 10;
            score += format_score;
            reasons.push(format!("format #{} (+{format_score})", idx + 1));
        } else if !info.format.is_empty() {
            reasons.push("format not preferred".to_string());
        }

        // Quality match, second band.
        let normalized = normalize_quality(&info.quality);
        if let Some(idx) = self
            .preference
            .qualities
            .iter()
            .position(|q| normalize_quality(q) == normalized)
        {
            let quality_score = 50 - (idx as i64) * 5;
            score += quality_score;
            reasons.push(format!("quality #{} (+{quality_score})", idx + 1));
        } else if let Some(first) = self.preference.qualities.first() {
            // No exact match: score by pixel-count closeness to the top pick.
            let (tw, th) = parse_resolution(first);
            if tw > 0 && info.width > 0 {
                let target = i64::from(tw) * i64::from(th);
                let actual = i64::from(info.width) * i64::from(info.height);
                let closeness = (25 - (target - actual).abs() / 100_000).clamp(0, 25);
                score += closeness;
                if closeness > 0 {
                    reasons.push(format!("resolution close (+{closeness})"));
                }
            }
        }

        if self.preference.max_bitrate > 0 && info.bitrate > self.preference.max_bitrate {
            score -= 20;
            reasons.push(format!(
                "bitrate over limit (-20) {}kbps>{}kbps",
                info.bitrate, self.preference.max_bitrate
            ));
        }
        if self.preference.min_bitrate > 0
            && info.bitrate > 0
            && info.bitrate < self.preference.min_bitrate
        {
            score -= 20;
            reasons.push(format!(
                "bitrate under limit (-20) {}kbps<{}kbps",
                info.bitrate, self.preference.min_bitrate
            ));
        }

        if !self.preference.allow_h265 && info.codec == "h265" {
            score -= 30;
            reasons.push("h265 not allowed (-30)".to_string());
        }

        if self.preference.prefer_60fps && (59.0..=61.0).contains(&info.frame_rate) {
            score += 10;
            reasons.push("60fps (+10)".to_string());
        }

        (score, reasons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(format: &str, quality: &str, bitrate: u32) -> StreamUrlInfo {
        StreamUrlInfo {
            url: format!("https://cdn.example.com/{format}/{quality}"),
            format: format.to_string(),
            quality: quality.to_string(),
            bitrate,
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_first_format() {
        let selector = StreamSelector::new(StreamPreference::default());
        let candidates = vec![stream("hls", "1080p", 4000), stream("flv", "1080p", 4000)];
        let (best, _) = selector.select_best(&candidates).unwrap();
        assert_eq!(best.format, "flv");
    }

    #[test]
    fn test_prefers_higher_quality_within_format() {
        let selector = StreamSelector::new(StreamPreference::default());
        let candidates = vec![stream("flv", "480p", 1500), stream("flv", "1080p", 4000)];
        let (best, _) = selector.select_best(&candidates).unwrap();
        assert_eq!(best.quality, "1080p");
    }

    #[test]
    fn test_h265_penalty_changes_ordering() {
        let pref = StreamPreference {
            allow_h265: false,
            ..Default::default()
        };
        let selector = StreamSelector::new(pref);
        let mut h265 = stream("flv", "1080p", 4000);
        h265.codec = "h265".to_string();
        let candidates = vec![h265, stream("flv", "720p", 2500)];
        let (best, _) = selector.select_best(&candidates).unwrap();
        // 1080p would win on quality, but the codec penalty flips it.
        assert_eq!(best.quality, "720p");
    }

    #[test]
    fn test_single_candidate_shortcut() {
        let selector = StreamSelector::new(StreamPreference::default());
        let candidates = vec![stream("rtmp", "unknown", 0)];
        let (best, reason) = selector.select_best(&candidates).unwrap();
        assert_eq!(best.format, "rtmp");
        assert_eq!(reason, "only available stream");
    }

    #[test]
    fn test_empty_candidates() {
        let selector = StreamSelector::new(StreamPreference::default());
        assert!(selector.select_best(&[]).is_none());
    }

    #[test]
    fn test_normalized_quality_match() {
        let pref = StreamPreference {
            qualities: vec!["原画".to_string()],
            ..Default::default()
        };
        let selector = StreamSelector::new(pref);
        let candidates = vec![stream("flv", "original", 8000), stream("flv", "480p", 1500)];
        let (best, _) = selector.select_best(&candidates).unwrap();
        assert_eq!(best.quality, "original");
    }
}
