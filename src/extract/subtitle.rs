//! WebVTT caption tracks to timestamped plain text.

/// Converts a VTT document into one `[start] - [end] text` line per cue.
///
/// Inline markup is stripped and a cue repeating the previous cue's text is dropped,
/// which collapses the rolling lines of auto-generated captions.
pub fn vtt_to_text(content: &str) -> String {
    let mut cues: Vec<String> = Vec::new();
    let mut last_text = String::new();
    let mut lines = content.lines().map(|line| line.trim_start_matches('\u{feff}').trim());

    while let Some(line) = lines.next() {
        let Some((start, end)) = parse_timing(line) else {
            continue;
        };

        let mut text_lines = Vec::new();
        for text in lines.by_ref() {
            if text.is_empty() {
                break;
            }
            let cleaned = strip_tags(text);
            if !cleaned.is_empty() {
                text_lines.push(cleaned);
            }
        }

        let text = text_lines.join(" ");
        if text.is_empty() || text == last_text {
            continue;
        }
        cues.push(format!("[{}] - [{}] {}", start, end, text));
        last_text = text;
    }

    render_cues(&cues)
}

/// Joins rendered cue lines with a blank line between them.
pub(crate) fn render_cues(cues: &[String]) -> String {
    if cues.is_empty() {
        String::new()
    } else {
        let mut out = cues.join("\n\n");
        out.push('\n');
        out
    }
}

/// Seconds as `HH:MM:SS.mmm`.
pub(crate) fn format_timestamp(secs: f64) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let (hours, rest) = (total_ms / 3_600_000, total_ms % 3_600_000);
    let (minutes, rest) = (rest / 60_000, rest % 60_000);
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, rest / 1000, rest % 1000)
}

fn parse_timing(line: &str) -> Option<(&str, &str)> {
    let (start, rest) = line.split_once("-->")?;
    let start = start.trim();
    // cue settings may follow the end time
    let end = rest.split_whitespace().next()?;
    (is_timestamp(start) && is_timestamp(end)).then_some((start, end))
}

fn is_timestamp(value: &str) -> bool {
    let Some((clock, millis)) = value.split_once('.') else {
        return false;
    };
    let parts: Vec<&str> = clock.split(':').collect();
    (2..=3).contains(&parts.len())
        && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        && millis.len() == 3
        && millis.chars().all(|c| c.is_ascii_digit())
}

fn strip_tags(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;
    for c in line.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    let out = out.replace("&amp;", "&").replace("&lt;", "<").replace("&gt;", ">").replace("&nbsp;", " ");
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_captions() {
        let vtt = "WEBVTT\nKind: captions\nLanguage: en\n\n\
                   00:00:01.000 --> 00:00:03.500\nHello there\n\n\
                   00:00:03.500 --> 00:00:05.000 align:start position:0%\nsecond line\ncontinues\n";
        assert_eq!(
            vtt_to_text(vtt),
            "[00:00:01.000] - [00:00:03.500] Hello there\n\n\
             [00:00:03.500] - [00:00:05.000] second line continues\n"
        );
    }

    #[test]
    fn test_auto_captions_are_cleaned() {
        let vtt = "WEBVTT\n\n\
                   00:00:00.000 --> 00:00:02.000\nwe<00:00:00.500><c> are</c><00:00:01.000><c> live</c>\n\n\
                   00:00:02.000 --> 00:00:02.010\nwe are live\n\n\
                   00:00:02.010 --> 00:00:04.000\nwe are live\nnext &amp; more\n";
        assert_eq!(
            vtt_to_text(vtt),
            "[00:00:00.000] - [00:00:02.000] we are live\n\n\
             [00:00:02.010] - [00:00:04.000] we are live next & more\n"
        );
    }

    #[test]
    fn test_numbered_cues_and_short_clock() {
        let vtt = "\u{feff}WEBVTT\n\n1\n00:01.000 --> 00:02.000\nshort\n";
        assert_eq!(vtt_to_text(vtt), "[00:01.000] - [00:02.000] short\n");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00:00.000");
        assert_eq!(format_timestamp(3723.4567), "01:02:03.457");
        assert_eq!(format_timestamp(-1.0), "00:00:00.000");
    }

    #[test]
    fn test_empty_track() {
        assert_eq!(vtt_to_text("WEBVTT\n\n"), "");
        assert_eq!(vtt_to_text(""), "");
    }
}
