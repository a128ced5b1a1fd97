//! Reply stabilizer.
//!
//! AI surfaces stream their answers into the DOM token by token. Reading
//! too early captures a half-rendered reply, so we poll the response
//! elements until a new, non-empty reply text is byte-identical across a
//! run of consecutive polls.

use std::{
    sync::LazyLock,
    time::{Duration, Instant},
};

use {regex::Regex, tracing::debug};

use crate::{
    driver::SurfaceDriver,
    error::{Error, Result},
};

/// Knobs for [`await_reply`].
#[derive(Debug, Clone)]
pub struct StabilizeOptions {
    /// Overall deadline for a stable reply to appear.
    pub max_wait: Duration,
    /// Interval between polls.
    pub poll_interval: Duration,
    /// Required run length of identical consecutive polls.
    pub stable_checks: u32,
    /// Case-insensitive substrings marking a reply as still rendering.
    pub generating_markers: Vec<String>,
}

impl Default for StabilizeOptions {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(90),
            poll_interval: Duration::from_millis(500),
            stable_checks: 3,
            generating_markers: vec!["typing…".into(), "thinking…".into(), "generating".into()],
        }
    }
}

/// Wait for a new reply beyond `baseline` existing ones to stabilize.
///
/// `baseline` is the reply-element count captured before the prompt was
/// submitted; only elements beyond it are considered. Transient driver
/// errors reset the stability run and polling continues; any identity
/// change of the candidate text also resets the run.
pub async fn await_reply(
    driver: &dyn SurfaceDriver,
    selector: &str,
    baseline: usize,
    opts: &StabilizeOptions,
) -> Result<String> {
    let started = Instant::now();
    let mut previous: Option<String> = None;
    let mut streak: u32 = 0;

    loop {
        if started.elapsed() >= opts.max_wait {
            return Err(Error::StabilizeTimeout {
                waited_secs: started.elapsed().as_secs(),
            });
        }
        tokio::time::sleep(opts.poll_interval).await;

        let texts = match driver.reply_texts(selector).await {
            Ok(texts) => texts,
            Err(e) if e.is_transient() => {
                debug!(error = %e, "transient error while stabilizing, resetting");
                previous = None;
                streak = 0;
                continue;
            },
            Err(e) => return Err(e),
        };

        if texts.len() <= baseline {
            previous = None;
            streak = 0;
            continue;
        }
        let Some(candidate) = texts.last() else {
            continue;
        };

        let trimmed = candidate.trim();
        if trimmed.is_empty() || is_generating(trimmed, &opts.generating_markers) {
            previous = None;
            streak = 0;
            continue;
        }

        if previous.as_deref() == Some(candidate.as_str()) {
            streak += 1;
        } else {
            previous = Some(candidate.clone());
            streak = 1;
        }

        if streak >= opts.stable_checks {
            debug!(polls = streak, "reply stabilized");
            return Ok(clean_reply_text(candidate));
        }
    }
}

fn is_generating(text: &str, markers: &[String]) -> bool {
    let lower = text.to_lowercase();
    markers.iter().any(|m| lower.contains(&m.to_lowercase()))
}

static CITATION: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\[\d+\]").unwrap()
});

static EXTRA_BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\n{3,}").unwrap()
});

const SUPERSCRIPT_DIGITS: &[char] = &['⁰', '¹', '²', '³', '⁴', '⁵', '⁶', '⁷', '⁸', '⁹'];

/// Strip surface artifacts from a stabilized reply.
///
/// Removes `[n]` citation markers and superscript digits, drops
/// `Source:`/`Sources:` attribution lines, and collapses runs of blank
/// lines — while preserving the reply's own line breaks.
#[must_use]
pub fn clean_reply_text(raw: &str) -> String {
    let without_citations = CITATION.replace_all(raw, "");
    let without_superscripts: String = without_citations
        .chars()
        .filter(|c| !SUPERSCRIPT_DIGITS.contains(c))
        .collect();

    let kept_lines: Vec<&str> = without_superscripts
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.starts_with("Source:") || t.starts_with("Sources:"))
        })
        .map(str::trim_end)
        .collect();

    let joined = kept_lines.join("\n");
    EXTRA_BLANK_LINES.replace_all(&joined, "\n\n").trim().to_string()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, path::Path, sync::Mutex};

    use async_trait::async_trait;

    use {
        super::*,
        relais_common::{InboundMessage, ReplyPayload},
    };

    enum Frame {
        Texts(Vec<String>),
        Transient,
    }

    /// Driver whose `reply_texts` plays back a scripted sequence of frames,
    /// repeating the last frame once exhausted.
    struct ScriptedDriver {
        frames: Mutex<VecDeque<Frame>>,
        last: Mutex<Option<Vec<String>>>,
    }

    impl ScriptedDriver {
        fn new(frames: Vec<Frame>) -> Self {
            Self {
                frames: Mutex::new(frames.into()),
                last: Mutex::new(None),
            }
        }

        fn streaming(texts: &[&str]) -> Self {
            Self::new(
                texts
                    .iter()
                    .map(|t| Frame::Texts(vec![(*t).to_string()]))
                    .collect(),
            )
        }
    }

    #[async_trait]
    impl SurfaceDriver for ScriptedDriver {
        async fn switch_to(&self, _surface: &str) -> Result<()> {
            Ok(())
        }

        async fn poll_inbound(&self, _group: &str) -> Result<Vec<InboundMessage>> {
            Ok(Vec::new())
        }

        async fn reply_texts(&self, _selector: &str) -> Result<Vec<String>> {
            let frame = self.frames.lock().unwrap().pop_front();
            match frame {
                Some(Frame::Texts(texts)) => {
                    *self.last.lock().unwrap() = Some(texts.clone());
                    Ok(texts)
                },
                Some(Frame::Transient) => Err(Error::transient("stale element")),
                None => Ok(self.last.lock().unwrap().clone().unwrap_or_default()),
            }
        }

        async fn submit_prompt(&self, _selector: &str, _prompt: &str) -> Result<()> {
            Ok(())
        }

        async fn attach_image(&self, _selector: &str, _path: &Path) -> Result<()> {
            Ok(())
        }

        async fn deliver(&self, _group: &str, _payload: &ReplyPayload) -> Result<()> {
            Ok(())
        }
    }

    fn fast_opts() -> StabilizeOptions {
        StabilizeOptions {
            max_wait: Duration::from_secs(30),
            poll_interval: Duration::from_millis(10),
            stable_checks: 3,
            ..StabilizeOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_reply_stabilizes_after_three_identical_polls() {
        let driver = ScriptedDriver::streaming(&["", "Hel", "Hello", "Hello", "Hello"]);
        let reply = await_reply(&driver, "div.response", 0, &fast_opts())
            .await
            .unwrap();
        assert_eq!(reply, "Hello");
    }

    #[tokio::test(start_paused = true)]
    async fn baseline_replies_are_ignored() {
        // Two pre-existing replies; the candidate only counts past them.
        let old = || vec!["old one".to_string(), "old two".to_string()];
        let full = || {
            let mut v = old();
            v.push("fresh".to_string());
            v
        };
        let driver = ScriptedDriver::new(vec![
            Frame::Texts(old()),
            Frame::Texts(full()),
            Frame::Texts(full()),
            Frame::Texts(full()),
        ]);
        let reply = await_reply(&driver, "div.response", 2, &fast_opts())
            .await
            .unwrap();
        assert_eq!(reply, "fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn generating_marker_resets_the_run() {
        let driver = ScriptedDriver::streaming(&[
            "Generating response",
            "Hello",
            "Hello",
            "Hello",
        ]);
        let reply = await_reply(&driver, "div.response", 0, &fast_opts())
            .await
            .unwrap();
        assert_eq!(reply, "Hello");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_resets_but_does_not_fail() {
        let frame = |t: &str| Frame::Texts(vec![t.to_string()]);
        let driver = ScriptedDriver::new(vec![
            frame("Hello"),
            frame("Hello"),
            Frame::Transient,
            frame("Hello"),
            frame("Hello"),
            frame("Hello"),
        ]);
        let reply = await_reply(&driver, "div.response", 0, &fast_opts())
            .await
            .unwrap();
        assert_eq!(reply, "Hello");
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_reply_never_settles() {
        let driver = ScriptedDriver::new(vec![Frame::Texts(Vec::new())]);
        let opts = StabilizeOptions {
            max_wait: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
            ..fast_opts()
        };
        let err = await_reply(&driver, "div.response", 0, &opts).await.unwrap_err();
        assert!(matches!(err, Error::StabilizeTimeout { .. }));
    }

    #[test]
    fn clean_strips_citations_and_superscripts() {
        assert_eq!(
            clean_reply_text("Rust is fast[1] and safe[12].¹²"),
            "Rust is fast and safe."
        );
    }

    #[test]
    fn clean_drops_source_lines() {
        let raw = "The answer is 42.\nSource: deep thought\nSources: [many]";
        assert_eq!(clean_reply_text(raw), "The answer is 42.");
    }

    #[test]
    fn clean_preserves_line_breaks() {
        let raw = "line one\nline two\n\n\n\nline three";
        assert_eq!(clean_reply_text(raw), "line one\nline two\n\nline three");
    }
}
