//! "Thinking" narration shown while the assistant works on a request.

use std::future::Future;

use crate::progress::{ProgressHandle, ProgressSimulator};

/// Narration templates; `{topic}` is replaced with the user's subject.
const REASONING_TEMPLATES: [&str; 6] = [
    "Reading your request about {topic}...",
    "Thinking about what makes {topic} interesting...",
    "Considering a few directions for {topic}...",
    "Weighing styles that suit {topic}...",
    "Putting the ideas together...",
    "Almost there...",
];

/// Longest topic excerpt kept in narration.
const TOPIC_MAX_CHARS: usize = 40;

/// Narration phases for `topic`.
pub fn reasoning_phases(topic: &str) -> Vec<String> {
    let topic = short_topic(topic);
    REASONING_TEMPLATES
        .iter()
        .map(|t| t.replace("{topic}", &topic))
        .collect()
}

/// Trim `topic` to a short single-line excerpt, cut on a word boundary.
fn short_topic(topic: &str) -> String {
    let flat: String = topic.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.is_empty() {
        return "this".to_owned();
    }
    if flat.chars().count() <= TOPIC_MAX_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(TOPIC_MAX_CHARS).collect();
    let cut = match cut.rfind(' ') {
        Some(pos) if pos > 0 => &cut[..pos],
        _ => cut.as_str(),
    };
    format!("{cut}...")
}

/// Narrate reasoning about `topic` while `job` runs.
pub fn run_reasoning<P, F, T, C>(
    simulator: &ProgressSimulator,
    topic: &str,
    on_phase: P,
    job: F,
    on_complete: C,
) -> ProgressHandle<T>
where
    P: FnMut(&str, u8) + Send + 'static,
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
    C: FnOnce(&T) + Send + 'static,
{
    simulator.run(reasoning_phases(topic), on_phase, job, on_complete)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn topic_is_interpolated() {
        let phases = reasoning_phases("  space\n cats ");
        assert_eq!(phases.len(), REASONING_TEMPLATES.len());
        assert_eq!(phases[0], "Reading your request about space cats...");
        assert!(phases.iter().all(|p| !p.contains("{topic}")));
    }

    #[test]
    fn long_topic_is_shortened_on_word_boundary() {
        let topic = "a very long description of a birthday party poster with balloons";
        let short = short_topic(topic);
        assert!(short.ends_with("..."));
        assert!(short.chars().count() <= TOPIC_MAX_CHARS + 3);
        assert!(topic.starts_with(short.trim_end_matches("...")));
    }

    #[test]
    fn empty_topic_has_placeholder() {
        assert_eq!(short_topic("   "), "this");
    }

    #[tokio::test]
    async fn narration_is_strictly_increasing() {
        let pcts = Arc::new(Mutex::new(Vec::new()));
        let p = Arc::clone(&pcts);
        let handle = run_reasoning(
            &ProgressSimulator::new(Duration::from_millis(2)),
            "dragons",
            move |_, pct| p.lock().unwrap().push(pct),
            async { "reply" },
            |_| {},
        );
        assert_eq!(handle.wait().await, Some("reply"));
        let pcts = pcts.lock().unwrap();
        assert_eq!(pcts.len(), 6);
        assert!(pcts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(pcts.last(), Some(&100));
    }
}
