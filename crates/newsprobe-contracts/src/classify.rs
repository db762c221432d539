use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Affirmative sharing expressions, matched as lower-cased substrings.
pub const AFFIRMATIVE_PHRASES: &[&str] = &[
    "i would share",
    "i'd share",
    "i would repost",
    "i'd repost",
    "i would retweet",
    "i will share",
    "i would definitely share",
    "i would likely share",
    "i am inclined to share",
    "it's worth sharing",
    "is worth sharing",
    "i would forward",
    "yes, i would",
    "yes i would",
    "yes it's",
    "yes, it's",
];

/// Negative sharing expressions, matched as lower-cased substrings.
pub const NEGATIVE_PHRASES: &[&str] = &[
    "i would not share",
    "i wouldn't share",
    "i would not repost",
    "i wouldn't repost",
    "i will not share",
    "i won't share",
    "not worth sharing",
    "i would refrain from sharing",
    "i would avoid sharing",
    "not recommend sharing",
    "i don't share",
    "i do not share",
    "i would not forward",
    "hesitant to share",
    "i would not spread",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reply {
    Yes,
    No,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("contradicting reply: {0:?}")]
    Contradiction(String),
    #[error("unclear reply to yes/no question: {0:?}")]
    Unclear(String),
}

/// Three parallel flag arrays, exactly one `true` per completion index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationArrays {
    pub yes: Vec<bool>,
    pub no: Vec<bool>,
    pub unknown: Vec<bool>,
}

impl ClassificationArrays {
    pub fn push(&mut self, reply: Reply) {
        self.yes.push(reply == Reply::Yes);
        self.no.push(reply == Reply::No);
        self.unknown.push(reply == Reply::Unknown);
    }

    pub fn extend(&mut self, other: ClassificationArrays) {
        self.yes.extend(other.yes);
        self.no.extend(other.no);
        self.unknown.extend(other.unknown);
    }

    pub fn len(&self) -> usize {
        self.yes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.yes.is_empty()
    }

    pub fn yes_count(&self) -> usize {
        self.yes.iter().filter(|flag| **flag).count()
    }

    /// Share of `yes` replies; `None` for an empty set.
    pub fn yes_fraction(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some(self.yes_count() as f64 / self.len() as f64)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyClassifier {
    /// Abort on contradictions and unclear replies instead of counting them
    /// as unknown.
    pub strict: bool,
}

impl ReplyClassifier {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn classify(&self, completion: &str) -> Result<Reply, ClassifyError> {
        let lowered = completion.to_lowercase();

        if lowered.contains("<yes>") {
            return Ok(Reply::Yes);
        }
        if lowered.contains("<no>") {
            return Ok(Reply::No);
        }
        if lowered.starts_with("yes") {
            return Ok(Reply::Yes);
        }
        if lowered.starts_with("no") {
            return Ok(Reply::No);
        }

        let affirmative = AFFIRMATIVE_PHRASES
            .iter()
            .any(|phrase| lowered.contains(phrase));
        let negative = NEGATIVE_PHRASES
            .iter()
            .any(|phrase| lowered.contains(phrase));
        match (affirmative, negative) {
            (true, false) => Ok(Reply::Yes),
            (false, true) => Ok(Reply::No),
            (true, true) => {
                warn!(reply = %completion, "contradicting reply, counted as unknown");
                if self.strict {
                    return Err(ClassifyError::Contradiction(completion.to_string()));
                }
                Ok(Reply::Unknown)
            }
            (false, false) => {
                warn!(reply = %completion, "unclear reply to yes/no question, counted as unknown");
                if self.strict {
                    return Err(ClassifyError::Unclear(completion.to_string()));
                }
                Ok(Reply::Unknown)
            }
        }
    }

    pub fn check_reply<S: AsRef<str>>(
        &self,
        completions: &[S],
    ) -> Result<ClassificationArrays, ClassifyError> {
        let mut arrays = ClassificationArrays::default();
        for completion in completions {
            arrays.push(self.classify(completion.as_ref())?);
        }
        Ok(arrays)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use super::{ClassificationArrays, ClassifyError, Reply, ReplyClassifier};

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Classifies `reply` leniently and returns whatever got logged.
    fn logged_while_classifying(reply: &str) -> anyhow::Result<(Reply, String)> {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let reply = tracing::subscriber::with_default(subscriber, || {
            ReplyClassifier::default().classify(reply)
        })?;
        let logs = String::from_utf8(buffer.0.lock().unwrap().clone())?;
        Ok((reply, logs))
    }

    const SAMPLES: &[&str] = &[
        "<YES> I would share this",
        "<no>",
        "yes, I think this is credible",
        "No.",
        "Nothing to add",
        "I would not recommend sharing this, but yes it's interesting",
        "This article discusses local weather patterns.",
        "Honestly I'd share it with my friends.",
        "I wouldn't share something like that.",
        "",
        "   yes",
    ];

    #[test]
    fn every_reply_lands_in_exactly_one_array() -> anyhow::Result<()> {
        let classifier = ReplyClassifier::default();
        for sample in SAMPLES {
            let arrays = classifier.check_reply(&[*sample])?;
            let flags = [arrays.yes[0], arrays.no[0], arrays.unknown[0]];
            assert_eq!(flags.iter().filter(|flag| **flag).count(), 1, "{sample:?}");
        }
        Ok(())
    }

    #[test]
    fn tag_wins_over_contradicting_phrases() -> anyhow::Result<()> {
        let classifier = ReplyClassifier::default();
        assert_eq!(classifier.classify("<YES> I would share this")?, Reply::Yes);
        assert_eq!(
            classifier.classify("<yes> i would share, though i wouldn't share it widely")?,
            Reply::Yes
        );
        assert_eq!(classifier.classify("Sure <no>")?, Reply::No);
        Ok(())
    }

    #[test]
    fn prefix_is_checked_without_trimming() -> anyhow::Result<()> {
        let classifier = ReplyClassifier::default();
        assert_eq!(classifier.classify("yes, I think this is credible")?, Reply::Yes);
        assert_eq!(classifier.classify("No, it looks fake")?, Reply::No);
        assert_eq!(classifier.classify("   yes")?, Reply::Unknown);
        Ok(())
    }

    #[test]
    fn phrase_lists_decide_when_no_tag_or_prefix() -> anyhow::Result<()> {
        let classifier = ReplyClassifier::default();
        assert_eq!(classifier.classify("Honestly I'd share it.")?, Reply::Yes);
        assert_eq!(
            classifier.classify("As a reader I wouldn't share this.")?,
            Reply::No
        );
        assert_eq!(
            classifier
                .classify("I would not recommend sharing this, but yes it's interesting")?,
            Reply::Unknown
        );
        assert_eq!(
            classifier.classify("This article discusses local weather patterns.")?,
            Reply::Unknown
        );
        Ok(())
    }

    #[test]
    fn lenient_mode_warns_about_gaps() -> anyhow::Result<()> {
        let (reply, logs) = logged_while_classifying(
            "I would not recommend sharing this, but yes it's interesting",
        )?;
        assert_eq!(reply, Reply::Unknown);
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("contradicting reply"), "{logs}");

        let (reply, logs) =
            logged_while_classifying("This article discusses local weather patterns.")?;
        assert_eq!(reply, Reply::Unknown);
        assert!(logs.contains("unclear reply to yes/no question"), "{logs}");

        let (reply, logs) = logged_while_classifying("<yes>")?;
        assert_eq!(reply, Reply::Yes);
        assert!(logs.is_empty(), "{logs}");
        Ok(())
    }

    #[test]
    fn strict_mode_surfaces_gaps_as_errors() {
        let classifier = ReplyClassifier::new(true);
        let err = classifier
            .check_reply(&["yes", "I would not recommend sharing this, but yes it's interesting"])
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Contradiction(_)));

        let err = classifier
            .classify("This article discusses local weather patterns.")
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Unclear(_)));
    }

    #[test]
    fn fraction_counts_only_yes() {
        let mut arrays = ClassificationArrays::default();
        assert_eq!(arrays.yes_fraction(), None);
        for reply in [Reply::Yes, Reply::No, Reply::Unknown, Reply::Yes] {
            arrays.push(reply);
        }
        assert_eq!(arrays.len(), 4);
        assert_eq!(arrays.yes_fraction(), Some(0.5));
    }
}
