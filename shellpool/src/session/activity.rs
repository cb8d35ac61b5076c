//! Activity detection for captured command output.
//!
//! Scans output lines for phrases that indicate a long-running build phase
//! (compiling, bundling, ...) and for phrases that end one (done, error, ...).
//! The result picks how long a session stays "hot" after its last line.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Phrases that start a build-like phase
pub const DEFAULT_PHASE_MARKERS: &[&str] = &[
    "compiling",
    "building",
    "bundling",
    "transpiling",
    "generating",
    "starting",
];

/// Phrases that cancel a phase marker on the same line
pub const DEFAULT_NULLIFIER_MARKERS: &[&str] = &[
    "compiled",
    "success",
    "finish",
    "complete",
    "succeed",
    "done",
    "end",
    "stop",
    "exit",
    "terminate",
    "error",
    "fail",
];

/// Hot window while a build phase is in progress
pub const BUILDING_COOLDOWN: Duration = Duration::from_millis(15_000);

/// Hot window after any other line
pub const SETTLED_COOLDOWN: Duration = Duration::from_millis(2_000);

static DEFAULT_CLASSIFIER: Lazy<KeywordClassifier> =
    Lazy::new(|| KeywordClassifier::new(DEFAULT_PHASE_MARKERS, DEFAULT_NULLIFIER_MARKERS));

/// What a single line says about the command producing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Still working through a long phase, expect more output later
    Building,
    /// Nothing suggests more output is coming
    Settled,
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activity::Building => write!(f, "building"),
            Activity::Settled => write!(f, "settled"),
        }
    }
}

/// Classifies output lines. Swap implementations to change the hot policy
/// without touching the execution state machine.
pub trait ActivityClassifier: Send + Sync + fmt::Debug {
    fn classify(&self, line: &str) -> Activity;
}

/// Case-insensitive substring matcher over two marker lists.
///
/// A line is [`Activity::Building`] when it contains a phase marker and no
/// nullifier marker.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    phase: Option<Regex>,
    nullifier: Option<Regex>,
}

impl KeywordClassifier {
    pub fn new<S: AsRef<str>>(phase_markers: &[S], nullifier_markers: &[S]) -> Self {
        Self {
            phase: compile_markers(phase_markers),
            nullifier: compile_markers(nullifier_markers),
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        DEFAULT_CLASSIFIER.clone()
    }
}

impl ActivityClassifier for KeywordClassifier {
    fn classify(&self, line: &str) -> Activity {
        let lower = line.to_lowercase();
        let has = |matcher: &Option<Regex>| matcher.as_ref().is_some_and(|re| re.is_match(&lower));

        if has(&self.phase) && !has(&self.nullifier) {
            Activity::Building
        } else {
            Activity::Settled
        }
    }
}

fn compile_markers<S: AsRef<str>>(markers: &[S]) -> Option<Regex> {
    let alternatives: Vec<String> = markers
        .iter()
        .map(|marker| marker.as_ref().trim().to_lowercase())
        .filter(|marker| !marker.is_empty())
        .map(|marker| regex::escape(&marker))
        .collect();
    if alternatives.is_empty() {
        return None;
    }
    // Escaped literals always compile
    Regex::new(&alternatives.join("|")).ok()
}

/// Maps a classified line to the hot window that follows it.
#[derive(Debug, Clone)]
pub struct HotPolicy {
    classifier: Arc<dyn ActivityClassifier>,
    building_cooldown: Duration,
    settled_cooldown: Duration,
}

impl HotPolicy {
    pub fn new(
        classifier: Arc<dyn ActivityClassifier>,
        building_cooldown: Duration,
        settled_cooldown: Duration,
    ) -> Self {
        Self {
            classifier,
            building_cooldown,
            settled_cooldown,
        }
    }

    pub fn classify(&self, line: &str) -> Activity {
        self.classifier.classify(line)
    }

    /// Cooldown to apply after `line` was seen
    pub fn cooldown_for(&self, line: &str) -> Duration {
        match self.classify(line) {
            Activity::Building => self.building_cooldown,
            Activity::Settled => self.settled_cooldown,
        }
    }

    pub fn building_cooldown(&self) -> Duration {
        self.building_cooldown
    }

    pub fn settled_cooldown(&self) -> Duration {
        self.settled_cooldown
    }
}

impl Default for HotPolicy {
    fn default() -> Self {
        Self::new(
            Arc::new(KeywordClassifier::default()),
            BUILDING_COOLDOWN,
            SETTLED_COOLDOWN,
        )
    }
}
