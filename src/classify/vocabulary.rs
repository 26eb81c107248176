//! Fixed, ordered chord label set shared by the lifecycle manager and the
//! classifier.

/// Label the sentinel class carries inside the vocabulary.
pub const NO_CHORD: &str = "no_chord";

/// Label reported externally for low-confidence or no-chord outcomes.
pub const UNKNOWN: &str = "unknown";

/// Index-addressable chord label set, ending with the `no_chord` sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordVocabulary {
    labels: Vec<String>,
}

impl ChordVocabulary {
    /// A custom label set. The sentinel is appended when missing.
    pub fn new(mut labels: Vec<String>) -> Self {
        if labels.last().map(String::as_str) != Some(NO_CHORD) {
            labels.push(NO_CHORD.to_string());
        }
        Self { labels }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// True when `index` is the sentinel class.
    pub fn is_sentinel(&self, index: usize) -> bool {
        self.label(index) == Some(NO_CHORD)
    }
}

impl Default for ChordVocabulary {
    /// The standard guitar vocabulary: open and common barre chords,
    /// dominant sevenths, minors, common flats, plus the sentinel.
    fn default() -> Self {
        let labels = [
            "C", "D", "E", "G", "A", "Am", "Dm", "Em", "Bm", "F", "B", "C7", "D7", "E7", "A7",
            "G7", "Cm", "Gm", "Fm", "Bb", "Eb", "Ab", NO_CHORD,
        ];
        Self {
            labels: labels.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_vocabulary_ends_with_sentinel() {
        let vocab = ChordVocabulary::default();
        assert_eq!(vocab.len(), 23);
        assert_eq!(vocab.label(vocab.len() - 1), Some(NO_CHORD));
        assert!(vocab.is_sentinel(vocab.len() - 1));
    }

    #[test]
    fn index_round_trips() {
        let vocab = ChordVocabulary::default();
        let idx = vocab.index_of("Am").unwrap();
        assert_eq!(vocab.label(idx), Some("Am"));
    }

    #[test]
    fn custom_vocabulary_gets_sentinel_appended() {
        let vocab = ChordVocabulary::new(vec!["C".into(), "G".into()]);
        assert_eq!(vocab.len(), 3);
        assert!(vocab.is_sentinel(2));
    }

    #[test]
    fn sentinel_is_not_appended_twice() {
        let vocab = ChordVocabulary::new(vec!["C".into(), NO_CHORD.into()]);
        assert_eq!(vocab.len(), 2);
    }
}
