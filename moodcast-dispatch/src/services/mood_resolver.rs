//! Emotion label to mood mapping

use moodcast_common::config::MoodsConfig;
use moodcast_common::MoodKey;
use std::collections::HashMap;

/// Total mapping from detector labels to moods
///
/// Lookups ignore case and surrounding whitespace. Labels missing from the
/// table resolve to the default mood.
#[derive(Debug, Clone)]
pub struct MoodResolver {
    table: HashMap<String, MoodKey>,
    default: MoodKey,
}

impl MoodResolver {
    pub fn new<I, S>(table: I, default: MoodKey) -> Self
    where
        I: IntoIterator<Item = (S, MoodKey)>,
        S: AsRef<str>,
    {
        Self {
            table: table
                .into_iter()
                .map(|(label, mood)| (normalize(label.as_ref()), mood))
                .collect(),
            default,
        }
    }

    pub fn from_config(config: &MoodsConfig) -> Self {
        Self::new(config.emotions.iter().map(|(k, v)| (k.as_str(), *v)), config.default)
    }

    pub fn resolve(&self, label: &str) -> MoodKey {
        self.table
            .get(&normalize(label))
            .copied()
            .unwrap_or(self.default)
    }

    pub fn default_mood(&self) -> MoodKey {
        self.default
    }

    /// Known labels, sorted
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.table.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }
}

impl Default for MoodResolver {
    fn default() -> Self {
        Self::from_config(&MoodsConfig::default())
    }
}

fn normalize(label: &str) -> String {
    label.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let resolver = MoodResolver::default();
        let expected = [
            ("happy", MoodKey::Happy),
            ("neutral", MoodKey::Calm),
            ("sad", MoodKey::Sad),
            ("angry", MoodKey::Angry),
            ("disgust", MoodKey::Angry),
            ("fear", MoodKey::Calm),
            ("surprise", MoodKey::Energy),
        ];
        for (label, mood) in expected {
            assert_eq!(resolver.resolve(label), mood, "label {}", label);
        }
        assert_eq!(resolver.labels().len(), expected.len());
    }

    #[test]
    fn test_lookup_ignores_case_and_whitespace() {
        let resolver = MoodResolver::default();
        assert_eq!(resolver.resolve("  SURPRISE\n"), MoodKey::Energy);
        assert_eq!(resolver.resolve("Fear"), MoodKey::Calm);
    }

    #[test]
    fn test_unknown_and_empty_labels_use_default() {
        let resolver = MoodResolver::default();
        assert_eq!(resolver.default_mood(), MoodKey::Calm);
        assert_eq!(resolver.resolve("contempt"), MoodKey::Calm);
        assert_eq!(resolver.resolve(""), MoodKey::Calm);
    }

    #[test]
    fn test_custom_table_and_default() {
        let resolver = MoodResolver::new([("Fear", MoodKey::Surprise), ("happy", MoodKey::Energy)], MoodKey::Nostalgia);
        assert_eq!(resolver.resolve("fear"), MoodKey::Surprise);
        assert_eq!(resolver.resolve("happy"), MoodKey::Energy);
        assert_eq!(resolver.resolve("sad"), MoodKey::Nostalgia);
        assert_eq!(resolver.labels(), vec!["fear", "happy"]);
    }
}
