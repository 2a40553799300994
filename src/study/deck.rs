use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::srs::{calculate_next_review, INITIAL_EASE_FACTOR};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashcardRecord {
    pub id: String,
    pub term: String,
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pronunciation: Option<String>,
    pub repetition_count: u32,
    /// Never below 1.3.
    pub ease_factor: f64,
    pub interval_days: u32,
    pub due_at: DateTime<Utc>,
    pub correct_count: u32,
    pub incorrect_count: u32,
}

impl FlashcardRecord {
    /// A fresh card, due immediately.
    pub fn new(term: impl Into<String>, definition: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            term: term.into(),
            definition: definition.into(),
            pronunciation: None,
            repetition_count: 0,
            ease_factor: INITIAL_EASE_FACTOR,
            interval_days: 0,
            due_at: now,
            correct_count: 0,
            incorrect_count: 0,
        }
    }
}

/// A generated deck. Persisted as one blob by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashcardDeck {
    pub id: String,
    pub subject: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_reviewed: Option<DateTime<Utc>>,
    pub cards: Vec<FlashcardRecord>,
}

impl FlashcardDeck {
    pub fn new(subject: impl Into<String>, topic: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subject: subject.into(),
            topic: topic.into(),
            created_at: now,
            last_reviewed: None,
            cards: Vec::new(),
        }
    }

    /// Builds a deck from (term, definition) pairs.
    pub fn generate<I, T, D>(subject: impl Into<String>, topic: impl Into<String>, pairs: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = (T, D)>,
        T: Into<String>,
        D: Into<String>,
    {
        let mut deck = Self::new(subject, topic, now);
        deck.cards = pairs
            .into_iter()
            .map(|(term, definition)| FlashcardRecord::new(term, definition, now))
            .collect();
        deck
    }

    pub fn card(&self, id: &str) -> Option<&FlashcardRecord> {
        self.cards.iter().find(|c| c.id == id)
    }

    /// Grades one card in place. Returns the updated card, or None for an
    /// unknown id.
    pub fn review_card(&mut self, id: &str, quality: u8, now: DateTime<Utc>) -> Option<&FlashcardRecord> {
        let index = self.cards.iter().position(|c| c.id == id)?;
        self.cards[index] = calculate_next_review(&self.cards[index], quality, now);
        self.last_reviewed = Some(now);
        Some(&self.cards[index])
    }
}
