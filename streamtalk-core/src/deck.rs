// ABOUTME: 78-card deck used by the reading session: 22 major arcana plus four 14-card suits
// ABOUTME: Each card gets a random orientation and the deck is shuffled when a session starts

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const DECK_SIZE: usize = 78;

const MAJOR: [&str; 22] = [
    "fool",
    "magician",
    "high_priestess",
    "empress",
    "emperor",
    "hierophant",
    "lovers",
    "chariot",
    "strength",
    "hermit",
    "wheel_of_fortune",
    "justice",
    "hanged_man",
    "death",
    "temperance",
    "devil",
    "tower",
    "star",
    "moon",
    "sun",
    "judgement",
    "world",
];

const SUITS: [&str; 4] = ["cups", "pentacles", "swords", "wands"];
const COURT: [&str; 4] = ["page", "knight", "queen", "king"];
const RANKS: [&str; 10] = [
    "Ace", "Two", "Three", "Four", "Five", "Six", "Seven", "Eight", "Nine", "Ten",
];

/// Every card id in canonical order
pub fn card_ids() -> Vec<String> {
    let mut ids: Vec<String> = MAJOR.iter().map(|s| s.to_string()).collect();
    for suit in SUITS {
        ids.extend((1..=10).map(|n| format!("{}_{}", suit, n)));
        ids.extend(COURT.iter().map(|c| format!("{}_{}", suit, c)));
    }
    ids
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub reversed: bool,
}

impl Card {
    /// Human-readable name, e.g. "Wheel Of Fortune" or "Three of Cups"
    pub fn display_name(&self) -> String {
        match self.id.split_once('_') {
            Some((suit, rank)) if SUITS.contains(&suit) => {
                let rank = match rank.parse::<usize>() {
                    Ok(n) if (1..=10).contains(&n) => RANKS[n - 1].to_string(),
                    _ => title_case(rank),
                };
                format!("{} of {}", rank, title_case(suit))
            }
            _ => title_case(&self.id),
        }
    }

    /// Name plus orientation, as given to the model
    pub fn describe(&self) -> String {
        if self.reversed {
            format!("{} (reversed)", self.display_name())
        } else {
            format!("{} (upright)", self.display_name())
        }
    }
}

fn title_case(id: &str) -> String {
    id.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deck {
    cards: Vec<Card>,
}

impl Deck {
    /// Canonical order, all upright
    pub fn ordered() -> Self {
        Self {
            cards: card_ids()
                .into_iter()
                .map(|id| Card {
                    id,
                    reversed: false,
                })
                .collect(),
        }
    }

    /// Random orientation per card, then shuffled
    pub fn shuffled<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut cards: Vec<Card> = card_ids()
            .into_iter()
            .map(|id| Card {
                id,
                reversed: rng.gen_bool(0.5),
            })
            .collect();
        cards.shuffle(rng);
        Self { cards }
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Card at a 1-based position
    pub fn card_at(&self, position: usize) -> Option<&Card> {
        position.checked_sub(1).and_then(|i| self.cards.get(i))
    }

    /// Resolve 1-based positions; out-of-range positions are skipped
    pub fn resolve(&self, positions: &[usize]) -> Vec<Card> {
        positions
            .iter()
            .filter_map(|&p| self.card_at(p).cloned())
            .collect()
    }
}
