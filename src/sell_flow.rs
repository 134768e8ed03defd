// 💸 Sell Form - four-step conversation that produces a ListingDraft
//
// name → quality → price → link. Invalid input keeps the form in the same
// state so the surface can re-prompt; nothing is persisted until the caller
// hands the finished draft to `Exchange::publish_draft`.

use crate::entities::{ListingDraft, ListingMetadata};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SELL_STEPS: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SellState {
    CollectingName,
    CollectingQuality,
    CollectingPrice,
    CollectingLink,
    Complete,
}

impl SellState {
    /// 1-based step shown to the user ("Step 2/4"); `None` once complete
    pub fn step_number(&self) -> Option<u8> {
        match self {
            SellState::CollectingName => Some(1),
            SellState::CollectingQuality => Some(2),
            SellState::CollectingPrice => Some(3),
            SellState::CollectingLink => Some(4),
            SellState::Complete => None,
        }
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            SellState::CollectingName => "Enter the skin name, e.g. AK-47 | Redline",
            SellState::CollectingQuality => {
                "Enter the quality, e.g. Factory New, Minimal Wear, Field-Tested"
            }
            SellState::CollectingPrice => "Enter the price in coins (whole number, e.g. 1500)",
            SellState::CollectingLink => {
                "Enter the Steam link to the item, or a short description if there is none"
            }
            SellState::Complete => "Listing ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SellFormError {
    #[error("input must not be empty")]
    Empty,

    #[error("price must be a positive whole number, got {0:?}")]
    InvalidPrice(String),

    #[error("form is already complete")]
    AlreadyComplete,
}

/// What happened to one submitted message
#[derive(Debug, Clone, PartialEq)]
pub enum SellStep {
    /// Moved on; the payload is the new state
    Advanced(SellState),
    /// Stayed put; show the error and the same prompt again
    Reprompt(SellFormError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellForm {
    state: SellState,
    item_name: Option<String>,
    quality: Option<String>,
    price: Option<i64>,
    external_link: Option<String>,
}

impl Default for SellForm {
    fn default() -> Self {
        Self::new()
    }
}

impl SellForm {
    pub fn new() -> Self {
        SellForm {
            state: SellState::CollectingName,
            item_name: None,
            quality: None,
            price: None,
            external_link: None,
        }
    }

    pub fn state(&self) -> SellState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == SellState::Complete
    }

    /// Message for the current step, e.g. "Step 3/4: Enter the price ..."
    pub fn prompt_text(&self) -> String {
        match self.state.step_number() {
            Some(n) => format!("Step {}/{}: {}", n, SELL_STEPS, self.state.prompt()),
            None => self.state.prompt().to_string(),
        }
    }

    /// Feed one user message into the form
    pub fn submit(&mut self, input: &str) -> SellStep {
        let text = input.trim();

        let next = match self.state {
            SellState::Complete => return SellStep::Reprompt(SellFormError::AlreadyComplete),
            _ if text.is_empty() => return SellStep::Reprompt(SellFormError::Empty),
            SellState::CollectingName => {
                self.item_name = Some(text.to_string());
                SellState::CollectingQuality
            }
            SellState::CollectingQuality => {
                self.quality = Some(text.to_string());
                SellState::CollectingPrice
            }
            SellState::CollectingPrice => match parse_price(text) {
                Some(price) => {
                    self.price = Some(price);
                    SellState::CollectingLink
                }
                None => return SellStep::Reprompt(SellFormError::InvalidPrice(text.to_string())),
            },
            SellState::CollectingLink => {
                self.external_link = Some(text.to_string());
                SellState::Complete
            }
        };

        self.state = next;
        SellStep::Advanced(next)
    }

    /// The finished draft, once every step has been answered
    pub fn into_draft(self) -> Option<ListingDraft> {
        if !self.is_complete() {
            return None;
        }

        Some(ListingDraft {
            price: self.price?,
            metadata: ListingMetadata {
                item_name: self.item_name?,
                quality: self.quality?,
                external_link: self.external_link?,
                ..ListingMetadata::default()
            },
        })
    }
}

fn parse_price(text: &str) -> Option<i64> {
    text.parse::<i64>().ok().filter(|p| *p > 0)
}
