//! User-facing state derived from engine events.

use serde::Serialize;

use crate::FlipEvent;

/// What a front end shows: account, balance, transaction link, result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DisplayState {
    pub account: Option<String>,
    pub balance: Option<String>,
    pub tx_link: Option<String>,
    pub confirmed_block: Option<u64>,
    pub result_message: Option<String>,
    pub result_amount: Option<String>,
    /// Last error notice, labelled with the failed stage.
    pub notice: Option<String>,
}

impl DisplayState {
    pub fn apply(&mut self, event: &FlipEvent) {
        match event {
            FlipEvent::Connected { account, balance } => {
                *self = DisplayState {
                    account: Some(account.to_string()),
                    balance: Some(balance.to_string()),
                    ..Default::default()
                };
            }
            FlipEvent::Disconnected => {
                *self = DisplayState::default();
            }
            FlipEvent::Submitted { explorer_url, .. } => {
                self.tx_link = Some(explorer_url.clone());
                self.confirmed_block = None;
                self.result_message = None;
                self.result_amount = None;
                self.notice = None;
            }
            FlipEvent::Confirmed { block_number, .. } => {
                self.confirmed_block = Some(*block_number);
            }
            FlipEvent::Outcome { message, amount, .. } => {
                self.result_message = Some(message.clone());
                self.result_amount = Some(amount.clone());
            }
            FlipEvent::BalanceRefreshed { balance } => {
                self.balance = Some(balance.to_string());
            }
            FlipEvent::Failed { stage, message } => {
                self.notice = Some(format!("{}: {}", stage, message));
            }
        }
    }

    /// Collapse a sequence of events into the resulting state.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a FlipEvent>) -> Self {
        let mut state = Self::default();
        for event in events {
            state.apply(event);
        }
        state
    }
}
