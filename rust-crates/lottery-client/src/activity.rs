use crate::codec::{
    format_percent,
    to_decimal_string,
};
use chrono::{
    DateTime,
    Utc,
};
use ethers::types::H256;
use lottery_abi::LotteryEvent;
use std::collections::VecDeque;

pub const ACTIVITY_CAPACITY: usize = 50;

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct ActivityEntry {
    pub text: String,
    pub tx_hash: Option<H256>,
    pub recorded_at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tx_hash: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn for_tx(text: impl Into<String>, tx_hash: H256) -> Self {
        Self {
            tx_hash: Some(tx_hash),
            ..Self::new(text)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
}

impl ActivityLog {
    pub fn record(&mut self, entry: ActivityEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(ACTIVITY_CAPACITY);
    }

    pub fn seed(&mut self, older: impl IntoIterator<Item = ActivityEntry>) {
        let room = ACTIVITY_CAPACITY.saturating_sub(self.entries.len());
        self.entries.extend(older.into_iter().take(room));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn describe_event(event: &LotteryEvent) -> Option<String> {
    let text = match event {
        LotteryEvent::Result {
            won: true,
            prize_amount,
            ..
        } => format!("Result → WIN {} ETH", to_decimal_string(*prize_amount)),
        LotteryEvent::Result { won: false, .. } => "Result → Loss".to_owned(),
        LotteryEvent::PrizePaid { amount, .. } => {
            format!("PrizePaid → {} ETH", to_decimal_string(*amount))
        }
        LotteryEvent::PrizePending { amount, .. } => {
            format!("PrizePending → {} ETH", to_decimal_string(*amount))
        }
        LotteryEvent::ParamsUpdated {
            prize,
            entry_fee,
            win_chance_ppm,
        } => format!(
            "ParamsUpdated → prize {} ETH, fee {} ETH, chance {}%",
            to_decimal_string(*prize),
            to_decimal_string(*entry_fee),
            format_percent(*win_chance_ppm)
        ),
        LotteryEvent::Unrecognized => return None,
    };
    Some(text)
}
