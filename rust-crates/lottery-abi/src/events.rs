use crate::lottery_types::{
    ParamsUpdatedFilter,
    PrizePaidFilter,
    PrizePendingFilter,
    ResultFilter,
};
use ethers::{
    abi::{
        RawLog,
        Token,
        encode,
    },
    contract::EthEvent,
    types::{
        Address,
        H256,
        U256,
    },
};

#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub enum EventKind {
    Result,
    PrizePaid,
    PrizePending,
    ParamsUpdated,
}

impl EventKind {
    pub fn topic(self) -> H256 {
        match self {
            EventKind::Result => ResultFilter::signature(),
            EventKind::PrizePaid => PrizePaidFilter::signature(),
            EventKind::PrizePending => PrizePendingFilter::signature(),
            EventKind::ParamsUpdated => ParamsUpdatedFilter::signature(),
        }
    }

    pub fn is_player_indexed(self) -> bool {
        !matches!(self, EventKind::ParamsUpdated)
    }

    fn from_topic(topic: H256) -> Option<Self> {
        [
            EventKind::Result,
            EventKind::PrizePaid,
            EventKind::PrizePending,
            EventKind::ParamsUpdated,
        ]
        .into_iter()
        .find(|kind| kind.topic() == topic)
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum LotteryEvent {
    Result {
        player: Address,
        won: bool,
        prize_amount: U256,
    },
    PrizePaid {
        to: Address,
        amount: U256,
    },
    PrizePending {
        to: Address,
        amount: U256,
    },
    ParamsUpdated {
        prize: U256,
        entry_fee: U256,
        win_chance_ppm: u32,
    },
    Unrecognized,
}

impl LotteryEvent {
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            LotteryEvent::Result { .. } => Some(EventKind::Result),
            LotteryEvent::PrizePaid { .. } => Some(EventKind::PrizePaid),
            LotteryEvent::PrizePending { .. } => Some(EventKind::PrizePending),
            LotteryEvent::ParamsUpdated { .. } => Some(EventKind::ParamsUpdated),
            LotteryEvent::Unrecognized => None,
        }
    }

    pub fn account(&self) -> Option<Address> {
        match self {
            LotteryEvent::Result { player, .. } => Some(*player),
            LotteryEvent::PrizePaid { to, .. } | LotteryEvent::PrizePending { to, .. } => {
                Some(*to)
            }
            LotteryEvent::ParamsUpdated { .. } | LotteryEvent::Unrecognized => None,
        }
    }
}

impl From<ResultFilter> for LotteryEvent {
    fn from(ev: ResultFilter) -> Self {
        LotteryEvent::Result {
            player: ev.player,
            won: ev.won,
            prize_amount: ev.prize_amount,
        }
    }
}

impl From<PrizePaidFilter> for LotteryEvent {
    fn from(ev: PrizePaidFilter) -> Self {
        LotteryEvent::PrizePaid {
            to: ev.to,
            amount: ev.amount,
        }
    }
}

impl From<PrizePendingFilter> for LotteryEvent {
    fn from(ev: PrizePendingFilter) -> Self {
        LotteryEvent::PrizePending {
            to: ev.to,
            amount: ev.amount,
        }
    }
}

impl From<ParamsUpdatedFilter> for LotteryEvent {
    fn from(ev: ParamsUpdatedFilter) -> Self {
        LotteryEvent::ParamsUpdated {
            prize: ev.prize_wei,
            entry_fee: ev.entry_fee_wei,
            win_chance_ppm: ev.win_chance_ppm,
        }
    }
}

/// Decodes one raw log into its typed event. Logs from other contracts, unknown
/// topics and malformed payloads all come back as [`LotteryEvent::Unrecognized`].
pub fn decode_log(log: &RawLog) -> LotteryEvent {
    let Some(kind) = log.topics.first().copied().and_then(EventKind::from_topic)
    else {
        return LotteryEvent::Unrecognized;
    };
    let decoded = match kind {
        EventKind::Result => {
            <ResultFilter as EthEvent>::decode_log(log).map(LotteryEvent::from)
        }
        EventKind::PrizePaid => {
            <PrizePaidFilter as EthEvent>::decode_log(log).map(LotteryEvent::from)
        }
        EventKind::PrizePending => {
            <PrizePendingFilter as EthEvent>::decode_log(log).map(LotteryEvent::from)
        }
        EventKind::ParamsUpdated => {
            <ParamsUpdatedFilter as EthEvent>::decode_log(log).map(LotteryEvent::from)
        }
    };
    decoded.unwrap_or(LotteryEvent::Unrecognized)
}

pub fn encode_log(event: &LotteryEvent) -> Option<RawLog> {
    let (topics, tokens) = match event {
        LotteryEvent::Result {
            player,
            won,
            prize_amount,
        } => (
            vec![EventKind::Result.topic(), H256::from(*player)],
            vec![Token::Bool(*won), Token::Uint(*prize_amount)],
        ),
        LotteryEvent::PrizePaid { to, amount } => (
            vec![EventKind::PrizePaid.topic(), H256::from(*to)],
            vec![Token::Uint(*amount)],
        ),
        LotteryEvent::PrizePending { to, amount } => (
            vec![EventKind::PrizePending.topic(), H256::from(*to)],
            vec![Token::Uint(*amount)],
        ),
        LotteryEvent::ParamsUpdated {
            prize,
            entry_fee,
            win_chance_ppm,
        } => (
            vec![EventKind::ParamsUpdated.topic()],
            vec![
                Token::Uint(*prize),
                Token::Uint(*entry_fee),
                Token::Uint(U256::from(*win_chance_ppm)),
            ],
        ),
        LotteryEvent::Unrecognized => return None,
    };
    Some(RawLog {
        topics,
        data: encode(&tokens),
    })
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    fn player() -> Address {
        Address::from_low_u64_be(0xa11ce)
    }

    #[test]
    fn decode_log__reads_result_fields() {
        // given
        let event = LotteryEvent::Result {
            player: player(),
            won: true,
            prize_amount: U256::exp10(14),
        };
        let log = encode_log(&event).unwrap();

        // when
        let decoded = decode_log(&log);

        // then
        assert_eq!(decoded, event);
        assert_eq!(decoded.account(), Some(player()));
    }

    #[test]
    fn decode_log__reads_prize_pending() {
        // given
        let event = LotteryEvent::PrizePending {
            to: player(),
            amount: U256::from(42u64),
        };
        let log = encode_log(&event).unwrap();

        // when
        let decoded = decode_log(&log);

        // then
        assert_eq!(decoded.kind(), Some(EventKind::PrizePending));
        assert_eq!(decoded, event);
    }

    #[test]
    fn decode_log__reads_params_update_without_indexed_topic() {
        // given
        let event = LotteryEvent::ParamsUpdated {
            prize: U256::exp10(15),
            entry_fee: U256::zero(),
            win_chance_ppm: 10_000,
        };
        let log = encode_log(&event).unwrap();

        // when
        let decoded = decode_log(&log);

        // then
        assert_eq!(log.topics.len(), 1);
        assert_eq!(decoded, event);
        assert_eq!(decoded.account(), None);
    }

    #[test]
    fn decode_log__unknown_topic_is_unrecognized() {
        // given
        let log = RawLog {
            topics: vec![H256::repeat_byte(0x11)],
            data: Vec::new(),
        };

        // when
        let decoded = decode_log(&log);

        // then
        assert_eq!(decoded, LotteryEvent::Unrecognized);
    }

    #[test]
    fn decode_log__truncated_payload_is_unrecognized() {
        // given
        let mut log = encode_log(&LotteryEvent::PrizePaid {
            to: player(),
            amount: U256::one(),
        })
        .unwrap();
        log.data.truncate(5);

        // when
        let decoded = decode_log(&log);

        // then
        assert_eq!(decoded, LotteryEvent::Unrecognized);
    }

    #[test]
    fn decode_log__log_without_topics_is_unrecognized() {
        let log = RawLog {
            topics: Vec::new(),
            data: vec![0u8; 32],
        };
        assert_eq!(decode_log(&log), LotteryEvent::Unrecognized);
    }

    #[test]
    fn topic__is_distinct_per_kind() {
        let topics = [
            EventKind::Result.topic(),
            EventKind::PrizePaid.topic(),
            EventKind::PrizePending.topic(),
            EventKind::ParamsUpdated.topic(),
        ];
        for (i, a) in topics.iter().enumerate() {
            for b in topics.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
