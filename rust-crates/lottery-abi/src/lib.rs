pub mod lottery_types {
    use ethers::prelude::abigen;

    abigen!(
        Lottery,
        r#"[
            function prizeWei() external view returns (uint256)
            function entryFeeWei() external view returns (uint256)
            function winChancePpm() external view returns (uint32)
            function owner() external view returns (address)
            function contractBalance() external view returns (uint256)
            function get_user_last_played_block(address user) external view returns (uint64)
            function get_pending_prizes(address user) external view returns (uint256)
            function get_can_play(address user) external view returns (bool)
            function get_next_allowed_block(address user) external view returns (uint64)
            function play(uint256 userSalt) external payable returns (bool)
            function claim() external
            function fund() external payable
            function ownerWithdraw(uint256 amount) external
            function setParams(uint256 prizeWei, uint256 feeWei, uint32 winChancePpm) external
            event Result(address indexed player, bool won, uint256 prize_amount)
            event PrizePaid(address indexed to, uint256 amount)
            event PrizePending(address indexed to, uint256 amount)
            event ParamsUpdated(uint256 prize_wei, uint256 entry_fee_wei, uint32 win_chance_ppm)
        ]"#
    );
}

pub mod events;

pub use events::{
    EventKind,
    LotteryEvent,
    decode_log,
    encode_log,
};
pub use lottery_types::Lottery;
