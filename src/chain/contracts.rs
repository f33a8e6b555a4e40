use ethers::prelude::abigen;

// Minimal ABIs for the point reads the synchronizers need.

abigen!(
    ERC20,
    r#"[
        function balanceOf(address account) external view returns (uint256)
        function name() external view returns (string)
        function symbol() external view returns (string)
        function decimals() external view returns (uint8)
    ]"#,
);

abigen!(
    MintingPosition,
    r#"[
        function minted() external view returns (uint256)
    ]"#,
);

abigen!(
    Equity,
    r#"[
        function price() external view returns (uint256)
        function totalSupply() external view returns (uint256)
    ]"#,
);

abigen!(
    Stablecoin,
    r#"[
        function minterReserve() external view returns (uint256)
        function balanceOf(address account) external view returns (uint256)
    ]"#,
);

abigen!(
    AuctionHub,
    r#"[
        function price(uint256 number) external view returns (uint256)
    ]"#,
);

abigen!(
    SavingsModule,
    r#"[
        function currentRatePPM() external view returns (uint32)
    ]"#,
);

abigen!(
    PriceFeedAggregator,
    r#"[
        function latestRoundData() external view returns (uint80 roundId, int256 answer, uint256 startedAt, uint256 updatedAt, uint80 answeredInRound)
        function decimals() external view returns (uint8)
    ]"#,
);
