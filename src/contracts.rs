use alloy_sol_types::sol;

sol! {
    interface UniswapV3 {
        function slot0() external view returns (
            uint160 sqrtPriceX96,
            int24 tick,
            uint16 observationIndex,
            uint16 observationCardinality,
            uint16 observationCardinalityNext,
            uint8 feeProtocol,
            bool unlocked
        );

        function token0() external view returns (address);

        function token1() external view returns (address);
    }
}

sol! {
    interface ERC20 {
        function name() external view returns (string);

        function symbol() external view returns (string);

        function decimals() external view returns (uint8);
    }
}

sol! {
    /// tokens predating the ERC-20 string getters (MKR, SAI, ...)
    interface ERC20Bytes32 {
        function name() external view returns (bytes32);

        function symbol() external view returns (bytes32);
    }
}
