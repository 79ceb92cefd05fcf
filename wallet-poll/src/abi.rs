use alloy_sol_types::sol;

sol! {
    function balanceOf(address account) external view returns (uint256);
    function allowance(address owner, address spender) external view returns (uint256);
    function name() external view returns (string);
    function symbol() external view returns (string);
    function decimals() external view returns (uint8);

    function getEthBalance(address addr) external view returns (uint256 balance);
    function getBasefee() external view returns (uint256 basefee);

    struct Call3 { address target; bool allowFailure; bytes callData; }
    struct Result { bool success; bytes returnData; }
    function aggregate3(Call3[] calls) external payable returns (Result[] returnData);
}
