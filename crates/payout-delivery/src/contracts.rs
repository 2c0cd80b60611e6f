//! Solidity interfaces of the contracts payouts interact with.

use alloy::sol;

sol! {
	interface IERC20 {
		function name() external view returns (string);
		function symbol() external view returns (string);
		function decimals() external view returns (uint8);
		function balanceOf(address account) external view returns (uint256);
		function transfer(address to, uint256 amount) external returns (bool);
	}

	/// Platform reward NFT, an ERC-1155 with owner-only minting.
	interface IRewardNft {
		function balanceOf(address account, uint256 id) external view returns (uint256);
		function mint(address to, uint256 id, uint256 amount, bytes data) external;
		function batchMint(address[] to, uint256[] ids, uint256[] amounts, bytes data) external;
	}
}
