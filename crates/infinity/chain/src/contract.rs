//! Bindings for the Infinity PoW contract.

use alloy_sol_types::sol;

sol! {
    /// Uncompressed secp256k1 point
    #[derive(Debug, PartialEq, Eq)]
    struct ECCPoint {
        uint256 x;
        uint256 y;
    }

    /// PoW contract interface
    #[derive(Debug, PartialEq, Eq)]
    interface PoW {
        /// Emitted whenever a new problem is opened
        event NewProblem(uint256 nonce, uint256 privateKeyA, uint256 difficulty);

        /// Emitted when a claim for problem `nonce` is accepted
        event ProblemSolved(address indexed solver, uint256 indexed nonce);

        /// The problem currently open
        function currentProblem() external view returns (uint256 nonce, uint256 privateKeyA, uint256 difficulty);

        /// Claim the current problem with `publicKeyB`
        function submit(address recipient, ECCPoint publicKeyB, bytes signature, bytes data) external;
    }
}
