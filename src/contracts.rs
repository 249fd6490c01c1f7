//! Solidity bindings of the contracts the engine calls.

use alloy::sol;

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IERC20 {
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IPermit2 {
        function nonceBitmap(address owner, uint256 wordPos) external view returns (uint256);
    }
}

sol! {
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    #[sol(rpc)]
    interface IBatchDonations {
        struct Donation {
            address project;
            uint256 ethAmount;
            address token;
            uint256 tokenAmount;
        }

        struct TokenPermissions {
            address token;
            uint256 amount;
        }

        /// Contract-side permit: the spender is implied by the caller.
        struct PermitBatchTransferFrom {
            TokenPermissions[] permitted;
            uint256 nonce;
            uint256 deadline;
        }

        function batchDonate(Donation[] donations) external payable;

        function batchDonateWithPermit(
            Donation[] donations,
            PermitBatchTransferFrom permit,
            bytes signature
        ) external payable;
    }
}
