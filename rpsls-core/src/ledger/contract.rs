//! ABI surface of the deployed wager contract.

use crate::commitment::{CommitmentHash, Salt};
use crate::types::{Address, Weapon, U256};
use ethers::abi::Token;
use ethers::contract::abigen;

abigen!(
    RPS,
    r#"[
        constructor(bytes32 _c1Hash, address _j2)
        function c1Hash() view returns (bytes32)
        function c2() view returns (uint8)
        function stake() view returns (uint256)
        function lastAction() view returns (uint256)
        function TIMEOUT() view returns (uint256)
        function play(uint8 _c2) payable
        function solve(uint8 _c1, uint256 _salt)
        function j1Timeout()
        function j2Timeout()
    ]"#
);

/// State-changing contract functions.
#[derive(Debug, Clone)]
pub enum ContractCall {
    Play(Weapon),
    Solve { choice: Weapon, salt: Salt },
    J1Timeout,
    J2Timeout,
}

impl ContractCall {
    pub fn function_name(&self) -> &'static str {
        match self {
            ContractCall::Play(_) => "play",
            ContractCall::Solve { .. } => "solve",
            ContractCall::J1Timeout => "j1Timeout",
            ContractCall::J2Timeout => "j2Timeout",
        }
    }
}

/// Raw getter values, before any range checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameReads {
    pub c1_hash: [u8; 32],
    pub c2: u8,
    pub stake: U256,
    pub last_action: U256,
    pub timeout: U256,
}

/// Constructor arguments `(bytes32 c1Hash, address j2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployArgs {
    pub commitment: CommitmentHash,
    pub opponent: Address,
}

impl DeployArgs {
    pub fn tokens(&self) -> Vec<Token> {
        vec![
            Token::FixedBytes(self.commitment.as_bytes().to_vec()),
            Token::Address(self.opponent),
        ]
    }

    /// Creation code followed by the ABI-encoded constructor arguments.
    pub fn init_code(&self, bytecode: &[u8]) -> Vec<u8> {
        let mut code = bytecode.to_vec();
        code.extend(ethers::abi::encode(&self.tokens()));
        code
    }
}

pub fn salt_word(salt: &Salt) -> U256 {
    U256::from_big_endian(salt.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_selectors() {
        let abi = &*RPS_ABI;
        let solve = abi.function("solve").unwrap();
        assert_eq!(solve.signature(), "solve(uint8,uint256)");
        assert_eq!(
            abi.function("j1Timeout").unwrap().short_signature(),
            ethers::utils::id("j1Timeout()")
        );
        assert!(abi.constructor().is_some());
    }

    #[test]
    fn test_init_code_layout() {
        let opponent = Address::from_low_u64_be(0xbb);
        let args = DeployArgs {
            commitment: CommitmentHash([0xaa; 32]),
            opponent,
        };
        let code = args.init_code(&[0x60, 0x80]);
        assert_eq!(code.len(), 2 + 64);
        assert_eq!(&code[..2], &[0x60, 0x80]);
        assert!(code[2..34].iter().all(|b| *b == 0xaa));
        assert!(code[34..46].iter().all(|b| *b == 0));
        assert_eq!(code[65], 0xbb);
    }

    #[test]
    fn test_salt_word_is_big_endian() {
        let mut bytes = [0u8; 32];
        bytes[30] = 0x01;
        bytes[31] = 0x2c;
        assert_eq!(salt_word(&Salt::from_be_bytes(bytes)), U256::from(300u64));
    }
}
