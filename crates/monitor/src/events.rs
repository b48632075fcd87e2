//! Classification of bridge-contract logs into transfer legs.

use bridge_monitor_domain::config::ChainSpec;
use bridge_monitor_domain::{decode_for_token, DecodeError, LegAction, TransferId, TransferLeg};
use ethers::contract::{parse_log, EthEvent, EthLogDecode};
use ethers::types::{Address, Log, H256};

/// `TokenBurnExecuted(bytes32 indexed reqId, address indexed proposer)`
#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(name = "TokenBurnExecuted", abi = "TokenBurnExecuted(bytes32,address)")]
pub struct TokenBurnExecuted {
    #[ethevent(indexed)]
    pub req_id: [u8; 32],
    #[ethevent(indexed)]
    pub proposer: Address,
}

/// `TokenMintExecuted(bytes32 indexed reqId, address indexed recipient)`
#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(name = "TokenMintExecuted", abi = "TokenMintExecuted(bytes32,address)")]
pub struct TokenMintExecuted {
    #[ethevent(indexed)]
    pub req_id: [u8; 32],
    #[ethevent(indexed)]
    pub recipient: Address,
}

/// Indexed payload shared by both recognised events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegEvent {
    pub identifier: [u8; 32],
    /// Recipient for mints, proposer for burns.
    pub counterpart: Address,
    pub tx_hash: H256,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Burn(LegEvent),
    Mint(LegEvent),
    Unrecognized,
}

impl BridgeEvent {
    /// Classifies a log by topic0. Logs from other events, reorged-out logs
    /// and logs without both indexed arguments are `Unrecognized`.
    pub fn decode(log: &Log) -> Result<Self, DecodeError> {
        if log.removed == Some(true) || log.topics.len() < 3 {
            return Ok(Self::Unrecognized);
        }
        let topic0 = log.topics[0];
        if topic0 == TokenBurnExecuted::signature() {
            let event: TokenBurnExecuted = decode_typed(log)?;
            Ok(Self::Burn(leg_event(log, event.req_id, event.proposer)?))
        } else if topic0 == TokenMintExecuted::signature() {
            let event: TokenMintExecuted = decode_typed(log)?;
            Ok(Self::Mint(leg_event(log, event.req_id, event.recipient)?))
        } else {
            Ok(Self::Unrecognized)
        }
    }
}

fn decode_typed<E: EthLogDecode>(log: &Log) -> Result<E, DecodeError> {
    parse_log(log.clone()).map_err(|err| DecodeError::MalformedIdentifier(err.to_string()))
}

fn leg_event(log: &Log, identifier: [u8; 32], counterpart: Address) -> Result<LegEvent, DecodeError> {
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| DecodeError::MalformedIdentifier("log has no transaction hash".into()))?;
    Ok(LegEvent {
        identifier,
        counterpart,
        tx_hash,
        block_number: log.block_number.map(|block| block.as_u64()),
    })
}

/// What a single log contributes to reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegExtraction {
    Leg(TransferLeg),
    /// A bridge event for an asset this chain is not configured to track.
    ForeignToken,
    Unrecognized,
}

/// Runs the event classification and the identifier codec for one log.
pub fn extract_leg(log: &Log, chain: &ChainSpec) -> Result<LegExtraction, DecodeError> {
    let (action, event) = match BridgeEvent::decode(log)? {
        BridgeEvent::Burn(event) => (LegAction::Burn, event),
        BridgeEvent::Mint(event) => (LegAction::Mint, event),
        BridgeEvent::Unrecognized => return Ok(LegExtraction::Unrecognized),
    };

    let Some(decoded) = decode_for_token(&event.identifier, chain.token_index, chain.token_decimals)?
    else {
        return Ok(LegExtraction::ForeignToken);
    };

    Ok(LegExtraction::Leg(TransferLeg {
        transfer_id: TransferId::from_bytes(&event.identifier),
        chain: chain.name.clone(),
        action,
        amount: decoded.amount,
        created_time: decoded.created_time,
        tx_hash: format!("{:#x}", event.tx_hash),
    }))
}
