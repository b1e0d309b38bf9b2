//! Transfer events and bridge vault contract bindings
//!
//! Both ledgers run a `BridgeVault` contract. On the source ledger it emits
//! `Locked` when a user deposits the native coin or the token; on the
//! destination ledger it emits `Burned` when a user burns a wrapped asset.

use crate::error::{BridgeError, BridgeResult};

use ethers::contract::{abigen, parse_log, EthEvent};
use ethers::types::{Log, H256, U256};
use std::fmt;

abigen!(
    BridgeVault,
    r#"[
        event Locked(address indexed user, uint8 asset, uint256 amount, string destination)
        event Burned(address indexed user, uint8 asset, uint256 amount, string destination)
        function unlock(uint8 asset, address to, uint256 amount)
        function mint(uint8 asset, uint256 amount)
        function transferWrapped(uint8 asset, address to, uint256 amount)
    ]"#
);

/// One of the two bridged assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Asset {
    Native,
    Token,
}

impl Asset {
    /// Asset discriminator used by the vault contract
    pub fn code(self) -> u8 {
        match self {
            Asset::Native => 0,
            Asset::Token => 1,
        }
    }

    pub fn from_code(code: u8) -> BridgeResult<Self> {
        match code {
            0 => Ok(Asset::Native),
            1 => Ok(Asset::Token),
            other => Err(BridgeError::EventParsing(format!("unknown asset code {}", other))),
        }
    }
}

/// The four event kinds the bridge loop reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NativeLocked,
    TokenLocked,
    WrappedNativeBurned,
    WrappedTokenBurned,
}

impl EventKind {
    /// Get event name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::NativeLocked => "native_locked",
            EventKind::TokenLocked => "token_locked",
            EventKind::WrappedNativeBurned => "wrapped_native_burned",
            EventKind::WrappedTokenBurned => "wrapped_token_burned",
        }
    }

    pub fn asset(&self) -> Asset {
        match self {
            EventKind::NativeLocked | EventKind::WrappedNativeBurned => Asset::Native,
            EventKind::TokenLocked | EventKind::WrappedTokenBurned => Asset::Token,
        }
    }
}

/// A transfer intent observed on one ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    /// Account that locked or burned funds
    pub user: String,
    pub amount: U256,
    /// Recipient on the opposite ledger
    pub destination: String,
}

impl TransferEvent {
    pub fn new(user: impl Into<String>, amount: impl Into<U256>, destination: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            amount: amount.into(),
            destination: destination.into(),
        }
    }
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.user, self.destination, self.amount)
    }
}

/// Which side of the bridge a vault contract sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultRole {
    /// Emits `Locked`
    Source,
    /// Emits `Burned`
    Destination,
}

impl VaultRole {
    /// Topic0 of the event this role listens for
    pub fn topic(&self) -> H256 {
        match self {
            VaultRole::Source => LockedFilter::signature(),
            VaultRole::Destination => BurnedFilter::signature(),
        }
    }

    fn kind_for(&self, asset: Asset) -> EventKind {
        match (self, asset) {
            (VaultRole::Source, Asset::Native) => EventKind::NativeLocked,
            (VaultRole::Source, Asset::Token) => EventKind::TokenLocked,
            (VaultRole::Destination, Asset::Native) => EventKind::WrappedNativeBurned,
            (VaultRole::Destination, Asset::Token) => EventKind::WrappedTokenBurned,
        }
    }
}

/// Decodes vault logs into transfer events
pub struct EventParser {
    role: VaultRole,
}

impl EventParser {
    pub fn new(role: VaultRole) -> Self {
        Self { role }
    }

    /// Parse a log entry; `Ok(None)` for logs of other event types
    pub fn parse_log(&self, log: &Log) -> BridgeResult<Option<(EventKind, TransferEvent)>> {
        match log.topics.first() {
            Some(topic) if *topic == self.role.topic() => {}
            _ => return Ok(None),
        }

        let (user, asset, amount, destination) = match self.role {
            VaultRole::Source => {
                let event: LockedFilter = parse_log(log.clone())
                    .map_err(|e| BridgeError::EventParsing(e.to_string()))?;
                (event.user, event.asset, event.amount, event.destination)
            }
            VaultRole::Destination => {
                let event: BurnedFilter = parse_log(log.clone())
                    .map_err(|e| BridgeError::EventParsing(e.to_string()))?;
                (event.user, event.asset, event.amount, event.destination)
            }
        };

        let kind = self.role.kind_for(Asset::from_code(asset)?);
        Ok(Some((
            kind,
            TransferEvent {
                user: format!("{:?}", user),
                amount,
                destination,
            },
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::{encode, Token};
    use ethers::types::{Address, Bytes};

    fn vault_log(topic: H256, user: Address, asset: u8, amount: u64, destination: &str) -> Log {
        let data = encode(&[
            Token::Uint(U256::from(asset)),
            Token::Uint(U256::from(amount)),
            Token::String(destination.to_string()),
        ]);

        Log {
            topics: vec![topic, H256::from(user)],
            data: Bytes::from(data),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_locked_token() {
        let user: Address = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".parse().unwrap();
        let log = vault_log(LockedFilter::signature(), user, 1, 500, "tz1dest");

        let parsed = EventParser::new(VaultRole::Source).parse_log(&log).unwrap();
        let (kind, event) = parsed.expect("locked event");

        assert_eq!(kind, EventKind::TokenLocked);
        assert_eq!(event.user, format!("{:?}", user));
        assert_eq!(event.amount, U256::from(500));
        assert_eq!(event.destination, "tz1dest");
    }

    #[test]
    fn test_parse_burned_native() {
        let user = Address::repeat_byte(0x11);
        let log = vault_log(BurnedFilter::signature(), user, 0, 7, "0xabc");

        let (kind, event) = EventParser::new(VaultRole::Destination)
            .parse_log(&log)
            .unwrap()
            .unwrap();

        assert_eq!(kind, EventKind::WrappedNativeBurned);
        assert_eq!(event.amount, U256::from(7));
    }

    #[test]
    fn test_other_events_are_skipped() {
        let log = vault_log(BurnedFilter::signature(), Address::zero(), 0, 1, "x");
        let parsed = EventParser::new(VaultRole::Source).parse_log(&log).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_unknown_asset_code_is_an_error() {
        let log = vault_log(LockedFilter::signature(), Address::zero(), 9, 1, "x");
        assert!(EventParser::new(VaultRole::Source).parse_log(&log).is_err());
    }

    #[test]
    fn test_event_kind_asset() {
        assert_eq!(EventKind::WrappedTokenBurned.asset(), Asset::Token);
        assert_eq!(EventKind::NativeLocked.asset(), Asset::Native);
    }
}
