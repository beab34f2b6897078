//! chainmirror-indexers: domain model mappers and sub-indexers.
//!
//! | Module          | Op tags                                        | Models                                             |
//! |-----------------|------------------------------------------------|----------------------------------------------------|
//! | [`transaction`] | every transaction                              | `Transaction`, `TransactionVout`                   |
//! | [`token`]       | `CreateToken` + genesis                        | `Token`                                            |
//! | [`oracle`]      | `AppointOracle`, `UpdateOracle`, `RemoveOracle`| `Oracle`, `OracleHistory`, `OracleTokenCurrency`   |
//! | [`price`]       | `SetOracleData`                                | `OraclePriceFeed`, `OraclePriceAggregated`         |
//! | [`masternode`]  | `CreateMasternode`, `ResignMasternode`         | `Masternode`, `MasternodeStats`                    |
//!
//! [`default_registry`] wires them in dispatch order.

pub mod masternode;
pub mod oracle;
pub mod payload;
pub mod price;
pub mod registry;
pub mod token;
pub mod transaction;

pub use registry::default_registry;
