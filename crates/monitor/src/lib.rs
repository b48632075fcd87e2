//! Cross-chain bridge monitor: per-chain log scanners feed a reconciliation
//! engine that pairs burns with mints, and a periodic sweep re-alerts on
//! anything left unmatched.

pub mod alert;
pub mod events;
pub mod reconcile;
pub mod rpc;
pub mod scanner;
pub mod sweeper;
pub mod worker;

pub use alert::{Alert, AlertDispatcher, AlertKind, AlertSink};
pub use events::{extract_leg, BridgeEvent, LegExtraction};
pub use reconcile::{LegHandler, LegOutcome, ReconcileError, Reconciler};
pub use rpc::{ChainConnector, EvmRpcClient, HttpConnector, LogSource, RpcError};
pub use scanner::{ChainScanner, ScanError, StepOutcome};
pub use sweeper::TimeoutSweeper;
pub use worker::{run_monitor, MonitorError};
