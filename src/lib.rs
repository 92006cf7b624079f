//! Instruction-Level Replication and Transactification for a typed SSA
//! intermediate representation.
//!
//! [`harden_module`] runs both passes in the order a hardened build
//! requires: ILR first (shadow values, cross-checks, control-flow
//! hardening), then TX (transaction boundaries sized against the
//! checks ILR just inserted).

pub mod coerce;
pub mod driver;
pub mod error;
pub mod helpers;
pub mod ilr;
pub mod ir;
pub mod shadow;
pub mod tx;

pub use error::{PassError, PassResult};
pub use helpers::HelperRegistry;
pub use ir::Module;
pub use tx::TxConfig;

use tracing::info_span;

/// Runs ILR then TX over every defined function in `module`, resolving
/// the runtime helper ABI against `module`'s own declarations first.
pub fn harden_module(module: &mut Module, tx_config: &TxConfig) -> PassResult<()> {
    let _span = info_span!("harden_module").entered();
    let helpers = HelperRegistry::resolve(module)?;
    let ilr_results = ilr::run_module(module, &helpers)?;
    tx::run_module(module, &helpers, tx_config, &ilr_results)?;
    Ok(())
}
